//! Shared test utilities for adapter testing.
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! kvbridge-store = { path = "../store", features = ["testutil"] }
//! ```

use bytes::Bytes;

use crate::{
    KeyValueStore,
    error::{StoreError, StoreResult},
    memory::MemoryStore,
};

/// Create a deterministic test key from a prefix and index.
///
/// Produces keys like `"prefix:000042"`; zero-padding keeps lexicographic and
/// numeric order aligned.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}:{idx:06}").into_bytes()
}

/// Create a test value tagged with a task ID and sequence number.
#[must_use]
pub fn make_tagged_value(task: usize, seq: usize) -> Bytes {
    Bytes::from(format!("task{task}-val{seq}"))
}

/// Create a [`MemoryStore`] pre-populated with `count` keys.
///
/// # Panics
///
/// Panics if any `store` call fails.
pub async fn populated_store(prefix: &str, count: usize) -> MemoryStore {
    let store = MemoryStore::new();
    for i in 0..count {
        store.store(&make_key(prefix, i), make_tagged_value(0, i)).await.expect("populate store");
    }
    store
}

/// Assert that a [`StoreResult`] is an error of the given [`StoreError`]
/// variant.
///
/// ```no_run
/// use kvbridge_store::{StoreError, StoreResult, assert_store_error};
///
/// let result: StoreResult<()> = Err(StoreError::Closed);
/// assert_store_error!(result, Closed);
/// ```
#[macro_export]
macro_rules! assert_store_error {
    ($result:expr, $variant:ident) => {{
        let result = &$result;
        assert!(
            matches!(result, Err($crate::error::StoreError::$variant { .. })),
            concat!("expected StoreError::", stringify!($variant), ", got: {:?}"),
            result,
        );
    }};
    ($result:expr, $variant:ident, $msg:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err($crate::error::StoreError::$variant { .. })),
            concat!("{}: expected StoreError::", stringify!($variant), ", got: {:?}"),
            $msg,
            result,
        );
    }};
}

/// Assert that a [`StoreResult`] is a [`StoreError::Conflict`].
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        $crate::assert_store_error!($result, Conflict)
    };
}

/// Assert that a [`StoreResult`] is `Ok` and return the inner value.
#[macro_export]
macro_rules! assert_store_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StoreError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StoreError: {e:?}", $msg),
        }
    };
}

/// Returns `true` if the result is a retries-exhausted error whose last
/// failure was a conflict.
pub fn is_exhausted_conflict<T>(result: &StoreResult<T>) -> bool {
    matches!(result, Err(StoreError::RetriesExhausted { last, .. }) if last.is_conflict())
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn make_key_format_and_ordering() {
        assert_eq!(make_key("test", 42), b"test:000042");
        assert!(make_key("k", 9) < make_key("k", 10));
    }

    #[tokio::test]
    async fn populated_store_holds_tagged_values() {
        let store = populated_store("item", 3).await;
        assert_eq!(store.len(), 3);
        let value = store.load(&make_key("item", 2)).await.expect("load");
        assert_eq!(value, Some(Bytes::from("task0-val2")));
    }

    #[test]
    fn macros_match_variants() {
        let result: StoreResult<()> = Err(StoreError::conflict("x"));
        assert_conflict!(result);
        assert_store_error!(Err::<(), _>(StoreError::Closed), Closed, "closed");
        let ok: StoreResult<i32> = Ok(42);
        assert_eq!(assert_store_ok!(ok), 42);
    }

    #[test]
    fn exhausted_conflict_detection() {
        let exhausted: StoreResult<()> =
            Err(StoreError::retries_exhausted("increment", 4, StoreError::conflict("x")));
        assert!(is_exhausted_conflict(&exhausted));
        assert!(!is_exhausted_conflict::<()>(&Err(StoreError::conflict("x"))));
    }
}
