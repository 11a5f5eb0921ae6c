//! Values an adapter can hand to `increment`.

use std::fmt;

use bytes::Bytes;

use crate::{StoreError, StoreResult};

/// A value type an adapter stores.
///
/// The only requirement beyond ordinary value semantics is a mapping to and
/// from integers, which `increment` and the [`Defaults`](crate::Defaults)
/// fallback rely on.
pub trait StoreValue: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Builds the value representing `n`.
    fn from_integer(n: i64) -> Self;

    /// Interprets the value as an integer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TypeMismatch`] when the value does not hold an
    /// integer.
    fn to_integer(&self) -> StoreResult<i64>;
}

/// Byte values hold integers as ASCII decimal text.
impl StoreValue for Bytes {
    fn from_integer(n: i64) -> Self {
        Bytes::from(n.to_string())
    }

    fn to_integer(&self) -> StoreResult<i64> {
        parse_integer(self)
    }
}

/// Parses ASCII decimal text, allowing surrounding whitespace and a sign.
///
/// # Errors
///
/// Returns [`StoreError::TypeMismatch`] for anything else.
pub fn parse_integer(raw: &[u8]) -> StoreResult<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            StoreError::type_mismatch(format!(
                "value {:?} is not an integer",
                String::from_utf8_lossy(raw)
            ))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bytes_integer_mapping() {
        assert_eq!(Bytes::from_integer(-42), Bytes::from("-42"));
        assert_eq!(Bytes::from("17").to_integer().unwrap(), 17);
        assert_eq!(Bytes::from(" 5\n").to_integer().unwrap(), 5);
    }

    #[test]
    fn non_integers_are_type_mismatches() {
        for raw in [&b"abc"[..], b"", b"1.5", b"\xff\xfe", b"9223372036854775808"] {
            assert!(
                matches!(parse_integer(raw), Err(StoreError::TypeMismatch { .. })),
                "{raw:?} should not parse"
            );
        }
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn integer_text_maps_back(n in any::<i64>()) {
                prop_assert_eq!(Bytes::from_integer(n).to_integer().unwrap(), n);
            }
        }
    }
}
