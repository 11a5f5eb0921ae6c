//! Values and their document encoding.
//!
//! A document is a flat JSON object. Scalars sit under the value field next
//! to a type tag; objects are stored flattened into the document itself:
//!
//! ```text
//! String  {"value": "Ada", "type": "String", "_rev": "1-..."}
//! Number  {"value": 42, "type": "Number"}
//! Hash    {"name": "Ada", "langs": 3, "type": "Hash"}
//! ```
//!
//! `_id` and `_rev` belong to the server and are stripped on the way out.
//! An object may not use them, or the type field, as its own keys.

use std::fmt;

use kvbridge_store::{StoreError, StoreResult, StoreValue, parse_integer};
use serde_json::{Map, Number, Value};

const TAG_STRING: &str = "String";
const TAG_NUMBER: &str = "Number";
const TAG_HASH: &str = "Hash";

/// Server-owned fields.
const ID_FIELD: &str = "_id";
const REV_FIELD: &str = "_rev";

/// A value held by [`CouchStore`](crate::CouchStore).
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentValue {
    /// Text.
    String(String),
    /// Integer or float.
    Number(Number),
    /// Structured object, stored as the document's own fields.
    Hash(Map<String, Value>),
}

impl DocumentValue {
    /// Type tag written next to the value.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::String(_) => TAG_STRING,
            Self::Number(_) => TAG_NUMBER,
            Self::Hash(_) => TAG_HASH,
        }
    }

    /// The text, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(text) => f.write_str(text),
            Self::Number(n) => write!(f, "{n}"),
            Self::Hash(map) => write!(f, "{}", Value::Object(map.clone())),
        }
    }
}

/// Numbers hold integers natively; strings are parsed as decimal text.
impl StoreValue for DocumentValue {
    fn from_integer(n: i64) -> Self {
        Self::Number(n.into())
    }

    fn to_integer(&self) -> StoreResult<i64> {
        match self {
            Self::Number(n) => {
                n.as_i64().ok_or_else(|| StoreError::type_mismatch(format!("number {n} is not a 64-bit integer")))
            },
            Self::String(text) => parse_integer(text.as_bytes()),
            Self::Hash(_) => Err(StoreError::type_mismatch("a structured value is not an integer")),
        }
    }
}

impl From<&str> for DocumentValue {
    fn from(text: &str) -> Self {
        Self::String(text.to_owned())
    }
}

impl From<String> for DocumentValue {
    fn from(text: String) -> Self {
        Self::String(text)
    }
}

impl From<i64> for DocumentValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<Number> for DocumentValue {
    fn from(n: Number) -> Self {
        Self::Number(n)
    }
}

impl From<Map<String, Value>> for DocumentValue {
    fn from(map: Map<String, Value>) -> Self {
        Self::Hash(map)
    }
}

/// Converts between [`DocumentValue`]s and document bodies for one field
/// layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentCodec {
    value_field: String,
    type_field: String,
}

impl DocumentCodec {
    /// Codec storing scalars under `value_field` and the tag under
    /// `type_field`.
    pub fn new(value_field: impl Into<String>, type_field: impl Into<String>) -> Self {
        Self { value_field: value_field.into(), type_field: type_field.into() }
    }

    /// Rejects structured values whose fields would collide with the type
    /// tag or the server-owned fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] naming the reserved field.
    pub fn check(&self, value: &DocumentValue) -> StoreResult<()> {
        let DocumentValue::Hash(map) = value else { return Ok(()) };
        match [self.type_field.as_str(), ID_FIELD, REV_FIELD].into_iter().find(|field| map.contains_key(*field)) {
            Some(field) => Err(StoreError::serialization(format!("structured value uses reserved field {field:?}"))),
            None => Ok(()),
        }
    }

    /// Builds the body for a write. `rev` is the revision being replaced.
    ///
    /// # Errors
    ///
    /// Fails as [`check`](Self::check) does.
    pub fn encode(&self, value: &DocumentValue, rev: Option<&str>) -> StoreResult<Map<String, Value>> {
        self.check(value)?;
        let mut doc = match value {
            DocumentValue::Hash(map) => map.clone(),
            DocumentValue::String(text) => {
                Map::from_iter([(self.value_field.clone(), Value::String(text.clone()))])
            },
            DocumentValue::Number(n) => Map::from_iter([(self.value_field.clone(), Value::Number(n.clone()))]),
        };
        doc.insert(self.type_field.clone(), Value::String(value.tag().to_owned()));
        if let Some(rev) = rev {
            doc.insert(REV_FIELD.to_owned(), Value::String(rev.to_owned()));
        }
        Ok(doc)
    }

    /// Reads a document body back into a value.
    ///
    /// Untagged documents are read from the value field by JSON type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] when the tag and payload
    /// disagree or there is no payload.
    pub fn decode(&self, mut doc: Map<String, Value>) -> StoreResult<DocumentValue> {
        let tag = match doc.get(&self.type_field) {
            Some(Value::String(tag)) => Some(tag.clone()),
            _ => None,
        };
        if tag.as_deref() == Some(TAG_HASH) {
            doc.remove(ID_FIELD);
            doc.remove(REV_FIELD);
            doc.remove(&self.type_field);
            return Ok(DocumentValue::Hash(doc));
        }

        let payload = doc.remove(&self.value_field);
        match (tag.as_deref(), payload) {
            (Some(TAG_STRING) | None, Some(Value::String(text))) => Ok(DocumentValue::String(text)),
            (Some(TAG_NUMBER) | None, Some(Value::Number(n))) => Ok(DocumentValue::Number(n)),
            (None, Some(Value::Object(map))) => Ok(DocumentValue::Hash(map)),
            (tag, Some(other)) => Err(StoreError::serialization(format!(
                "document tagged {} holds {other} in {:?}",
                tag.unwrap_or("nothing"),
                self.value_field,
            ))),
            (_, None) => {
                Err(StoreError::serialization(format!("document has no {:?} field", self.value_field)))
            },
        }
    }
}
