//! The document value model (part of the §3 data model).
//!
//! A document is an opaque ordered mapping from string field names to
//! JSON-valued fields, carrying a mandatory `_id` of type string. The store
//! treats everything but `_id` as an opaque payload; this module only knows
//! how to merge and (de)serialize it, never how to query it (that's
//! `store::collection`'s job).

use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CResult, Error};

/// The reserved field name carrying the document's immutable identity.
pub const ID_FIELD: &str = "_id";

/// An opaque JSON document. `id` is immutable once inserted; `fields` never
/// contains an `_id` key (it's split out on construction/parse so merges
/// can't accidentally clobber it).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), fields: Map::new() }
    }

    pub fn with_fields(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        let mut fields = fields;
        fields.remove(ID_FIELD);
        Self { id: id.into(), fields }
    }

    /// Parses a document out of a JSON object, requiring a string `_id`.
    pub fn from_value(value: Value) -> CResult<Self> {
        let Value::Object(mut obj) = value else {
            return Err(Error::InvalidArgument("document must be a JSON object".into()));
        };
        let id = match obj.remove(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(_) => return Err(Error::InvalidArgument("_id must be a non-empty string".into())),
            None => return Err(Error::InvalidArgument("document is missing _id".into())),
        };
        Ok(Self { id, fields: obj })
    }

    /// Re-assembles `_id` and the opaque fields into one JSON object.
    pub fn to_value(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        Value::Object(obj)
    }

    /// Shallow-merges `updates` into this document: fields present in
    /// `updates` overwrite fields in the old document, `_id` is never
    /// overwritten even if present in `updates`.
    pub fn merge(&mut self, updates: &Map<String, Value>) {
        for (key, value) in updates {
            if key == ID_FIELD {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_through_value() {
        let value = json!({"_id": "u1", "name": "Alice", "age": 30});
        let doc = Document::from_value(value.clone()).unwrap();
        assert_eq!(doc.id, "u1");
        assert_eq!(doc.get("name"), Some(&json!("Alice")));
        assert_eq!(doc.to_value(), value);
    }

    #[test]
    fn rejects_missing_or_non_string_id() {
        assert!(Document::from_value(json!({"name": "Alice"})).is_err());
        assert!(Document::from_value(json!({"_id": 1})).is_err());
        assert!(Document::from_value(json!("not an object")).is_err());
    }

    #[test]
    fn merge_overwrites_fields_but_never_id() {
        let mut doc = Document::from_value(json!({"_id": "x", "v": 1})).unwrap();
        let updates = json!({"_id": "hijack", "v": 2, "new": true});
        let Value::Object(updates) = updates else { unreachable!() };
        doc.merge(&updates);
        assert_eq!(doc.id, "x");
        assert_eq!(doc.get("v"), Some(&json!(2)));
        assert_eq!(doc.get("new"), Some(&json!(true)));
    }
}
