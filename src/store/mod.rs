// Metadata store
//
// Document collections (files, series, episodes, videos) with the three
// operations the queue layer needs. Documents carry their id in `_id`.

pub mod memory;
pub mod records;
pub mod sqlite;
pub mod status;

use serde_json::{Map, Value};

use crate::error::Result;

pub use records::{Checksum, FileRecord, ReplicaLocation};
pub use status::{FileStatus, StatusUpdater};

pub trait MetadataStore: Send + Sync {
    /// First document whose fields equal every field of `filter`
    fn find_one(&self, collection: &str, filter: &Value) -> Result<Option<Value>>;

    /// Replace (or insert) the whole document
    fn upsert(&self, collection: &str, id: &str, doc: &Value) -> Result<()>;

    /// Set the given fields on an existing document. Keys may be dotted paths
    /// (`versions.720p`). Returns false if no such document exists.
    fn update_set(&self, collection: &str, id: &str, fields: &Map<String, Value>) -> Result<bool>;
}

/// Every filter key (dotted paths allowed) must equal the document's value.
/// Numbers compare by value so `1` matches `1.0`.
pub fn matches_filter(doc: &Value, filter: &Value) -> bool {
    let Some(filter) = filter.as_object() else {
        return false;
    };

    filter.iter().all(|(path, expected)| match lookup_path(doc, path) {
        Some(actual) => values_equal(actual, expected),
        None => expected.is_null(),
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Resolve `a.b.c` against nested objects
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |node, key| node.get(key))
}

/// Apply `$set`-style fields to a document, creating intermediate objects
pub fn apply_set(doc: &mut Value, fields: &Map<String, Value>) {
    for (path, value) in fields {
        let mut node = &mut *doc;
        let mut parts = path.split('.').peekable();
        while let Some(key) = parts.next() {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            let Some(obj) = node.as_object_mut() else {
                break;
            };
            if parts.peek().is_none() {
                obj.insert(key.to_string(), value.clone());
                break;
            }
            node = obj.entry(key.to_string()).or_insert_with(|| Value::Object(Map::new()));
        }
    }
}

/// Filter is a plain `{"_id": "<id>"}` lookup
pub(crate) fn id_only_filter(filter: &Value) -> Option<&str> {
    let obj = filter.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    obj.get("_id")?.as_str()
}

/// Make sure the stored body carries its own id
pub(crate) fn with_id(id: &str, doc: &Value) -> Value {
    let mut doc = doc.clone();
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("_id".to_string(), Value::String(id.to_string()));
    }
    doc
}
