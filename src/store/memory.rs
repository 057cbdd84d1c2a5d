// In-memory metadata store for tests and the thread supervisor

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{apply_set, id_only_filter, matches_filter, with_id, MetadataStore};
use crate::error::Result;

#[derive(Default)]
pub struct MemoryMetadataStore {
    docs: Mutex<BTreeMap<(String, String), Value>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Value> {
        self.docs
            .lock()
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.docs.lock().keys().filter(|(c, _)| c == collection).count()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn find_one(&self, collection: &str, filter: &Value) -> Result<Option<Value>> {
        if let Some(id) = id_only_filter(filter) {
            return Ok(self.get(collection, id));
        }

        let docs = self.docs.lock();
        Ok(docs
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|(_, doc)| doc)
            .find(|doc| matches_filter(doc, filter))
            .cloned())
    }

    fn upsert(&self, collection: &str, id: &str, doc: &Value) -> Result<()> {
        self.docs
            .lock()
            .insert((collection.to_string(), id.to_string()), with_id(id, doc));
        Ok(())
    }

    fn update_set(&self, collection: &str, id: &str, fields: &Map<String, Value>) -> Result<bool> {
        let mut docs = self.docs.lock();
        match docs.get_mut(&(collection.to_string(), id.to_string())) {
            Some(doc) => {
                apply_set(doc, fields);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
