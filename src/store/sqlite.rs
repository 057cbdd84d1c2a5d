// SQLite-backed metadata store (documents table)

use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde_json::{Map, Value};

use super::{apply_set, id_only_filter, matches_filter, with_id, MetadataStore};
use crate::db::SharedConnection;
use crate::error::Result;

pub struct SqliteMetadataStore {
    conn: SharedConnection,
}

impl SqliteMetadataStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn find_one(&self, collection: &str, filter: &Value) -> Result<Option<Value>> {
        let conn = self.conn.lock();

        if let Some(id) = id_only_filter(filter) {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()?;
            return match body {
                Some(body) => Ok(Some(serde_json::from_str(&body)?)),
                None => Ok(None),
            };
        }

        let mut stmt =
            conn.prepare("SELECT body FROM documents WHERE collection = ?1 ORDER BY id")?;
        let bodies = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;

        for body in bodies {
            let doc: Value = serde_json::from_str(&body?)?;
            if matches_filter(&doc, filter) {
                return Ok(Some(doc));
            }
        }

        Ok(None)
    }

    fn upsert(&self, collection: &str, id: &str, doc: &Value) -> Result<()> {
        let body = serde_json::to_string(&with_id(id, doc))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body, updated_at = datetime('now')",
            params![collection, id, body],
        )?;
        Ok(())
    }

    fn update_set(&self, collection: &str, id: &str, fields: &Map<String, Value>) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let body: Option<String> = tx
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(body) = body else {
            return Ok(false);
        };

        let mut doc: Value = serde_json::from_str(&body)?;
        apply_set(&mut doc, fields);

        tx.execute(
            "UPDATE documents SET body = ?1, updated_at = datetime('now') WHERE collection = ?2 AND id = ?3",
            params![serde_json::to_string(&doc)?, collection, id],
        )?;
        tx.commit()?;
        Ok(true)
    }
}
