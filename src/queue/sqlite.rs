// SQLite-backed list store
//
// Every primitive runs inside an IMMEDIATE transaction, so the pending -> work
// move is atomic across processes sharing the database file. SQLite has no
// blocking pop; the blocking move polls at a short interval until the timeout.

use std::time::{Duration, Instant};

use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};

use super::ListStore;
use crate::constants::SQLITE_POLL_INTERVAL_MS;
use crate::db::SharedConnection;
use crate::error::Result;

pub struct SqliteListStore {
    conn: SharedConnection,
    poll_interval: Duration,
}

#[derive(Clone, Copy)]
enum End {
    Head,
    Tail,
}

impl SqliteListStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self {
            conn,
            poll_interval: Duration::from_millis(SQLITE_POLL_INTERVAL_MS),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

fn push(tx: &Transaction, key: &str, value: &str, end: End) -> Result<()> {
    let sql = match end {
        End::Head => "SELECT MIN(position) - 1 FROM queue_items WHERE list_key = ?1",
        End::Tail => "SELECT MAX(position) + 1 FROM queue_items WHERE list_key = ?1",
    };
    let position: Option<i64> = tx.query_row(sql, params![key], |row| row.get(0))?;

    tx.execute(
        "INSERT INTO queue_items (list_key, position, payload) VALUES (?1, ?2, ?3)",
        params![key, position.unwrap_or(0), value],
    )?;
    Ok(())
}

fn pop(tx: &Transaction, key: &str, end: End) -> Result<Option<String>> {
    let sql = match end {
        End::Head => {
            "SELECT id, payload FROM queue_items WHERE list_key = ?1 ORDER BY position ASC LIMIT 1"
        }
        End::Tail => {
            "SELECT id, payload FROM queue_items WHERE list_key = ?1 ORDER BY position DESC LIMIT 1"
        }
    };

    let row: Option<(i64, String)> = tx
        .query_row(sql, params![key], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;

    match row {
        Some((id, payload)) => {
            tx.execute("DELETE FROM queue_items WHERE id = ?1", params![id])?;
            Ok(Some(payload))
        }
        None => Ok(None),
    }
}

impl ListStore for SqliteListStore {
    fn push_tail(&self, key: &str, value: &str) -> Result<()> {
        self.with_tx(|tx| push(tx, key, value, End::Tail))
    }

    fn push_head(&self, key: &str, value: &str) -> Result<()> {
        self.with_tx(|tx| push(tx, key, value, End::Head))
    }

    fn pop_head(&self, key: &str) -> Result<Option<String>> {
        self.with_tx(|tx| pop(tx, key, End::Head))
    }

    fn pop_tail(&self, key: &str) -> Result<Option<String>> {
        self.with_tx(|tx| pop(tx, key, End::Tail))
    }

    fn len(&self, key: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_items WHERE list_key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn move_tail_to_head_blocking(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            let moved = self.with_tx(|tx| match pop(tx, src, End::Tail)? {
                Some(item) => {
                    push(tx, dst, &item, End::Head)?;
                    Ok(Some(item))
                }
                None => Ok(None),
            })?;

            if moved.is_some() {
                return Ok(moved);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}
