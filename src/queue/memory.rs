// In-memory list store for tests and the thread supervisor

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::ListStore;
use crate::error::Result;

#[derive(Default)]
pub struct MemoryListStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    pushed: Condvar,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a list, head first
    pub fn items(&self, key: &str) -> Vec<String> {
        self.lists
            .lock()
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl ListStore for MemoryListStore {
    fn push_tail(&self, key: &str, value: &str) -> Result<()> {
        self.lists
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        self.pushed.notify_all();
        Ok(())
    }

    fn push_head(&self, key: &str, value: &str) -> Result<()> {
        self.lists
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        self.pushed.notify_all();
        Ok(())
    }

    fn pop_head(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lists.lock().get_mut(key).and_then(|l| l.pop_front()))
    }

    fn pop_tail(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lists.lock().get_mut(key).and_then(|l| l.pop_back()))
    }

    fn len(&self, key: &str) -> Result<usize> {
        Ok(self.lists.lock().get(key).map(|l| l.len()).unwrap_or(0))
    }

    fn move_tail_to_head_blocking(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut lists = self.lists.lock();

        loop {
            if let Some(item) = lists.get_mut(src).and_then(|l| l.pop_back()) {
                lists
                    .entry(dst.to_string())
                    .or_default()
                    .push_front(item.clone());
                return Ok(Some(item));
            }

            if self.pushed.wait_until(&mut lists, deadline).timed_out() {
                return Ok(None);
            }
        }
    }
}
