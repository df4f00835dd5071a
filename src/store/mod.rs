//! Persisted entry lists
//!
//! Entries are kept as ordered string lists keyed by list name
//! ("Notes", "Reminders"). The session driver appends classified entries;
//! clients read and prune them over IPC.

mod json;

use std::collections::HashMap;

pub use json::JsonListStore;

/// Errors from a list store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("list store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("list store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no entry {index} in {list} (has {len})")]
    IndexOutOfRange {
        list: String,
        index: usize,
        len: usize,
    },
}

/// Ordered string lists keyed by name
pub trait ListStore: Send {
    /// All entries of `list`, oldest first; unknown lists are empty
    fn get(&self, list: &str) -> Result<Vec<String>, StoreError>;

    /// Append one entry to the end of `list`
    fn append(&mut self, list: &str, entry: &str) -> Result<(), StoreError>;

    /// Remove and return the entry at `index`
    fn remove(&mut self, list: &str, index: usize) -> Result<String, StoreError>;
}

impl<S: ListStore + ?Sized> ListStore for Box<S> {
    fn get(&self, list: &str) -> Result<Vec<String>, StoreError> {
        (**self).get(list)
    }

    fn append(&mut self, list: &str, entry: &str) -> Result<(), StoreError> {
        (**self).append(list, entry)
    }

    fn remove(&mut self, list: &str, index: usize) -> Result<String, StoreError> {
        (**self).remove(list, index)
    }
}

/// Non-persistent store
#[derive(Debug, Default, Clone)]
pub struct MemoryListStore {
    lists: HashMap<String, Vec<String>>,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ListStore for MemoryListStore {
    fn get(&self, list: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.lists.get(list).cloned().unwrap_or_default())
    }

    fn append(&mut self, list: &str, entry: &str) -> Result<(), StoreError> {
        self.lists
            .entry(list.to_string())
            .or_default()
            .push(entry.to_string());
        Ok(())
    }

    fn remove(&mut self, list: &str, index: usize) -> Result<String, StoreError> {
        remove_entry(&mut self.lists, list, index)
    }
}

pub(crate) fn remove_entry(
    lists: &mut HashMap<String, Vec<String>>,
    list: &str,
    index: usize,
) -> Result<String, StoreError> {
    let entries = lists.get_mut(list);
    let len = entries.as_ref().map_or(0, |e| e.len());
    match entries {
        Some(entries) if index < len => Ok(entries.remove(index)),
        _ => Err(StoreError::IndexOutOfRange {
            list: list.to_string(),
            index,
            len,
        }),
    }
}
