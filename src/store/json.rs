//! JSON file backed list store
//!
//! The whole file is one object of list name to entries, e.g.
//! `{"Notes": ["buy milk"], "Reminders": ["call mom"]}`. It is read once on
//! open and rewritten (temp file + rename) after every change.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{remove_entry, ListStore, StoreError};

pub struct JsonListStore {
    path: PathBuf,
    lists: HashMap<String, Vec<String>>,
}

impl JsonListStore {
    /// Open the store at `path`; a missing file starts out empty
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let lists = if path.exists() {
            let raw = fs::read(path)?;
            if raw.iter().all(u8::is_ascii_whitespace) {
                HashMap::new()
            } else {
                serde_json::from_slice(&raw)?
            }
        } else {
            HashMap::new()
        };

        info!(?path, lists = lists.len(), "list store opened");

        Ok(Self {
            path: path.to_owned(),
            lists,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.lists)?)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = ?self.path, "list store saved");
        Ok(())
    }
}

impl ListStore for JsonListStore {
    fn get(&self, list: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.lists.get(list).cloned().unwrap_or_default())
    }

    fn append(&mut self, list: &str, entry: &str) -> Result<(), StoreError> {
        self.lists
            .entry(list.to_string())
            .or_default()
            .push(entry.to_string());
        self.save()
    }

    fn remove(&mut self, list: &str, index: usize) -> Result<String, StoreError> {
        let removed = remove_entry(&mut self.lists, list, index)?;
        self.save()?;
        Ok(removed)
    }
}
