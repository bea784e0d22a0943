//! Address-to-folder lookup so a human can find a property's image folder
//! from its address without recomputing the digest.

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::SCHEMA_VERSION;
use crate::store::atomic;

#[derive(Debug, Serialize, Deserialize)]
struct FoldersDoc {
    schema_version: u32,
    folders: BTreeMap<String, String>,
}

impl Default for FoldersDoc {
    fn default() -> Self {
        FoldersDoc { schema_version: SCHEMA_VERSION, folders: BTreeMap::new() }
    }
}

pub struct FolderLookup {
    path: PathBuf,
    inner: Mutex<FoldersDoc>,
}

impl FolderLookup {
    pub fn open(path: PathBuf) -> Result<Self> {
        let doc: FoldersDoc = atomic::read_document(&path)?.unwrap_or_default();
        Ok(FolderLookup { path, inner: Mutex::new(doc) })
    }

    pub fn record(&self, address: &str, folder: &str) -> Result<()> {
        let mut doc = self.inner.lock();
        let prior = doc
            .folders
            .insert(address.to_string(), folder.to_string());
        if prior.as_deref() != Some(folder) {
            atomic::write_document(&self.path, &*doc)?;
        }
        Ok(())
    }

    pub fn get(&self, address: &str) -> Option<String> {
        self.inner.lock().folders.get(address).cloned()
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.inner
            .lock()
            .folders
            .iter()
            .map(|(address, folder)| (address.clone(), folder.clone()))
            .collect()
    }
}
