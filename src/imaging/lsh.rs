//! Banded LSH index over perceptual hashes.
//!
//! The 64-bit hash is split into contiguous 8-bit bands; each band maps its
//! key to the set of image ids carrying it. Duplicate lookup unions the
//! band buckets and compares only those candidates by full Hamming
//! distance, which keeps lookup linear in the candidate count rather than
//! the corpus. Any two hashes within the default threshold of 8 bits must
//! share at least one band by pigeonhole.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::imaging::hash::{self, band_key, hamming};
use crate::model::SCHEMA_VERSION;

pub const DEFAULT_BANDS: usize = 8;
pub const DEFAULT_THRESHOLD: u32 = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct HashEntry {
    pub phash: u64,
    pub dhash: u64,
    pub address: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_images: usize,
    pub per_source: BTreeMap<String, usize>,
    pub bucket_count: usize,
    pub avg_bucket_size: f64,
    pub max_bucket_size: usize,
}

/// In-memory LSH index. Callers serialize access behind a mutex; the index
/// itself is single-threaded.
pub struct HashIndex {
    bands: usize,
    threshold: u32,
    entries: BTreeMap<String, HashEntry>,
    buckets: Vec<HashMap<u8, HashSet<String>>>,
}

impl HashIndex {
    pub fn new(bands: usize, threshold: u32) -> Self {
        let bands = bands.clamp(1, 8);
        HashIndex {
            bands,
            threshold,
            entries: BTreeMap::new(),
            buckets: vec![HashMap::new(); bands],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: &str) -> Option<&HashEntry> {
        self.entries.get(id)
    }

    /// Registers an image hash. Idempotent when the same id arrives with
    /// the same hash; a different id with an identical hash is rejected
    /// because the duplicate check should have caught it first.
    pub fn register(&mut self, id: &str, entry: HashEntry) -> Result<()> {
        if let Some(existing) = self.entries.get(id) {
            if existing.phash == entry.phash {
                return Ok(());
            }
            return Err(PipelineError::InvalidArgument(format!(
                "image id {id} re-registered with a different hash"
            )));
        }
        if let Some((other, _)) = self.find_exact(entry.phash) {
            return Err(PipelineError::InvalidArgument(format!(
                "hash {} already registered as {other}",
                hash::to_hex(entry.phash)
            )));
        }
        for band in 0..self.bands {
            self.buckets[band]
                .entry(band_key(entry.phash, band))
                .or_default()
                .insert(id.to_string());
        }
        self.entries.insert(id.to_string(), entry);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<HashEntry> {
        let entry = self.entries.remove(id)?;
        for band in 0..self.bands {
            let key = band_key(entry.phash, band);
            if let Some(bucket) = self.buckets[band].get_mut(&key) {
                bucket.remove(id);
                if bucket.is_empty() {
                    self.buckets[band].remove(&key);
                }
            }
        }
        Some(entry)
    }

    fn candidates(&self, phash: u64) -> HashSet<&String> {
        let mut out = HashSet::new();
        for band in 0..self.bands {
            if let Some(bucket) = self.buckets[band].get(&band_key(phash, band)) {
                out.extend(bucket.iter());
            }
        }
        out
    }

    fn find_exact(&self, phash: u64) -> Option<(&String, &HashEntry)> {
        self.candidates(phash)
            .into_iter()
            .map(|id| (id, &self.entries[id]))
            .find(|(_, entry)| entry.phash == phash)
    }

    /// Closest stored hash within the Hamming threshold, optionally scoped
    /// to a single property address. Returns the original image id and the
    /// distance.
    pub fn find_duplicate(
        &self,
        phash: u64,
        scope: Option<&str>,
    ) -> Option<(String, u32)> {
        self.candidates(phash)
            .into_iter()
            .map(|id| (id, &self.entries[id]))
            .filter(|(_, entry)| scope.is_none_or(|addr| entry.address == addr))
            .map(|(id, entry)| (id.clone(), hamming(phash, entry.phash)))
            .filter(|(_, distance)| *distance <= self.threshold)
            .min_by_key(|(id, distance)| (*distance, id.clone()))
    }

    pub fn is_duplicate(&self, phash: u64) -> Option<(String, u32)> {
        self.find_duplicate(phash, None)
    }

    pub fn stats(&self) -> IndexStats {
        let mut per_source: BTreeMap<String, usize> = BTreeMap::new();
        for entry in self.entries.values() {
            *per_source.entry(entry.source.clone()).or_default() += 1;
        }
        let sizes: Vec<usize> = self
            .buckets
            .iter()
            .flat_map(|band| band.values().map(HashSet::len))
            .collect();
        let bucket_count = sizes.len();
        let avg_bucket_size = if bucket_count == 0 {
            0.0
        } else {
            sizes.iter().sum::<usize>() as f64 / bucket_count as f64
        };
        IndexStats {
            total_images: self.entries.len(),
            per_source,
            bucket_count,
            avg_bucket_size,
            max_bucket_size: sizes.into_iter().max().unwrap_or(0),
        }
    }

    pub fn to_document(&self) -> PersistedIndex {
        PersistedIndex {
            schema_version: SCHEMA_VERSION,
            bands: self.bands,
            threshold: self.threshold,
            entries: self
                .entries
                .iter()
                .map(|(id, entry)| {
                    (
                        id.clone(),
                        PersistedEntry {
                            phash: hash::to_hex(entry.phash),
                            dhash: hash::to_hex(entry.dhash),
                            address: entry.address.clone(),
                            source: entry.source.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Rebuilds the index, including all band buckets, from the persisted
    /// hash list.
    pub fn from_document(doc: PersistedIndex) -> Result<Self> {
        if doc.schema_version != SCHEMA_VERSION {
            return Err(PipelineError::CorruptState(format!(
                "hash index schema version {} (expected {SCHEMA_VERSION})",
                doc.schema_version
            )));
        }
        let mut index = HashIndex::new(doc.bands, doc.threshold);
        for (id, entry) in doc.entries {
            let parsed = HashEntry {
                phash: hash::from_hex(&entry.phash)?,
                dhash: hash::from_hex(&entry.dhash)?,
                address: entry.address,
                source: entry.source,
            };
            index.register(&id, parsed)?;
        }
        debug!(total = index.len(), bands = index.bands, "hash index rebuilt");
        Ok(index)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedIndex {
    pub schema_version: u32,
    pub bands: usize,
    pub threshold: u32,
    pub entries: BTreeMap<String, PersistedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub phash: String,
    pub dhash: String,
    pub address: String,
    pub source: String,
}
