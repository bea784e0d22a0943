//! Per-property image manifests and the content-addressed image folder
//! layout: `processed/<address_hash>/<seq>_<source>.png`.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use xxhash_rust::xxh64::xxh64;

use crate::error::Result;
use crate::store::atomic;

/// Short stable digest of a normalized address, used as the image folder
/// name.
pub fn address_hash(normalized_address: &str) -> String {
    format!("{:016x}", xxh64(normalized_address.as_bytes(), 0))
}

/// Decodes, standardises, and re-encodes an image: capped at `max_dim` on
/// the long side, always PNG. Re-encoding also drops EXIF.
pub fn standardize_image(bytes: &[u8], max_dim: u32) -> Result<(image::DynamicImage, Vec<u8>)> {
    let decoded = image::load_from_memory(bytes)?;
    let resized = if decoded.width() > max_dim || decoded.height() > max_dim {
        decoded.resize(max_dim, max_dim, FilterType::Lanczos3)
    } else {
        decoded
    };
    let mut out = Vec::new();
    resized.write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)?;
    Ok((resized, out))
}

/// One stored image. Created during listing extraction and never mutated;
/// the record exists iff its bytes file exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: String,
    /// 16-char big-endian hex.
    pub perceptual_hash: String,
    pub difference_hash: String,
    pub property_address: String,
    pub source: String,
    pub bytes_path: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub address: String,
    pub address_hash: String,
    pub images: Vec<ImageRecord>,
    pub total_downloaded: u32,
    pub duplicates_rejected: u32,
    /// Sources whose extraction finished, for resume after a crash.
    #[serde(default)]
    pub completed_sources: Vec<String>,
}

impl ImageManifest {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let address_hash = address_hash(&address);
        ImageManifest {
            address,
            address_hash,
            images: Vec::new(),
            total_downloaded: 0,
            duplicates_rejected: 0,
            completed_sources: Vec::new(),
        }
    }

    /// Loads the manifest checkpoint from the property folder, or starts a
    /// fresh one.
    pub fn load_or_new(folder: &Path, address: &str) -> Result<Self> {
        match atomic::read_document(&folder.join("manifest.json"))? {
            Some(manifest) => Ok(manifest),
            None => Ok(ImageManifest::new(address)),
        }
    }

    pub fn save(&self, folder: &Path) -> Result<()> {
        atomic::write_document(&folder.join("manifest.json"), self)
    }

    pub fn next_seq(&self) -> u32 {
        self.images.len() as u32 + 1
    }

    pub fn source_complete(&self, source: &str) -> bool {
        self.completed_sources.iter().any(|s| s == source)
    }

    pub fn mark_source_complete(&mut self, source: &str) {
        if !self.source_complete(source) {
            self.completed_sources.push(source.to_string());
        }
    }
}
