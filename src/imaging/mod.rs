//! Image identity and storage: perceptual hashing, the banded LSH index
//! for near-duplicate lookup, and per-property image manifests.

pub mod hash;
pub mod lsh;
pub mod manifest;

pub use hash::{difference_hash, hamming, perceptual_hash};
pub use lsh::{HashEntry, HashIndex, IndexStats};
pub use manifest::{address_hash, standardize_image, ImageManifest, ImageRecord};
