use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{PipelineError, Result};

/// Appends a suffix to the file name, e.g. `work_items.json` ->
/// `work_items.json.tmp`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Writes a document with the temp-then-rename discipline. The previous
/// version is retained as `<path>.bak` until the next successful write.
pub fn write_document<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = with_suffix(path, ".tmp");
    let bak = with_suffix(path, ".bak");

    let bytes = serde_json::to_vec_pretty(doc)?;
    let mut file = File::create(&tmp)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);

    if path.exists() {
        fs::copy(path, &bak)?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Writes raw bytes with the same temp-then-rename discipline (no backup;
/// used for image payloads, which are never rewritten).
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = with_suffix(path, ".tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a document, tolerating a corrupt primary by falling back to the
/// backup. Returns `Ok(None)` when neither file exists yet; both present
/// but unreadable is a fatal [`PipelineError::CorruptState`].
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bak = with_suffix(path, ".bak");
    match try_read(path) {
        Ok(Some(doc)) => Ok(Some(doc)),
        Ok(None) => match try_read(&bak) {
            Ok(doc) => Ok(doc),
            Err(err) => Err(PipelineError::CorruptState(format!(
                "{}: primary missing and backup unreadable: {err}",
                path.display()
            ))),
        },
        Err(primary_err) => {
            warn!(
                path = %path.display(),
                error = %primary_err,
                "state file unreadable, falling back to backup"
            );
            match try_read(&bak) {
                Ok(Some(doc)) => Ok(Some(doc)),
                _ => Err(PipelineError::CorruptState(format!(
                    "{}: primary and backup both unreadable: {primary_err}",
                    path.display()
                ))),
            }
        }
    }
}

fn try_read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}
