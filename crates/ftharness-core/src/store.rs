//! SSOT store: locked, atomic read/modify/write of the harness JSON files.
//!
//! Every document on disk is UTF-8 pretty-printed JSON with a trailing LF.
//! Writers go through [`mutate`], which holds an exclusive advisory lock on
//! a sibling `<file>.lock` for the whole load/transform/write cycle, so two
//! processes mutating the same path serialize. Readers never see a partial
//! image: the write lands via tempfile + rename.

use crate::error::{HarnessError, Result};
use chrono::{DateTime, Timelike, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Timestamps persist as RFC-3339 UTC at whole-second precision.
pub fn utc_now() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(0).unwrap_or(now)
}

// ---------------------------------------------------------------------------
// Raw writes
// ---------------------------------------------------------------------------

/// Land `data` at `path` without ever exposing a torn file: the bytes are
/// staged in a temp file inside the target directory, flushed to disk, and
/// renamed over the destination. Missing parent directories are created.
pub fn write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut staged = tempfile::Builder::new()
        .prefix(".ft-stage-")
        .tempfile_in(parent)?;
    staged.write_all(data)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Seed a file that must not clobber operator edits: writes only when
/// `path` is absent. Returns whether anything was written.
pub fn seed_file(path: &Path, data: &[u8]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    write_bytes(path, data)?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// PathLock
// ---------------------------------------------------------------------------

/// Exclusive advisory lock scoped to one SSOT file path.
///
/// The lock lives on a sibling `<file>.lock` so the data file itself can be
/// atomically replaced while the lock is held. Released on drop; the OS
/// releases it on process death.
pub struct PathLock {
    file: File,
}

impl PathLock {
    pub fn acquire(target: &Path) -> Result<Self> {
        let lock_path = lock_path_for(target);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    name.push_str(".lock");
    target.with_file_name(name)
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load a JSON document. `NotFound` if the file is absent, `Corrupt` if it
/// does not parse into `T` (missing required keys included).
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = match std::fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(HarnessError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&data).map_err(|e| HarnessError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Serialize and atomically persist a document: pretty JSON, trailing LF.
pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut data = serde_json::to_vec_pretty(value).map_err(|e| HarnessError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    data.push(b'\n');
    write_bytes(path, &data)
}

/// Load, transform, and rewrite a document under the path's exclusive lock.
///
/// The transform is pure over the in-memory document; if it errors nothing
/// is written. The post-image re-serializes through `T`, which is the
/// schema check: a transform cannot persist a shape `T` does not admit.
/// Returns the post-image.
pub fn mutate<T, F>(path: &Path, transform: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut T) -> Result<()>,
{
    let _lock = PathLock::acquire(path)?;
    let mut doc: T = load(path)?;
    transform(&mut doc)?;
    save(path, &doc)?;
    Ok(doc)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
