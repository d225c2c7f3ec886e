//! Blob and record storage.
//!
//! The pipeline only needs two narrow interfaces: [`BlobStore`] for slide
//! images (put + time-limited URL) and [`RecordStore`] for presentation
//! records and reports keyed by code. Hosted deployments plug in their own
//! object store and database; the implementations here back the CLI and the
//! tests.
//!
//! | Type                | Backing                         |
//! |---------------------|---------------------------------|
//! | [`FsBlobStore`]     | files under a root directory    |
//! | [`MemoryBlobStore`] | a `HashMap`, for tests          |
//! | [`JsonRecordStore`] | one pretty-printed JSON per code|

use crate::error::{DeckCoachError, PersistenceError, StorageError};
use crate::output::{PresentationRecord, Report};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Object storage for slide images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError>;

    /// A URL granting read access to `key` for `ttl`.
    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Keys are relative `/`-separated paths without `..` or empty segments.
fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

fn expires_at(ttl: Duration) -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .saturating_add(ttl)
        .as_secs()
}

/// Blobs as files under `root`; URLs are `file://` with an `expires` stamp.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let io_err = |source| StorageError::Put {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(io_err)?;
        debug!("Stored {} ({} bytes, {})", key, bytes.len(), content_type);
        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }
        let abs = std::path::absolute(&path).unwrap_or(path);
        Ok(format!("file://{}?expires={}", abs.display(), expires_at(ttl)))
    }
}

/// In-memory [`BlobStore`].
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes and content type for `key`.
    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.lock().get(key).cloned()
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Vec<u8>, String)>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.lock()
            .insert(key.to_string(), (bytes.to_vec(), content_type.to_string()));
        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        if !self.lock().contains_key(key) {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(format!("memory://{}?expires={}", key, expires_at(ttl)))
    }
}

// ── Records ──────────────────────────────────────────────────────────────

/// Persistence for presentation records and reports, keyed by code.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store a new presentation. Fails with [`PersistenceError::Conflict`]
    /// when the code is already taken; records are never overwritten.
    async fn save_presentation(&self, record: &PresentationRecord) -> Result<(), PersistenceError>;
    async fn load_presentation(&self, code: &str) -> Result<PresentationRecord, PersistenceError>;
    /// Store a report, replacing an earlier one for the same code.
    async fn save_report(&self, report: &Report) -> Result<(), PersistenceError>;
    async fn load_report(&self, code: &str) -> Result<Report, PersistenceError>;
}

/// `<root>/presentations/<CODE>.json` and `<root>/reports/<CODE>.json`.
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    root: PathBuf,
}

impl JsonRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, kind: &str, code: &str) -> Result<PathBuf, PersistenceError> {
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PersistenceError::NotFound(code.to_string()));
        }
        Ok(self.root.join(kind).join(format!("{code}.json")))
    }

    async fn write<T: Serialize + Sync>(
        &self,
        kind: &str,
        code: &str,
        value: &T,
        replace: bool,
    ) -> Result<(), PersistenceError> {
        let path = self.path(kind, code)?;
        let json = serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Serde {
            code: code.to_string(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| PersistenceError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let written = if replace {
            tokio::fs::write(&path, json).await
        } else {
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(mut file) => match file.write_all(&json).await {
                    Ok(()) => file.flush().await,
                    Err(e) => Err(e),
                },
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    return Err(PersistenceError::Conflict(code.to_string()));
                }
                Err(e) => Err(e),
            }
        };
        written.map_err(|source| PersistenceError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Saved {}", path.display());
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, kind: &str, code: &str) -> Result<T, PersistenceError> {
        let path = self.path(kind, code)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(code.to_string()))
            }
            Err(source) => return Err(PersistenceError::Io { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Serde {
            code: code.to_string(),
            source,
        })
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn save_presentation(&self, record: &PresentationRecord) -> Result<(), PersistenceError> {
        self.write("presentations", &record.code, record, false).await
    }

    async fn load_presentation(&self, code: &str) -> Result<PresentationRecord, PersistenceError> {
        self.read("presentations", code).await
    }

    async fn save_report(&self, report: &Report) -> Result<(), PersistenceError> {
        self.write("reports", &report.code, report, true).await
    }

    async fn load_report(&self, code: &str) -> Result<Report, PersistenceError> {
        self.read("reports", code).await
    }
}

/// Load a presentation record and replace its image keys with signed URLs.
/// Images that cannot be signed are left out.
pub async fn signed_presentation(
    records: &dyn RecordStore,
    blobs: &dyn BlobStore,
    code: &str,
    ttl: Duration,
) -> Result<PresentationRecord, DeckCoachError> {
    let mut record = records
        .load_presentation(code)
        .await
        .map_err(|e| DeckCoachError::from_lookup("presentation", e))?;
    let mut signed = std::collections::BTreeMap::new();
    for (page, key) in std::mem::take(&mut record.slide_images) {
        match blobs.signed_url(&key, ttl).await {
            Ok(url) => {
                signed.insert(page, url);
            }
            Err(e) => warn!("Slide {}: {}", page, e),
        }
    }
    record.slide_images = signed;
    Ok(record)
}
