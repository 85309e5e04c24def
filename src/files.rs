//! File/object-storage collaborator.
//!
//! The core tracks identity and metadata of session attachments (name, size,
//! recording flag); raw bytes live with the storage backend and are never
//! held after upload.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::stt::AudioBlob;

/// Metadata for a stored session attachment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub size_bytes: u64,
    pub is_recording: bool,
    pub path: String,
    pub uploaded_at: DateTime<Utc>,
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn upload(
        &self,
        session_id: Uuid,
        blob: &AudioBlob,
        is_recording: bool,
    ) -> CoreResult<StoredFile>;

    async fn list(&self, session_id: Uuid) -> CoreResult<Vec<StoredFile>>;

    async fn delete(&self, id: Uuid, path: &str) -> CoreResult<()>;

    async fn download_url(&self, path: &str) -> CoreResult<String>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// Metadata-only storage for development and tests. Bytes are dropped after
/// upload, matching the contract of the production backend.
#[derive(Default)]
pub struct MemoryFileStorage {
    files: Mutex<HashMap<Uuid, StoredFile>>,
}

impl MemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    async fn upload(
        &self,
        session_id: Uuid,
        blob: &AudioBlob,
        is_recording: bool,
    ) -> CoreResult<StoredFile> {
        let id = Uuid::new_v4();
        let file = StoredFile {
            id,
            session_id,
            name: blob.file_name.clone(),
            size_bytes: blob.bytes.len() as u64,
            is_recording,
            path: format!("sessions/{}/{}", session_id, blob.file_name),
            uploaded_at: Utc::now(),
        };
        let mut files = self
            .files
            .lock()
            .map_err(|_| CoreError::external("storage", "lock poisoned"))?;
        files.insert(id, file.clone());
        Ok(file)
    }

    async fn list(&self, session_id: Uuid) -> CoreResult<Vec<StoredFile>> {
        let files = self
            .files
            .lock()
            .map_err(|_| CoreError::external("storage", "lock poisoned"))?;
        let mut out: Vec<StoredFile> = files
            .values()
            .filter(|f| f.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by_key(|f| f.uploaded_at);
        Ok(out)
    }

    async fn delete(&self, id: Uuid, _path: &str) -> CoreResult<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| CoreError::external("storage", "lock poisoned"))?;
        files
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("file", id.to_string()))
    }

    async fn download_url(&self, path: &str) -> CoreResult<String> {
        Ok(format!("memory://{}", path))
    }
}
