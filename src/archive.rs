use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive already finalized")]
    Finalized,
    #[error("archive encoding failed: {0}")]
    Encode(String),
}

/// A finished, downloadable file.
#[derive(Debug, Clone)]
pub struct ExportDownload {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Accumulates named artifacts and packages them into one container.
pub trait ArchiveSink: Send + Sync {
    fn append(&mut self, name: &str, bytes: Vec<u8>) -> Result<(), ArchiveError>;
    fn finalize(&mut self) -> Result<ExportDownload, ArchiveError>;
    /// Drops everything appended so far.
    fn discard(&mut self);
    fn entry_names(&self) -> Vec<String>;
    fn len(&self) -> usize;
    /// Bytes of entry bodies still held in memory.
    fn retained_bytes(&self) -> usize;
}

/// In-memory sink that finalizes into a JSON bundle with base64 entry bodies.
/// Entry bodies are released on finalize; only their names are kept.
#[derive(Debug)]
pub struct BundleArchive {
    label: String,
    names: Vec<String>,
    bodies: Vec<Vec<u8>>,
    finalized: bool,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct BundleManifest<'a> {
    label: &'a str,
    created_at: DateTime<Utc>,
    finalized_at: DateTime<Utc>,
    entry_count: usize,
    entries: Vec<BundleEntry<'a>>,
}

#[derive(Serialize)]
struct BundleEntry<'a> {
    name: &'a str,
    size: usize,
    data: String,
}

impl BundleArchive {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            names: Vec::new(),
            bodies: Vec::new(),
            finalized: false,
            created_at: Utc::now(),
        }
    }

    fn unique_name(&self, name: &str) -> String {
        if !self.names.iter().any(|existing| existing == name) {
            return name.to_string();
        }
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{ext}")),
            None => (name, String::new()),
        };
        (2..)
            .map(|n| format!("{stem}-{n}{ext}"))
            .find(|candidate| !self.names.iter().any(|existing| existing == candidate))
            .unwrap_or_else(|| name.to_string())
    }
}

impl ArchiveSink for BundleArchive {
    fn append(&mut self, name: &str, bytes: Vec<u8>) -> Result<(), ArchiveError> {
        if self.finalized {
            return Err(ArchiveError::Finalized);
        }
        let name = self.unique_name(name);
        self.names.push(name);
        self.bodies.push(bytes);
        Ok(())
    }

    fn finalize(&mut self) -> Result<ExportDownload, ArchiveError> {
        if self.finalized {
            return Err(ArchiveError::Finalized);
        }
        let manifest = BundleManifest {
            label: &self.label,
            created_at: self.created_at,
            finalized_at: Utc::now(),
            entry_count: self.names.len(),
            entries: self
                .names
                .iter()
                .zip(&self.bodies)
                .map(|(name, bytes)| BundleEntry {
                    name,
                    size: bytes.len(),
                    data: STANDARD.encode(bytes),
                })
                .collect(),
        };
        let bytes =
            serde_json::to_vec(&manifest).map_err(|err| ArchiveError::Encode(err.to_string()))?;
        self.finalized = true;
        self.bodies = Vec::new();
        Ok(ExportDownload {
            file_name: format!("{}.bundle.json", self.label),
            content_type: "application/json",
            bytes,
        })
    }

    fn discard(&mut self) {
        self.names.clear();
        self.bodies.clear();
    }

    fn entry_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn len(&self) -> usize {
        self.names.len()
    }

    fn retained_bytes(&self) -> usize {
        self.bodies.iter().map(Vec::len).sum()
    }
}
