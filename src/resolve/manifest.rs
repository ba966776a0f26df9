use super::{FileRecord, LookupKeys, MetadataResolver};
use async_trait::async_trait;
use oculux_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One file-tree entry in a manifest.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManifestEntry {
    pub address: String,
    pub owner_address: String,
    #[serde(flatten)]
    pub record: FileRecord,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct Manifest {
    #[serde(default)]
    files: Vec<ManifestEntry>,
}

/// Resolver backed by a JSON manifest of file records.
///
/// ```json
/// { "files": [ { "address": "…", "owner_address": "…", "merkle_hex": "…",
///                "providers": ["https://provider"], "tracking_number": "…",
///                "viewing_access": { "<viewer key>": "public" } } ] }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManifestResolver {
    entries: Vec<ManifestEntry>,
}

impl ManifestResolver {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    /// Read a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::resolution(format!("failed to read manifest {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
            .map_err(|e| Error::resolution(format!("manifest {}: {e}", path.display())))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(json)
            .map_err(|e| Error::resolution(format!("invalid manifest: {e}")))?;
        Ok(Self::new(manifest.files))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MetadataResolver for ManifestResolver {
    async fn lookup(&self, keys: &LookupKeys) -> Result<FileRecord> {
        self.entries
            .iter()
            .find(|e| e.address == keys.address && e.owner_address == keys.owner_address)
            .map(|e| e.record.clone())
            .ok_or_else(|| Error::resolution(format!("file {} not found", keys.address)))
    }
}
