//! Locator resolution: from `jkl://owner/path` to download URLs and an
//! access decision.

mod keys;
mod locator;
mod manifest;

pub use keys::{HexKeyProvider, KeyProvider, WrappedKey};
pub use locator::{merkle_path, owner_address, sha256_hex, viewer_key, Locator, LookupKeys};
pub use manifest::{ManifestEntry, ManifestResolver};

use async_trait::async_trait;
use oculux_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Value in the viewing-access map that marks unencrypted content.
const PUBLIC_ACCESS: &str = "public";

/// File-tree metadata for one stored object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRecord {
    /// Content hash the providers serve the object under.
    pub merkle_hex: String,
    /// Provider base URLs, in preference order.
    #[serde(default)]
    pub providers: Vec<String>,
    pub tracking_number: String,
    /// Viewer key to `"public"` or a wrapped `<iv>|<key>`.
    #[serde(default)]
    pub viewing_access: HashMap<String, String>,
}

impl FileRecord {
    /// `<provider>/download/<merkle_hex>` for every provider.
    pub fn download_urls(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| format!("{}/download/{}", p.trim_end_matches('/'), self.merkle_hex))
            .collect()
    }

    /// Access granted to `viewer`.
    pub fn access_for(&self, viewer: &str) -> Result<Access> {
        let key = viewer_key(&self.tracking_number, viewer);
        match self.viewing_access.get(&key) {
            None => Err(Error::resolution(format!("{viewer} is not an authorized viewer"))),
            Some(value) if value == PUBLIC_ACCESS => Ok(Access::Public),
            Some(value) => Ok(Access::Private(value.parse()?)),
        }
    }
}

/// How the object's bytes can be played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Plain media; the player can use the URL directly.
    Public,
    /// Framed ciphertext; needs the key.
    Private(WrappedKey),
}

/// Outcome of resolving a locator.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub locator: Locator,
    pub download_urls: Vec<String>,
    pub access: Access,
}

/// File-tree lookup service.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn lookup(&self, keys: &LookupKeys) -> Result<FileRecord>;
}

/// Resolve `locator` for `viewer` (the owner when `None`).
pub async fn resolve(
    resolver: &dyn MetadataResolver,
    locator: &str,
    viewer: Option<&str>,
) -> Result<Resolved> {
    let locator: Locator = locator.parse()?;
    let keys = LookupKeys::for_locator(&locator);
    tracing::debug!(%locator, address = %keys.address, "Looking up file");

    let record = resolver.lookup(&keys).await?;
    let download_urls = record.download_urls();
    if download_urls.is_empty() {
        return Err(Error::resolution(format!("no providers store {locator}")));
    }

    let viewer = viewer.unwrap_or(&locator.owner);
    let access = record.access_for(viewer)?;
    tracing::info!(
        %locator,
        providers = download_urls.len(),
        private = matches!(access, Access::Private(_)),
        "Locator resolved"
    );

    Ok(Resolved {
        locator,
        download_urls,
        access,
    })
}
