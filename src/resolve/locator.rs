//! Locator parsing and file-tree lookup keys.

use oculux_common::{Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const SCHEME: &str = "jkl://";

/// A `jkl://<owner>/<path>` media locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub owner: String,
    pub path: String,
}

impl FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .trim()
            .strip_prefix(SCHEME)
            .ok_or_else(|| {
                Error::resolution(format!(
                    "invalid locator {s:?}: expected {SCHEME}<owner>/<path>"
                ))
            })?;
        let (owner, path) = rest
            .split_once('/')
            .ok_or_else(|| Error::resolution(format!("invalid locator {s:?}: missing path")))?;
        if owner.is_empty() || path.is_empty() {
            return Err(Error::resolution(format!(
                "invalid locator {s:?}: owner and path must be non-empty"
            )));
        }
        Ok(Self {
            owner: owner.to_string(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.owner, self.path)
    }
}

/// Keys a file record is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupKeys {
    pub address: String,
    pub owner_address: String,
}

impl LookupKeys {
    pub fn for_locator(locator: &Locator) -> Self {
        let address = merkle_path(&format!("s/ulid/{}", locator.path));
        let owner_address = owner_address(&address, &locator.owner);
        Self {
            address,
            owner_address,
        }
    }
}

/// Lowercase hex SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Fold `/`-separated segments into a chained hash:
/// `acc = sha256_hex(acc + sha256_hex(segment))`, starting from `""`.
pub fn merkle_path(path: &str) -> String {
    path.split('/').fold(String::new(), |acc, segment| {
        sha256_hex(&format!("{acc}{}", sha256_hex(segment)))
    })
}

/// Owner-scoped address: `sha256_hex("o" + address + sha256_hex(owner))`.
pub fn owner_address(address: &str, owner: &str) -> String {
    sha256_hex(&format!("o{address}{}", sha256_hex(owner)))
}

/// Viewing-access key for a viewer: `sha256_hex("v" + tracking + viewer)`.
pub fn viewer_key(tracking_number: &str, viewer: &str) -> String {
    sha256_hex(&format!("v{tracking_number}{viewer}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_locator() {
        let locator: Locator = "jkl://jkl1owner/videos/clip.mp4".parse().unwrap();
        assert_eq!(locator.owner, "jkl1owner");
        assert_eq!(locator.path, "videos/clip.mp4");
        assert_eq!(locator.to_string(), "jkl://jkl1owner/videos/clip.mp4");
    }

    #[test]
    fn test_invalid_locators() {
        for bad in ["", "http://x/y", "jkl://", "jkl://owner", "jkl://owner/", "jkl:///path"] {
            assert_matches!(bad.parse::<Locator>(), Err(Error::Resolution(_)), "{bad:?}");
        }
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_merkle_path_chains_segments() {
        let one = sha256_hex(&sha256_hex("s"));
        assert_eq!(merkle_path("s"), one);

        let two = sha256_hex(&format!("{one}{}", sha256_hex("ulid")));
        assert_eq!(merkle_path("s/ulid"), two);
        assert_ne!(merkle_path("s/ulid/a"), merkle_path("s/ulid/b"));
    }

    #[test]
    fn test_lookup_keys_are_deterministic() {
        let locator: Locator = "jkl://owner/a/b".parse().unwrap();
        let keys = LookupKeys::for_locator(&locator);
        assert_eq!(keys, LookupKeys::for_locator(&locator));
        assert_eq!(keys.address, merkle_path("s/ulid/a/b"));
        assert_eq!(keys.owner_address, owner_address(&keys.address, "owner"));
        assert_eq!(keys.address.len(), 64);
    }
}
