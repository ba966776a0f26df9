use crate::pipeline::decrypt::KeyMaterial;
use async_trait::async_trait;
use oculux_common::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// A viewer's wrapped key as stored in the viewing-access map: `<iv>|<key>`.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub iv: String,
    pub key: String,
}

impl FromStr for WrappedKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (iv, key) = s
            .split_once('|')
            .ok_or_else(|| Error::resolution("wrapped key is not of the form <iv>|<key>"))?;
        Ok(Self {
            iv: iv.to_string(),
            key: key.to_string(),
        })
    }
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedKey")
            .field("iv", &format_args!("<{} chars>", self.iv.len()))
            .field("key", &format_args!("<{} chars>", self.key.len()))
            .finish()
    }
}

/// Turns a wrapped key into usable key material. Called once per session.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<KeyMaterial>;
}

/// Key provider for networks that store keys as plain hex.
#[derive(Debug, Default, Clone, Copy)]
pub struct HexKeyProvider;

#[async_trait]
impl KeyProvider for HexKeyProvider {
    async fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<KeyMaterial> {
        KeyMaterial::from_hex(&wrapped.iv, &wrapped.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_wrapped_key() {
        let wrapped: WrappedKey = "00ff|aa55".parse().unwrap();
        assert_eq!(wrapped.iv, "00ff");
        assert_eq!(wrapped.key, "aa55");
        assert_matches!("no-separator".parse::<WrappedKey>(), Err(Error::Resolution(_)));
    }

    #[test]
    fn test_debug_hides_values() {
        let wrapped: WrappedKey = "00ff|aa55".parse().unwrap();
        assert!(!format!("{wrapped:?}").contains("aa55"));
    }

    #[tokio::test]
    async fn test_hex_provider() {
        let wrapped = WrappedKey {
            iv: "01".repeat(12),
            key: "02".repeat(32),
        };
        let material = HexKeyProvider.unwrap_key(&wrapped).await.unwrap();
        assert_eq!(material.iv(), &[1u8; 12]);

        let bad = WrappedKey {
            iv: "01".repeat(12),
            key: "zz".into(),
        };
        assert_matches!(HexKeyProvider.unwrap_key(&bad).await, Err(Error::Resolution(_)));
    }
}
