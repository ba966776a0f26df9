//! Per-frame AES-GCM decryption.
//!
//! Every frame of an object is sealed with the same key and the same IV.
//! That is a property of the stored format and is reproduced as-is.

use super::frame::encode_frame;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::{Aes128, Aes256};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use oculux_common::{Error, Result};
use std::fmt;

/// GCM authentication tag appended to every sealed frame.
pub const TAG_LEN: usize = 16;

/// Symmetric key and IV for one object.
#[derive(Clone)]
pub struct KeyMaterial {
    iv: Vec<u8>,
    key: Vec<u8>,
}

impl KeyMaterial {
    /// Validate and wrap raw key material.
    ///
    /// The IV must be 12 bytes (16 is accepted for older uploads) and the
    /// key 16 or 32 bytes.
    pub fn new(iv: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Result<Self> {
        let iv = iv.into();
        let key = key.into();
        if !matches!(iv.len(), 12 | 16) {
            return Err(Error::resolution(format!(
                "IV must be 12 or 16 bytes, got {}",
                iv.len()
            )));
        }
        if !matches!(key.len(), 16 | 32) {
            return Err(Error::resolution(format!(
                "key must be 16 or 32 bytes, got {}",
                key.len()
            )));
        }
        Ok(Self { iv, key })
    }

    /// Parse hex-encoded IV and key.
    pub fn from_hex(iv: &str, key: &str) -> Result<Self> {
        let iv = hex::decode(iv.trim())
            .map_err(|e| Error::resolution(format!("invalid IV hex: {e}")))?;
        let key = hex::decode(key.trim())
            .map_err(|e| Error::resolution(format!("invalid key hex: {e}")))?;
        Self::new(iv, key)
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("iv", &hex::encode(&self.iv))
            .field("key", &format_args!("<{} bytes redacted>", self.key.len()))
            .finish()
    }
}

/// Decrypts individual frame bodies.
pub trait FrameCipher: Send + Sync {
    /// Authenticate and decrypt one frame body.
    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Decoded size of a frame body of `cipher_len` bytes.
    fn plaintext_len(&self, cipher_len: u64) -> u64;
}

enum Inner {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
    Aes128LongIv(AesGcm<Aes128, U16>),
    Aes256LongIv(AesGcm<Aes256, U16>),
}

/// AES-GCM with a fixed per-object IV.
pub struct AesGcmCipher {
    iv: Vec<u8>,
    inner: Inner,
}

impl AesGcmCipher {
    pub fn new(material: &KeyMaterial) -> Result<Self> {
        let key = material.key.as_slice();
        let invalid = |_| Error::resolution("invalid AES key length");
        let inner = match (material.key.len(), material.iv.len()) {
            (16, 12) => Inner::Aes128(Aes128Gcm::new_from_slice(key).map_err(invalid)?),
            (32, 12) => Inner::Aes256(Aes256Gcm::new_from_slice(key).map_err(invalid)?),
            (16, 16) => Inner::Aes128LongIv(AesGcm::new_from_slice(key).map_err(invalid)?),
            (32, 16) => Inner::Aes256LongIv(AesGcm::new_from_slice(key).map_err(invalid)?),
            (k, n) => {
                return Err(Error::resolution(format!(
                    "unsupported key/IV sizes: {k}/{n} bytes"
                )))
            }
        };
        Ok(Self {
            iv: material.iv.clone(),
            inner,
        })
    }

    /// Encrypt one frame body with the session IV.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv = self.iv.as_slice();
        let sealed = match &self.inner {
            Inner::Aes128(c) => c.encrypt(GenericArray::from_slice(iv), plaintext),
            Inner::Aes256(c) => c.encrypt(GenericArray::from_slice(iv), plaintext),
            Inner::Aes128LongIv(c) => c.encrypt(GenericArray::from_slice(iv), plaintext),
            Inner::Aes256LongIv(c) => c.encrypt(GenericArray::from_slice(iv), plaintext),
        };
        sealed.map_err(|_| Error::decrypt("encryption failed"))
    }
}

impl FrameCipher for AesGcmCipher {
    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let iv = self.iv.as_slice();
        let opened = match &self.inner {
            Inner::Aes128(c) => c.decrypt(GenericArray::from_slice(iv), ciphertext),
            Inner::Aes256(c) => c.decrypt(GenericArray::from_slice(iv), ciphertext),
            Inner::Aes128LongIv(c) => c.decrypt(GenericArray::from_slice(iv), ciphertext),
            Inner::Aes256LongIv(c) => c.decrypt(GenericArray::from_slice(iv), ciphertext),
        };
        opened.map_err(|_| {
            Error::decrypt(format!(
                "authentication failed for {}-byte frame",
                ciphertext.len()
            ))
        })
    }

    fn plaintext_len(&self, cipher_len: u64) -> u64 {
        cipher_len.saturating_sub(TAG_LEN as u64)
    }
}

/// Pass-through cipher for unencrypted fixtures.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCipher;

impl FrameCipher for IdentityCipher {
    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }

    fn plaintext_len(&self, cipher_len: u64) -> u64 {
        cipher_len
    }
}

/// Decrypt one frame.
///
/// Empty frames decode to nothing without touching the cipher; the
/// storage layer emits them as padding.
pub fn decrypt_frame(cipher: &dyn FrameCipher, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() {
        return Ok(Vec::new());
    }
    cipher.open(ciphertext)
}

/// Plaintext bytes per frame when sealing a whole object.
pub const DEFAULT_SEAL_FRAME_LEN: usize = 32 * 1024;

/// Split `plaintext` into frames of at most `frame_len` bytes, seal each
/// one and lay them out in the wire format.
pub fn seal_stream(cipher: &AesGcmCipher, plaintext: &[u8], frame_len: usize) -> Result<Vec<u8>> {
    if frame_len == 0 {
        return Err(Error::framing("frame length must be non-zero"));
    }
    let mut out = Vec::with_capacity(plaintext.len() + plaintext.len() / frame_len * 32 + 32);
    for chunk in plaintext.chunks(frame_len) {
        out.extend_from_slice(&encode_frame(&cipher.seal(chunk)?)?);
    }
    Ok(out)
}
