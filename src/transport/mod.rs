//! Ranged HTTP access to storage providers.

mod http;

pub use http::HttpTransport;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use oculux_common::Result;
use std::fmt;

/// Body of a ranged response, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// An open ranged response. The body starts at the requested offset.
pub struct RangeResponse {
    /// Declared length of the body (never zero).
    pub content_length: u64,
    pub body: ByteStream,
}

impl fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Byte-range reads against one object URL.
#[async_trait]
pub trait RangeTransport: Send + Sync {
    /// Stream the object from `start` to its end.
    async fn open(&self, url: &str, start: u64) -> Result<RangeResponse>;

    /// Read at most `len` bytes at `start`. Returns fewer bytes, possibly
    /// none, when the object ends first.
    async fn probe(&self, url: &str, start: u64, len: u64) -> Result<Bytes>;
}
