use super::{RangeResponse, RangeTransport};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use oculux_common::{Error, Result};
use reqwest::header::RANGE;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

/// [`RangeTransport`] over reqwest.
///
/// One client is built per session and reused for every range request so
/// connections stay warm between the stream and seek probes.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn send(&self, url: &str, range: String) -> Result<Response> {
        self.client
            .get(url)
            .header(RANGE, range)
            .send()
            .await
            .map_err(|e| Error::transport(format!("request to {url} failed: {e}")))
    }
}

/// Map a response status onto the session error taxonomy.
fn check_status(url: &str, status: StatusCode) -> Result<()> {
    match status {
        StatusCode::OK | StatusCode::PARTIAL_CONTENT => Ok(()),
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::NOT_FOUND
        | StatusCode::GONE => Err(Error::resolution(format!("{url} returned {status}"))),
        _ => Err(Error::transport(format!("{url} returned {status}"))),
    }
}

#[async_trait]
impl RangeTransport for HttpTransport {
    async fn open(&self, url: &str, start: u64) -> Result<RangeResponse> {
        let response = self.send(url, format!("bytes={start}-")).await?;
        if start > 0 && response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            tracing::debug!(url, start, "Range starts at end of object");
            return Ok(RangeResponse {
                content_length: 0,
                body: Box::pin(futures::stream::empty()),
            });
        }
        check_status(url, response.status())?;

        let content_length = response
            .content_length()
            .filter(|&len| len > 0)
            .ok_or_else(|| Error::transport(format!("{url} returned no content length")))?;

        tracing::debug!(url, start, content_length, status = %response.status(), "Range opened");

        let body = response
            .bytes_stream()
            .map_err(|e| Error::transport(format!("body read failed: {e}")));
        Ok(RangeResponse {
            content_length,
            body: Box::pin(body),
        })
    }

    async fn probe(&self, url: &str, start: u64, len: u64) -> Result<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }

        let range = format!("bytes={}-{}", start, start + len - 1);
        let mut response = self.send(url, range).await?;
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            // Probe starts at or past the end of the object.
            return Ok(Bytes::new());
        }
        check_status(url, response.status())?;

        let mut out = BytesMut::new();
        while (out.len() as u64) < len {
            match response
                .chunk()
                .await
                .map_err(|e| Error::transport(format!("probe read failed: {e}")))?
            {
                Some(chunk) => out.extend_from_slice(&chunk),
                None => break,
            }
        }
        out.truncate(len as usize);
        Ok(out.freeze())
    }
}
