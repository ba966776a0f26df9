//! Ranged fetch loop with read timeouts and provider retries.

use super::decrypt::{decrypt_frame, FrameCipher};
use super::feed::FeedAdapter;
use super::frame::{FrameReader, HEADER_LEN};
use super::scheduler::TrackScheduler;
use super::seek::{FrameIndex, StreamPosition};
use super::timed;
use super::token::SessionToken;
use crate::transport::{RangeResponse, RangeTransport};
use futures::StreamExt;
use oculux_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Fetch tuning.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Limit on each individual body read.
    pub read_timeout: Duration,
    /// Retries after a transport or timeout failure; `None` retries forever.
    pub max_provider_retries: Option<u32>,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Reads pause while this many segments wait for the sink.
    pub high_water_segments: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            max_provider_retries: None,
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(10),
            high_water_segments: 64,
        }
    }
}

impl FetchOptions {
    /// Whether a failure on zero-based `attempt` may be retried.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.max_provider_retries.map_or(true, |max| attempt < max)
    }

    /// Backoff before retry number `attempt + 1`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.retry_delay
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }
}

/// How a fetch run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The body ended cleanly and the feed was flushed.
    Completed { bytes: u64 },
    /// A seek moved the session token on; the run stopped early.
    Superseded,
}

/// Streams frames from storage providers into a [`FeedAdapter`].
pub struct FetchLoop {
    transport: Arc<dyn RangeTransport>,
    cipher: Arc<dyn FrameCipher>,
    index: FrameIndex,
    options: FetchOptions,
}

impl FetchLoop {
    pub fn new(
        transport: Arc<dyn RangeTransport>,
        cipher: Arc<dyn FrameCipher>,
        index: FrameIndex,
        options: FetchOptions,
    ) -> Self {
        Self {
            transport,
            cipher,
            index,
            options,
        }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// One ranged GET from `position` to the end of the object.
    ///
    /// `position` advances past every frame fed, so after a failure it is
    /// the frame boundary to resume from. `own` is the token generation
    /// this run belongs to.
    pub async fn run(
        &self,
        feed: &mut FeedAdapter,
        url: &str,
        position: &mut StreamPosition,
        own: u64,
        token: &SessionToken,
    ) -> Result<RunOutcome> {
        let start = *position;
        tracing::debug!(
            url,
            cipher_offset = start.cipher_offset,
            decoded_offset = start.decoded_offset,
            "Fetch run starting"
        );
        if !token.is_current(own) {
            return Ok(RunOutcome::Superseded);
        }

        let RangeResponse {
            content_length,
            mut body,
        } = timed(
            self.options.read_timeout,
            self.transport.open(url, start.cipher_offset),
        )
        .await?;

        let scheduler = feed.scheduler().clone();
        let high_water = self.options.high_water_segments;
        let mut reader = FrameReader::new();
        let mut received = 0u64;

        loop {
            if !token.is_current(own) {
                tracing::debug!(url, cipher_offset = position.cipher_offset, "Fetch run superseded");
                return Ok(RunOutcome::Superseded);
            }

            if !pause_for_capacity(&scheduler, high_water, own, token).await {
                return Ok(RunOutcome::Superseded);
            }
            if let Some(err) = scheduler.take_error() {
                return Err(err);
            }

            let chunk = timed(self.options.read_timeout, async {
                body.next().await.transpose()
            })
            .await?;
            let Some(chunk) = chunk else {
                break;
            };

            if !token.is_current(own) {
                tracing::debug!(url, cipher_offset = position.cipher_offset, "Fetch run superseded");
                return Ok(RunOutcome::Superseded);
            }

            received += chunk.len() as u64;
            reader.push(&chunk);

            while let Some(frame) = reader.next_frame()? {
                let plaintext = decrypt_frame(self.cipher.as_ref(), &frame)?;
                let next = StreamPosition {
                    cipher_offset: position.cipher_offset + (HEADER_LEN + frame.len()) as u64,
                    decoded_offset: position.decoded_offset + plaintext.len() as u64,
                };
                if !plaintext.is_empty() {
                    feed.feed(&plaintext, position.decoded_offset).await?;
                }
                self.index.record(*position, next);
                *position = next;

                // A single chunk may carry many frames.
                if !pause_for_capacity(&scheduler, high_water, own, token).await {
                    return Ok(RunOutcome::Superseded);
                }
            }
        }

        if reader.has_partial() {
            return Err(Error::transport(format!(
                "body ended inside a frame at offset {} ({} bytes buffered)",
                position.cipher_offset,
                reader.buffered()
            )));
        }
        if received < content_length {
            return Err(Error::transport(format!(
                "body ended after {received} of {content_length} bytes"
            )));
        }

        feed.flush()?;
        if let Some(err) = scheduler.take_error() {
            return Err(err);
        }

        let bytes = position.cipher_offset - start.cipher_offset;
        tracing::info!(url, bytes, "Fetch run complete");
        Ok(RunOutcome::Completed { bytes })
    }

    /// [`run`](Self::run), retried across `providers` on transport and
    /// timeout failures. Each retry resumes from the last complete frame,
    /// and `position` is left there when this returns.
    pub async fn run_with_retries(
        &self,
        feed: &mut FeedAdapter,
        providers: &[String],
        position: &mut StreamPosition,
        own: u64,
        token: &SessionToken,
    ) -> Result<RunOutcome> {
        if providers.is_empty() {
            return Err(Error::resolution("no storage providers for object"));
        }

        let mut attempt = 0u32;
        loop {
            let url = &providers[attempt as usize % providers.len()];
            match self.run(feed, url, position, own, token).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retryable() && self.options.allows_retry(attempt) => {
                    let delay = self.options.delay_for_attempt(attempt);
                    attempt += 1;
                    tracing::warn!(
                        url = %url,
                        attempt,
                        error = %err,
                        resume_from = position.cipher_offset,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.superseded(own) => return Ok(RunOutcome::Superseded),
                    }
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::error!(attempts = attempt + 1, error = %err, "Fetch retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Wait while `high_water` segments are queued. Returns `false` if the run
/// was superseded meanwhile.
async fn pause_for_capacity(
    scheduler: &TrackScheduler,
    high_water: usize,
    own: u64,
    token: &SessionToken,
) -> bool {
    if scheduler.pending_len() < high_water {
        return true;
    }
    tracing::trace!(pending = scheduler.pending_len(), high_water, "Pausing reads");
    tokio::select! {
        _ = scheduler.wait_for_capacity(high_water) => true,
        _ = token.superseded(own) => false,
    }
}
