//! Session lifecycle: resolve, stream, seek, complete or fail.

use super::decrypt::{AesGcmCipher, FrameCipher};
use super::feed::FeedAdapter;
use super::fetch::{FetchLoop, FetchOptions, RunOutcome};
use super::scheduler::TrackScheduler;
use super::seek::{FrameIndex, SeekLocator, StreamPosition};
use super::token::SessionToken;
use crate::events::{PlaybackSource, SessionEvent, SessionEvents};
use crate::resolve::{self, Access, KeyProvider, MetadataResolver};
use crate::sink::MediaSink;
use crate::transport::RangeTransport;
use oculux_common::{Error, Result, SessionId, SessionState};
use oculux_media::{Demuxer, SegmentOptions};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Collaborators a session is built from.
pub struct SessionDeps {
    pub transport: Arc<dyn RangeTransport>,
    pub resolver: Arc<dyn MetadataResolver>,
    pub keys: Arc<dyn KeyProvider>,
    pub sink: Arc<dyn MediaSink>,
    pub demuxer: Box<dyn Demuxer>,
}

/// Per-session tuning.
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub fetch: FetchOptions,
    pub segments: SegmentOptions,
    /// Viewer to check access for; the locator's owner when `None`.
    pub viewer: Option<String>,
}

/// Control surface for a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    token: SessionToken,
    seeks: mpsc::UnboundedSender<f64>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Request playback from `time_secs`. The live fetch run is superseded
    /// immediately. Returns `false` once the session has finished.
    pub fn seek(&self, time_secs: f64) -> bool {
        if self.seeks.send(time_secs).is_err() {
            tracing::warn!(session = %self.id, time_secs, "Seek after session ended");
            return false;
        }
        let generation = self.token.bump();
        tracing::debug!(session = %self.id, time_secs, generation, "Seek requested");
        true
    }

    /// Wait for `Completed` or `Failed`.
    pub async fn finished(&self) -> SessionState {
        let mut state = self.state.clone();
        let result = state.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        // A dropped controller never reports; treat it as failed.
        result.unwrap_or(SessionState::Failed)
    }
}

/// Drives one playback session.
pub struct PipelineController {
    id: SessionId,
    locator: String,
    transport: Arc<dyn RangeTransport>,
    resolver: Arc<dyn MetadataResolver>,
    keys: Arc<dyn KeyProvider>,
    sink: Arc<dyn MediaSink>,
    demuxer: Option<Box<dyn Demuxer>>,
    settings: PipelineSettings,
    events: Arc<SessionEvents>,
    token: SessionToken,
    seeks: mpsc::UnboundedReceiver<f64>,
    state: watch::Sender<SessionState>,
}

impl PipelineController {
    pub fn new(
        locator: impl Into<String>,
        deps: SessionDeps,
        settings: PipelineSettings,
        events: Arc<SessionEvents>,
    ) -> (Self, SessionHandle) {
        let id = SessionId::new();
        let token = SessionToken::new();
        let (seek_tx, seek_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let handle = SessionHandle {
            id,
            token: token.clone(),
            seeks: seek_tx,
            state: state_rx,
        };
        let controller = Self {
            id,
            locator: locator.into(),
            transport: deps.transport,
            resolver: deps.resolver,
            keys: deps.keys,
            sink: deps.sink,
            demuxer: Some(deps.demuxer),
            settings,
            events,
            token,
            seeks: seek_rx,
            state: state_tx,
        };
        (controller, handle)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn spawn(self) -> JoinHandle<SessionState> {
        tokio::spawn(self.run())
    }

    /// Run the session to a terminal state. Failures are reported as a
    /// single `Error` event, not returned.
    pub async fn run(mut self) -> SessionState {
        let span = tracing::info_span!("session", id = %self.id, locator = %self.locator);
        let result = self.resolve_and_stream().instrument(span).await;
        self.seeks.close();

        match result {
            Ok(()) => {
                self.set_state(SessionState::Completed);
                self.emit(SessionEvent::Completed);
                tracing::info!(session = %self.id, "Session completed");
            }
            Err(err) => {
                tracing::error!(session = %self.id, kind = %err.kind(), error = %err, "Session failed");
                self.set_state(SessionState::Failed);
                self.emit(SessionEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                });
            }
        }
        *self.state.borrow()
    }

    async fn resolve_and_stream(&mut self) -> Result<()> {
        self.set_state(SessionState::Resolving);
        let resolved = resolve::resolve(
            self.resolver.as_ref(),
            &self.locator,
            self.settings.viewer.as_deref(),
        )
        .await?;

        let wrapped = match resolved.access {
            Access::Public => {
                let url = resolved.download_urls[0].clone();
                tracing::info!(%url, "Public content, playing directly");
                self.emit(SessionEvent::ReadyToPlay {
                    source: PlaybackSource::Direct { url },
                });
                return Ok(());
            }
            Access::Private(wrapped) => wrapped,
        };

        let material = self.keys.unwrap_key(&wrapped).await?;
        let cipher: Arc<dyn FrameCipher> = Arc::new(AesGcmCipher::new(&material)?);
        self.emit(SessionEvent::ReadyToPlay {
            source: PlaybackSource::Pipeline,
        });

        self.stream(&resolved.download_urls, cipher).await
    }

    async fn stream(&mut self, providers: &[String], cipher: Arc<dyn FrameCipher>) -> Result<()> {
        let demuxer = self
            .demuxer
            .take()
            .ok_or_else(|| Error::container("session demuxer already in use"))?;
        let index = FrameIndex::new();
        let fetch = FetchLoop::new(
            self.transport.clone(),
            cipher.clone(),
            index.clone(),
            self.settings.fetch.clone(),
        );
        let locator = SeekLocator::new(
            self.transport.clone(),
            cipher,
            index,
            self.settings.fetch.read_timeout,
        );
        let scheduler = TrackScheduler::new();
        let mut feed = FeedAdapter::new(
            demuxer,
            self.sink.clone(),
            scheduler.clone(),
            self.settings.segments,
        );

        let mut position = StreamPosition::START;
        self.set_state(SessionState::Streaming);

        loop {
            // Read before draining so a seek queued while seeking supersedes this pass.
            let own = self.token.current();
            // Only the latest queued seek matters.
            let mut pending = None;
            while let Ok(time_secs) = self.seeks.try_recv() {
                pending = Some(time_secs);
            }

            if let Some(time_secs) = pending {
                self.set_state(SessionState::Seeking);
                scheduler.clear_pending();
                let target = feed.seek_offset(time_secs).unwrap_or(0);
                position = locate_on_any(&locator, providers, target).await?;
                feed.restart_at(position.decoded_offset);
                tracing::info!(
                    time_secs,
                    target,
                    cipher_offset = position.cipher_offset,
                    decoded_offset = position.decoded_offset,
                    "Resuming after seek"
                );
                self.set_state(SessionState::Streaming);
            }

            let outcome = fetch
                .run_with_retries(&mut feed, providers, &mut position, own, &self.token)
                .await?;
            match outcome {
                // Either a seek is queued, or the run resumes where it stopped.
                RunOutcome::Superseded => continue,
                RunOutcome::Completed { bytes } => {
                    tracing::debug!(bytes, "Waiting for track queues to drain");
                    tokio::select! {
                        _ = scheduler.wait_idle() => {}
                        // Seeking back is still possible until the sink has everything.
                        _ = self.token.superseded(own) => continue,
                    }
                    if let Some(err) = scheduler.take_error() {
                        return Err(err);
                    }
                    self.sink.end_of_stream().await?;
                    return Ok(());
                }
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::info!(session = %self.id, from = %previous, to = %state, "Session state");
            self.emit(SessionEvent::StateChanged { state });
        }
    }

    fn emit(&self, payload: SessionEvent) {
        self.events.emit(self.id, payload);
    }
}

/// Locate `target` on the first provider that answers.
async fn locate_on_any(
    locator: &SeekLocator,
    providers: &[String],
    target: u64,
) -> Result<StreamPosition> {
    let mut last = None;
    for url in providers {
        match locator.locate(url, target).await {
            Ok(position) => return Ok(position),
            Err(err) if err.is_retryable() => {
                tracing::warn!(%url, error = %err, "Seek probe failed, trying next provider");
                last = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last.unwrap_or_else(|| Error::resolution("no storage providers for object")))
}
