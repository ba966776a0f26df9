//! Per-track segment queues in front of the media sink.
//!
//! Each track has one queue and at most one append in flight. Appends run
//! on spawned tasks; when one completes, the task marks its track idle and
//! drains the next segment. Waiters (backpressure, end of stream) are woken
//! through a [`Notify`].

use crate::sink::TrackSink;
use oculux_common::{Error, TrackId};
use oculux_media::MediaSegment;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// How often waiters re-check sinks that reported busy on their own.
const BUSY_RECHECK: Duration = Duration::from_millis(50);

struct TrackQueue {
    pending: VecDeque<MediaSegment>,
    appending: bool,
    sink: Arc<dyn TrackSink>,
}

struct Inner {
    queues: Mutex<HashMap<TrackId, TrackQueue>>,
    error: Mutex<Option<Error>>,
    notify: Notify,
}

/// Serializes appends per track and tracks how much is queued.
#[derive(Clone)]
pub struct TrackScheduler {
    inner: Arc<Inner>,
}

impl Default for TrackScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                error: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Register the sink for a track. Re-registering replaces the sink and
    /// drops anything still queued for it.
    pub fn add_track(&self, track: TrackId, sink: Arc<dyn TrackSink>) {
        self.inner.queues.lock().insert(
            track,
            TrackQueue {
                pending: VecDeque::new(),
                appending: false,
                sink,
            },
        );
    }

    /// Registered tracks.
    pub fn tracks(&self) -> Vec<TrackId> {
        let mut tracks: Vec<_> = self.inner.queues.lock().keys().copied().collect();
        tracks.sort();
        tracks
    }

    /// Queue a segment behind everything already pending for its track.
    pub fn enqueue(&self, track: TrackId, segment: MediaSegment) {
        let mut queues = self.inner.queues.lock();
        match queues.get_mut(&track) {
            Some(queue) => queue.pending.push_back(segment),
            None => tracing::warn!(%track, "Dropping segment for unregistered track"),
        }
    }

    /// Start the next append for `track` unless one is already running.
    pub fn drain_if_idle(&self, track: TrackId) {
        self.inner.drain(track);
    }

    /// Segments queued across all tracks, not counting in-flight appends.
    pub fn pending_len(&self) -> usize {
        self.inner
            .queues
            .lock()
            .values()
            .map(|q| q.pending.len())
            .sum()
    }

    /// Drop every queued segment. Appends already in flight finish normally.
    pub fn clear_pending(&self) {
        let mut dropped = 0;
        for queue in self.inner.queues.lock().values_mut() {
            dropped += queue.pending.len();
            queue.pending.clear();
        }
        if dropped > 0 {
            tracing::debug!(dropped, "Cleared pending segments");
        }
        self.inner.notify.notify_waiters();
    }

    /// The first append failure, if any. Taking it clears it.
    pub fn take_error(&self) -> Option<Error> {
        self.inner.error.lock().take()
    }

    fn has_error(&self) -> bool {
        self.inner.error.lock().is_some()
    }

    /// Wait until fewer than `high_water` segments are queued, or an append
    /// has failed.
    pub async fn wait_for_capacity(&self, high_water: usize) {
        self.wait_until(|s| s.pending_len() < high_water).await;
    }

    /// Wait until every queue is empty and no append is in flight, or an
    /// append has failed.
    pub async fn wait_idle(&self) {
        self.wait_until(|s| s.is_idle()).await;
    }

    fn is_idle(&self) -> bool {
        self.inner
            .queues
            .lock()
            .values()
            .all(|q| q.pending.is_empty() && !q.appending)
    }

    async fn wait_until(&self, ready: impl Fn(&Self) -> bool) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if ready(self) || self.has_error() {
                return;
            }

            if tokio::time::timeout(BUSY_RECHECK, notified).await.is_err() {
                self.inner.drain_all();
            }
        }
    }
}

impl Inner {
    fn drain(self: &Arc<Self>, track: TrackId) {
        let (segment, sink) = {
            let mut queues = self.queues.lock();
            let Some(queue) = queues.get_mut(&track) else {
                return;
            };
            if queue.appending || queue.pending.is_empty() || queue.sink.is_busy() {
                return;
            }
            let Some(segment) = queue.pending.pop_front() else {
                return;
            };
            queue.appending = true;
            (segment, queue.sink.clone())
        };

        let inner = self.clone();
        tokio::spawn(async move {
            let result = sink.append(segment).await;
            inner.complete(track, result);
        });
    }

    fn drain_all(self: &Arc<Self>) {
        let tracks: Vec<TrackId> = self.queues.lock().keys().copied().collect();
        for track in tracks {
            self.drain(track);
        }
    }

    fn complete(self: &Arc<Self>, track: TrackId, result: oculux_common::Result<()>) {
        {
            let mut queues = self.queues.lock();
            if let Some(queue) = queues.get_mut(&track) {
                queue.appending = false;
                if result.is_err() {
                    queue.pending.clear();
                }
            }
        }

        match result {
            Ok(()) => self.drain(track),
            Err(err) => {
                tracing::error!(%track, error = %err, "Segment append failed");
                let mut error = self.error.lock();
                if error.is_none() {
                    *error = Some(match err {
                        Error::Container(_) => err,
                        other => Error::container(other.to_string()),
                    });
                }
            }
        }

        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use oculux_media::SegmentKind;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Sink that records appends and detects overlapping calls.
    #[derive(Default)]
    struct RecordingSink {
        active: AtomicUsize,
        max_active: AtomicUsize,
        appended: Mutex<Vec<Bytes>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl TrackSink for RecordingSink {
        async fn append(&self, segment: MediaSegment) -> oculux_common::Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.appended.lock().push(segment.data);
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::transport("sink rejected segment"));
            }
            Ok(())
        }
    }

    fn segment(track: TrackId, n: u8) -> MediaSegment {
        MediaSegment {
            track,
            kind: SegmentKind::Media,
            data: Bytes::from(vec![n]),
            start_secs: 0.0,
        }
    }

    #[tokio::test]
    async fn test_single_append_in_flight_and_ordered() {
        let scheduler = TrackScheduler::new();
        let sink = Arc::new(RecordingSink::default());
        let track = TrackId::new(1);
        scheduler.add_track(track, sink.clone());

        for n in 0..20 {
            scheduler.enqueue(track, segment(track, n));
            scheduler.drain_if_idle(track);
            if n % 3 == 0 {
                tokio::task::yield_now().await;
            }
        }
        scheduler.wait_idle().await;

        assert_eq!(sink.max_active.load(Ordering::SeqCst), 1);
        let appended: Vec<u8> = sink.appended.lock().iter().map(|b| b[0]).collect();
        assert_eq!(appended, (0..20).collect::<Vec<u8>>());
        assert!(scheduler.take_error().is_none());
    }

    #[tokio::test]
    async fn test_tracks_drain_independently() {
        let scheduler = TrackScheduler::new();
        let video = Arc::new(RecordingSink::default());
        let audio = Arc::new(RecordingSink::default());
        scheduler.add_track(TrackId::new(1), video.clone());
        scheduler.add_track(TrackId::new(2), audio.clone());

        for n in 0..5 {
            for id in [1, 2] {
                let track = TrackId::new(id);
                scheduler.enqueue(track, segment(track, n));
                scheduler.drain_if_idle(track);
            }
        }
        scheduler.wait_idle().await;

        assert_eq!(video.appended.lock().len(), 5);
        assert_eq!(audio.appended.lock().len(), 5);
        assert_eq!(scheduler.tracks(), vec![TrackId::new(1), TrackId::new(2)]);
    }

    #[tokio::test]
    async fn test_capacity_released_as_appends_complete() {
        let scheduler = TrackScheduler::new();
        let track = TrackId::new(1);
        scheduler.add_track(track, Arc::new(RecordingSink::default()));

        for n in 0..10 {
            scheduler.enqueue(track, segment(track, n));
        }
        assert_eq!(scheduler.pending_len(), 10);
        scheduler.drain_if_idle(track);

        tokio::time::timeout(Duration::from_secs(5), scheduler.wait_for_capacity(3))
            .await
            .unwrap();
        assert!(scheduler.pending_len() < 3);
    }

    #[tokio::test]
    async fn test_clear_pending() {
        let scheduler = TrackScheduler::new();
        let track = TrackId::new(1);
        scheduler.add_track(track, Arc::new(RecordingSink::default()));
        for n in 0..4 {
            scheduler.enqueue(track, segment(track, n));
        }
        scheduler.clear_pending();
        assert_eq!(scheduler.pending_len(), 0);
        scheduler.wait_idle().await;
    }

    #[tokio::test]
    async fn test_append_failure_is_reported_once() {
        let scheduler = TrackScheduler::new();
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let track = TrackId::new(1);
        scheduler.add_track(track, sink.clone());

        for n in 0..3 {
            scheduler.enqueue(track, segment(track, n));
        }
        scheduler.drain_if_idle(track);
        scheduler.wait_idle().await;

        let err = scheduler.take_error().unwrap();
        assert!(matches!(err, Error::Container(_)));
        assert!(scheduler.take_error().is_none());
        assert_eq!(sink.appended.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_track_is_dropped() {
        let scheduler = TrackScheduler::new();
        let track = TrackId::new(7);
        scheduler.enqueue(track, segment(track, 0));
        assert_eq!(scheduler.pending_len(), 0);
    }
}
