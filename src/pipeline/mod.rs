//! The streaming decrypt-and-demux pipeline.
//!
//! ```text
//! fetch ─▶ frame ─▶ decrypt ─▶ feed ─▶ scheduler ─▶ sink
//!   ▲                                      │
//!   └──────── backpressure ◀───────────────┘
//! ```
//!
//! [`controller::PipelineController`] drives one session through these
//! stages and handles seeks by superseding the live fetch run.

pub mod controller;
pub mod decrypt;
pub mod feed;
pub mod fetch;
pub mod frame;
pub mod scheduler;
pub mod seek;
pub mod token;

pub use controller::{PipelineController, PipelineSettings, SessionDeps, SessionHandle};
pub use decrypt::{
    decrypt_frame, seal_stream, AesGcmCipher, FrameCipher, IdentityCipher, KeyMaterial,
    DEFAULT_SEAL_FRAME_LEN,
};
pub use feed::FeedAdapter;
pub use fetch::{FetchLoop, FetchOptions, RunOutcome};
pub use frame::{encode_frame, FrameReader};
pub use scheduler::TrackScheduler;
pub use seek::{FrameIndex, SeekLocator, StreamPosition};
pub use token::SessionToken;

use oculux_common::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Run `fut` under a read timeout, mapping expiry to [`Error::Timeout`].
pub(crate) async fn timed<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout(timeout))?
}
