//! Oculux-Common: Shared types and the session error taxonomy.
//!
//! This crate provides common functionality used across oculux:
//!
//! - **Error Handling**: one error type whose variants mirror the failure
//!   classes a playback session can report, plus a retry classification
//! - **Typed IDs**: track and session identifiers
//! - **Core Types**: track kinds and the session state machine states
//!
//! # Examples
//!
//! ```
//! use oculux_common::{Error, ErrorKind, TrackId, TrackKind};
//!
//! let track = TrackId::new(1);
//! assert_eq!(TrackKind::from_handler(*b"vide"), TrackKind::Video);
//!
//! let err = Error::transport("HTTP 500");
//! assert_eq!(err.kind(), ErrorKind::Transport);
//! assert!(err.is_retryable());
//! # let _ = track;
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use ids::*;
pub use types::*;
