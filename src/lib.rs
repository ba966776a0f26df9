//! Oculux - confidential media streaming over HTTP range requests
//!
//! This library crate exposes the streaming pipeline for the CLI and for
//! integration testing.

pub mod config;
pub mod events;
pub mod pipeline;
pub mod resolve;
pub mod sink;
pub mod transport;
