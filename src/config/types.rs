use crate::pipeline::{FetchOptions, PipelineSettings};
use oculux_media::SegmentOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl Config {
    /// Session tuning derived from this config.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            fetch: self.fetch_options(),
            segments: SegmentOptions {
                fragments_per_segment: self.buffer.fragments_per_segment,
            },
            viewer: self.resolver.viewer.clone(),
        }
    }

    /// Manifest path with `~` expanded.
    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.resolver
            .manifest
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned()))
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            read_timeout: Duration::from_secs(self.fetch.read_timeout_secs),
            max_provider_retries: self.fetch.max_provider_retries,
            retry_delay: Duration::from_millis(self.fetch.retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.fetch.max_retry_delay_ms),
            high_water_segments: self.buffer.high_water_segments,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Limit on each body read, in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Retries after transport or timeout failures (unset = unlimited)
    #[serde(default)]
    pub max_provider_retries: Option<u32>,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,
}

fn default_read_timeout() -> u64 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_retry_delay() -> u64 {
    500
}
fn default_max_retry_delay() -> u64 {
    10_000
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_provider_retries: None,
            retry_delay_ms: default_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Reads pause while this many segments wait for the sink
    #[serde(default = "default_high_water")]
    pub high_water_segments: usize,

    /// Fragments grouped into one appended segment
    #[serde(default = "default_fragments_per_segment")]
    pub fragments_per_segment: usize,
}

fn default_high_water() -> usize {
    64
}
fn default_fragments_per_segment() -> usize {
    1
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            high_water_segments: default_high_water(),
            fragments_per_segment: default_fragments_per_segment(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// JSON manifest of file records
    #[serde(default)]
    pub manifest: Option<PathBuf>,

    /// Viewer to check access for (defaults to the locator's owner)
    #[serde(default)]
    pub viewer: Option<String>,
}
