//! Shared test harness for integration tests.
//!
//! [`Fixture`] seals a generated fragmented MP4, serves it from a
//! `wiremock` server that honours `Range` headers, and writes a resolver
//! manifest pointing at it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use oculux::config::Config;
use oculux::events::SessionEvents;
use oculux::pipeline::{
    seal_stream, AesGcmCipher, KeyMaterial, PipelineController, PipelineSettings, SessionDeps,
    SessionHandle,
};
use oculux::resolve::{
    viewer_key, FileRecord, HexKeyProvider, LookupKeys, ManifestEntry, ManifestResolver,
};
use oculux::sink::MediaSink;
use oculux::transport::HttpTransport;
use oculux_media::fmp4::writer;
use oculux_media::Fmp4Demuxer;
use tempfile::NamedTempFile;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const LOCATOR: &str = "jkl://jkl1owner/videos/clip.mp4";
pub const OWNER: &str = "jkl1owner";
pub const MERKLE: &str = "c0ffee";
pub const TRACKING: &str = "1234";
pub const IV_HEX: &str = "0102030405060708090a0b0c";
pub const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f";
pub const FRAME_LEN: usize = 256;

/// Serves `bytes=<start>-[<end>]` ranges of a fixed body.
pub struct RangeResponder {
    body: Vec<u8>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body }
    }
}

fn parse_range(request: &Request) -> Option<(usize, Option<usize>)> {
    let value = request.headers.get("range")?.to_str().ok()?;
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = start.parse().ok()?;
    let end = if end.is_empty() { None } else { Some(end.parse().ok()?) };
    Some((start, end))
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let len = self.body.len();
        let Some((start, end)) = parse_range(request) else {
            return ResponseTemplate::new(200).set_body_bytes(self.body.clone());
        };
        if start >= len {
            return ResponseTemplate::new(416).insert_header("content-range", format!("bytes */{len}"));
        }
        let end = end.map_or(len - 1, |e| e.min(len - 1));
        ResponseTemplate::new(206)
            .insert_header("content-range", format!("bytes {start}-{end}/{len}"))
            .set_body_bytes(self.body[start..=end].to_vec())
    }
}

pub fn key_material() -> KeyMaterial {
    KeyMaterial::from_hex(IV_HEX, KEY_HEX).unwrap()
}

/// The plaintext movie and its sealed wire form.
pub fn sealed_movie(fragments: usize) -> (Vec<u8>, Vec<u8>) {
    let movie = writer::write_sample_movie(fragments);
    let cipher = AesGcmCipher::new(&key_material()).unwrap();
    let sealed = seal_stream(&cipher, &movie, FRAME_LEN).unwrap();
    (movie, sealed)
}

pub fn download_path() -> String {
    format!("/download/{MERKLE}")
}

/// Mount the sealed object on `server`.
pub async fn serve_object(server: &MockServer, sealed: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(download_path()))
        .respond_with(RangeResponder::new(sealed))
        .mount(server)
        .await;
}

/// Manifest record with one viewing-access entry for `viewer`.
pub fn manifest_entry(providers: Vec<String>, viewer: &str, access: &str) -> ManifestEntry {
    let keys = LookupKeys::for_locator(&LOCATOR.parse().unwrap());
    let mut viewing_access = HashMap::new();
    viewing_access.insert(viewer_key(TRACKING, viewer), access.to_string());
    ManifestEntry {
        address: keys.address,
        owner_address: keys.owner_address,
        record: FileRecord {
            merkle_hex: MERKLE.into(),
            providers,
            tracking_number: TRACKING.into(),
            viewing_access,
        },
    }
}

pub fn private_access() -> String {
    format!("{IV_HEX}|{KEY_HEX}")
}

/// Write a manifest file holding `entries`.
pub fn write_manifest(entries: &[ManifestEntry]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    let json = serde_json::json!({ "files": entries });
    file.write_all(json.to_string().as_bytes()).unwrap();
    file
}

/// Settings with short timeouts and bounded retries.
pub fn fast_settings() -> PipelineSettings {
    let mut config = Config::default();
    config.fetch.read_timeout_secs = 2;
    config.fetch.max_provider_retries = Some(2);
    config.fetch.retry_delay_ms = 10;
    config.fetch.max_retry_delay_ms = 20;
    config.pipeline_settings()
}

/// A session over HTTP against `manifest`.
pub fn http_session(
    manifest: &ManifestResolver,
    sink: Arc<dyn MediaSink>,
    settings: PipelineSettings,
) -> (PipelineController, SessionHandle, Arc<SessionEvents>) {
    let deps = SessionDeps {
        transport: Arc::new(HttpTransport::new(Duration::from_secs(2)).unwrap()),
        resolver: Arc::new(manifest.clone()),
        keys: Arc::new(HexKeyProvider),
        sink,
        demuxer: Box::new(Fmp4Demuxer::new()),
    };
    let events = Arc::new(SessionEvents::default());
    let (controller, handle) = PipelineController::new(LOCATOR, deps, settings, events.clone());
    (controller, handle, events)
}
