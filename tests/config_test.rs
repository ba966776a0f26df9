//! Config files driving a real session.

mod common;

use std::io::Write;
use std::sync::Arc;

use common::*;
use oculux::config::{load_config, load_config_or_default};
use oculux::resolve::ManifestResolver;
use oculux::sink::{ChannelSink, SinkEvent};
use oculux_common::SessionState;
use tempfile::NamedTempFile;
use wiremock::MockServer;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn manifest_from_config_drives_session() {
    let server = MockServer::start().await;
    let (_, sealed) = sealed_movie(2);
    serve_object(&server, sealed).await;

    let manifest = write_manifest(&[manifest_entry(vec![server.uri()], "jkl1viewer", &private_access())]);
    let config_file = write_config(&format!(
        r#"
[fetch]
read_timeout_secs = 2
max_provider_retries = 1
retry_delay_ms = 10
max_retry_delay_ms = 10

[buffer]
high_water_segments = 4

[resolver]
manifest = "{}"
viewer = "jkl1viewer"
"#,
        manifest.path().display()
    ));

    let config = load_config(config_file.path()).unwrap();
    let resolver = ManifestResolver::load(&config.manifest_path().unwrap()).unwrap();
    assert_eq!(resolver.len(), 1);

    let settings = config.pipeline_settings();
    assert_eq!(settings.fetch.high_water_segments, 4);
    assert_eq!(settings.viewer.as_deref(), Some("jkl1viewer"));

    let (sink, mut rx) = ChannelSink::new(16);
    let (controller, _handle, _events) = http_session(&resolver, Arc::new(sink), settings);
    assert_eq!(controller.run().await, SessionState::Completed);

    let mut last = None;
    while let Some(event) = rx.recv().await {
        last = Some(event);
    }
    assert!(matches!(last, Some(SinkEvent::EndOfStream)));
}

#[tokio::test]
async fn default_viewer_is_rejected_by_viewer_scoped_manifest() {
    let manifest = write_manifest(&[manifest_entry(
        vec!["http://127.0.0.1:9".into()],
        "jkl1viewer",
        &private_access(),
    )]);
    let config_file = write_config(&format!(
        "[resolver]\nmanifest = \"{}\"\n",
        manifest.path().display()
    ));

    let config = load_config_or_default(Some(config_file.path())).unwrap();
    let resolver = ManifestResolver::load(&config.manifest_path().unwrap()).unwrap();
    let (sink, _rx) = ChannelSink::new(1);
    let (controller, _handle, _events) =
        http_session(&resolver, Arc::new(sink), config.pipeline_settings());

    assert_eq!(controller.run().await, SessionState::Failed);
}

#[test]
fn unknown_keys_are_ignored_and_sections_default() {
    let file = write_config("[fetch]\nread_timeout_secs = 7\nunknown = true\n");
    let config = load_config(file.path()).unwrap();
    assert_eq!(config.fetch.read_timeout_secs, 7);
    assert_eq!(config.buffer.high_water_segments, 64);
    assert!(config.manifest_path().is_none());
}

#[test]
fn invalid_manifest_json_fails_to_load() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"{ not json").unwrap();
    assert!(ManifestResolver::load(file.path()).is_err());
}
