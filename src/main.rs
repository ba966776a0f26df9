mod cli;

use oculux::{
    config,
    events::{PlaybackSource, SessionEvent, SessionEvents},
    pipeline::{
        seal_stream, AesGcmCipher, FrameIndex, KeyMaterial, PipelineController, SeekLocator,
        SessionDeps,
    },
    resolve::{
        self, Access, HexKeyProvider, KeyProvider, Locator, LookupKeys, ManifestResolver,
        MetadataResolver,
    },
    sink::WriterSink,
    transport::HttpTransport,
};
use oculux_common::{SessionState, TrackId};
use oculux_media::Fmp4Demuxer;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "oculux=trace,oculux_media=debug,oculux_common=debug,reqwest=debug".to_string()
        } else {
            "oculux=info,oculux_media=info".to_string()
        }
    });

    // Media may be written to stdout, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Play {
            locator,
            seek,
            track,
            output,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(play(
                &locator,
                cli.config.as_deref(),
                seek,
                track,
                output.as_deref(),
            ))
        }
        Commands::Locate { locator, time } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(locate(&locator, cli.config.as_deref(), time))
        }
        Commands::Lookup { locator, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(lookup(&locator, cli.config.as_deref(), json))
        }
        Commands::Seal {
            input,
            iv,
            key,
            frame_len,
            output,
        } => seal(&input, &iv, &key, frame_len, output.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("oculux {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn build_resolver(config: &config::Config) -> Result<Arc<ManifestResolver>> {
    let path = config
        .manifest_path()
        .context("No resolver manifest configured (set [resolver] manifest)")?;
    let resolver = ManifestResolver::load(&path)?;
    tracing::debug!("Loaded {} file records from {:?}", resolver.len(), path);
    Ok(Arc::new(resolver))
}

fn build_transport(config: &config::Config) -> Result<Arc<HttpTransport>> {
    let transport = HttpTransport::new(Duration::from_secs(config.fetch.connect_timeout_secs))?;
    Ok(Arc::new(transport))
}

async fn play(
    locator: &str,
    config_path: Option<&Path>,
    seek: Option<f64>,
    track: Option<u32>,
    output: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    let writer: Box<dyn AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create output file: {:?}", path))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };
    let sink = Arc::new(WriterSink::new(writer, track.map(TrackId::new)));

    let deps = SessionDeps {
        transport: build_transport(&config)?,
        resolver: build_resolver(&config)?,
        keys: Arc::new(HexKeyProvider),
        sink: sink.clone(),
        demuxer: Box::new(Fmp4Demuxer::new()),
    };
    let events = Arc::new(SessionEvents::default());
    let mut rx = events.subscribe();
    let (controller, handle) =
        PipelineController::new(locator, deps, config.pipeline_settings(), events.clone());

    tracing::info!("Starting session {} for {}", handle.id(), locator);
    let session = controller.spawn();

    if let Some(time_secs) = seek {
        let handle = handle.clone();
        let mut selected = sink.watch_selected();
        tokio::spawn(async move {
            // The seek table exists once the container is ready.
            tokio::select! {
                Ok(_) = selected.wait_for(Option::is_some) => {
                    handle.seek(time_secs);
                }
                state = handle.finished() => {
                    tracing::debug!("Session ended in state {} before seeking", state);
                }
            }
        });
    }

    let mut failure = None;
    loop {
        match rx.recv().await {
            Ok(event) => match event.payload {
                SessionEvent::ReadyToPlay {
                    source: PlaybackSource::Direct { url },
                } => {
                    eprintln!("Content is public, play it directly: {}", url);
                }
                SessionEvent::Error { kind, message } => failure = Some((kind, message)),
                SessionEvent::Completed => break,
                _ => {}
            },
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Missed {} session events", skipped);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
        if failure.is_some() {
            break;
        }
    }

    let state = session.await.context("Session task panicked")?;
    match (state, failure) {
        (SessionState::Completed, _) => Ok(()),
        (_, Some((kind, message))) => anyhow::bail!("Playback failed ({}): {}", kind, message),
        (state, None) => anyhow::bail!("Playback ended in state {}", state),
    }
}

async fn locate(locator: &str, config_path: Option<&Path>, time_secs: f64) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let resolver = build_resolver(&config)?;
    let transport = build_transport(&config)?;

    let viewer = config.resolver.viewer.as_deref();
    let resolved = resolve::resolve(resolver.as_ref(), locator, viewer).await?;
    let wrapped = match resolved.access {
        Access::Public => {
            println!("{} is public; seek in the player directly", resolved.locator);
            return Ok(());
        }
        Access::Private(wrapped) => wrapped,
    };
    let material = HexKeyProvider.unwrap_key(&wrapped).await?;
    let seek = SeekLocator::new(
        transport,
        Arc::new(AesGcmCipher::new(&material)?),
        FrameIndex::new(),
        Duration::from_secs(config.fetch.read_timeout_secs),
    );

    let mut last_error = None;
    for url in &resolved.download_urls {
        let mut demuxer = Fmp4Demuxer::new();
        match seek.locate_time(&mut demuxer, url, time_secs).await {
            Ok((target, position)) => {
                let report = serde_json::json!({
                    "time_secs": time_secs,
                    "target_decoded_offset": target,
                    "resume": position,
                    "url": url,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!("Locate failed on {}: {}", url, e);
                last_error = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    match last_error {
        Some(e) => Err(e.into()),
        None => anyhow::bail!("No storage providers for {}", locator),
    }
}

async fn lookup(locator: &str, config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let parsed: Locator = locator.parse()?;
    let keys = LookupKeys::for_locator(&parsed);

    let record = match config.manifest_path() {
        Some(_) => Some(build_resolver(&config)?.lookup(&keys).await?),
        None => None,
    };
    let viewer = config.resolver.viewer.clone().unwrap_or_else(|| parsed.owner.clone());
    let access = record.as_ref().map(|r| match r.access_for(&viewer) {
        Ok(Access::Public) => "public".to_string(),
        Ok(Access::Private(_)) => "private".to_string(),
        Err(e) => e.to_string(),
    });

    if json {
        let report = serde_json::json!({
            "locator": parsed.to_string(),
            "keys": keys,
            "record": record,
            "download_urls": record.as_ref().map(|r| r.download_urls()),
            "viewer": viewer,
            "access": access,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Locator: {}", parsed);
    println!("Address: {}", keys.address);
    println!("Owner address: {}", keys.owner_address);
    match record {
        Some(record) => {
            println!("Merkle: {}", record.merkle_hex);
            println!("Tracking number: {}", record.tracking_number);
            println!("Providers: {}", record.providers.len());
            for url in record.download_urls() {
                println!("  {}", url);
            }
            if let Some(access) = access {
                println!("Access for {}: {}", viewer, access);
            }
        }
        None => println!("No resolver manifest configured; record not looked up"),
    }
    Ok(())
}

fn seal(input: &Path, iv: &str, key: &str, frame_len: usize, output: Option<&Path>) -> Result<()> {
    let plaintext =
        std::fs::read(input).with_context(|| format!("Failed to read input file: {:?}", input))?;
    let material = KeyMaterial::from_hex(iv, key)?;
    let cipher = AesGcmCipher::new(&material)?;
    let sealed = seal_stream(&cipher, &plaintext, frame_len)?;

    match output {
        Some(path) => std::fs::write(path, &sealed)
            .with_context(|| format!("Failed to write output file: {:?}", path))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&sealed)?;
            stdout.flush()?;
        }
    }
    tracing::info!(
        "Sealed {} bytes into {} bytes ({} byte frames)",
        plaintext.len(),
        sealed.len(),
        frame_len
    );
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_config(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            print_config(&config::Config::default());
        }
    }

    Ok(())
}

fn print_config(config: &config::Config) {
    println!("  Read timeout: {}s", config.fetch.read_timeout_secs);
    println!("  Connect timeout: {}s", config.fetch.connect_timeout_secs);
    match config.fetch.max_provider_retries {
        Some(n) => println!("  Provider retries: {}", n),
        None => println!("  Provider retries: unlimited"),
    }
    println!("  High-water mark: {} segments", config.buffer.high_water_segments);
    println!("  Fragments per segment: {}", config.buffer.fragments_per_segment);
    println!(
        "  Manifest: {}",
        config
            .manifest_path()
            .map(|p: PathBuf| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
}
