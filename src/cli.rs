use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "oculux")]
#[command(author, version, about = "Stream and decrypt confidential media from storage providers")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream a locator and write one track as fragmented MP4
    Play {
        /// Media locator (jkl://<owner>/<path>)
        locator: String,

        /// Start playback at this many seconds
        #[arg(long)]
        seek: Option<f64>,

        /// Track ID to write (defaults to the first playable track)
        #[arg(long)]
        track: Option<u32>,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the frame a playback time resumes from
    Locate {
        /// Media locator (jkl://<owner>/<path>)
        locator: String,

        /// Playback time in seconds
        #[arg(long)]
        time: f64,
    },

    /// Show lookup keys and the resolved record for a locator
    Lookup {
        /// Media locator (jkl://<owner>/<path>)
        locator: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Frame and encrypt a file in the storage wire format
    Seal {
        /// File to seal
        input: PathBuf,

        /// IV as hex (12 or 16 bytes)
        #[arg(long)]
        iv: String,

        /// AES key as hex (16 or 32 bytes)
        #[arg(long)]
        key: String,

        /// Plaintext bytes per frame
        #[arg(long, default_value_t = oculux::pipeline::DEFAULT_SEAL_FRAME_LEN)]
        frame_len: usize,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
