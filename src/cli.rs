use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vidcast")]
#[command(
    author,
    version,
    about = "Snapshots, splices and HLS streams from video files"
)]
pub struct Cli {
    /// Path to config file (JSON)
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
    /// Probe a video file and display its duration and streams
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Capture a single frame
    Snapshot {
        #[command(flatten)]
        source: SourceArgs,

        /// Position of the frame (seconds, MM:SS, HH:MM:SS, or a fraction with --unit percent)
        #[arg(short, long)]
        at: String,

        #[arg(long, value_enum, default_value_t = Unit::Seconds)]
        unit: Unit,
    },

    /// Capture evenly spaced frames
    Series {
        #[command(flatten)]
        source: SourceArgs,

        /// First frame position
        #[arg(long, default_value = "0")]
        start: String,

        /// Last position the series may reach; defaults to the end of the source
        #[arg(long)]
        stop: Option<String>,

        /// Seconds between frames
        #[arg(short, long, default_value_t = 1.0)]
        interval: f64,

        /// Number of frames; derived from the start, stop and interval when omitted
        #[arg(short = 'n', long)]
        count: Option<u32>,

        #[arg(long, value_enum, default_value_t = Unit::Seconds)]
        unit: Unit,
    },

    /// Cut and re-encode a time range into a standalone clip
    Splice {
        #[command(flatten)]
        source: SourceArgs,

        /// Start of the range
        #[arg(long)]
        start: String,

        /// End of the range
        #[arg(long)]
        end: String,

        #[arg(long, value_enum, default_value_t = Unit::Seconds)]
        unit: Unit,
    },

    /// Capture a scaled-down frame
    Thumbnail {
        #[command(flatten)]
        source: SourceArgs,

        /// Position of the frame; 10% into the source when omitted
        #[arg(short, long)]
        at: Option<String>,

        #[arg(long, value_enum, default_value_t = Unit::Seconds)]
        unit: Unit,

        /// Thumbnail width in pixels (overrides config)
        #[arg(long)]
        width: Option<u32>,
    },

    /// Transcode a whole file into HLS segments plus a manifest
    Hls {
        #[command(flatten)]
        source: SourceArgs,

        /// Nominal segment duration in seconds (overrides config)
        #[arg(short = 'd', long)]
        segment_duration: Option<f64>,
    },

    /// Serve an HLS output directory over HTTP
    Serve {
        /// Directory to serve (overrides config)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },
}

/// Arguments shared by every command that reads a source video.
#[derive(Args)]
pub struct SourceArgs {
    /// Source video file
    #[arg(required = true)]
    pub input: PathBuf,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Source duration in seconds; skips probing
    #[arg(long)]
    pub duration: Option<f64>,

    /// Treat the source as silent (only meaningful with --duration)
    #[arg(long)]
    pub no_audio: bool,

    /// Output file-name prefix; the source's file stem by default
    #[arg(long)]
    pub prefix: Option<String>,

    /// Replace existing outputs instead of applying the configured policy
    #[arg(long)]
    pub overwrite: bool,
}

/// How positions on the command line are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Unit {
    /// Seconds, `MM:SS` or `HH:MM:SS`
    Seconds,
    /// A fraction of the duration in `[0, 1]`
    Percent,
}
