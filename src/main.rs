mod cli;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, SourceArgs, Unit};
use tokio_util::sync::CancellationToken;
use vc_av::{
    CommandBuilder, HlsEncoder, Naming, Operation, OperationRequest, ProcessRunner,
    SnapshotSplicer, ToolRegistry,
};
use vc_core::config::{Config, OverwritePolicy};
use vc_core::{parse_timestamp, MediaSource, Position};

/// Where snapshots and splices go when `--output` is not given.
const DEFAULT_OUTPUT_DIR: &str = "out";

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults based on --verbose.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vidcast=trace,vc_av=trace,vc_core=debug,vc_server=debug,tower_http=debug".to_string()
        } else {
            "vidcast=info,vc_av=info,vc_core=info,vc_server=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    // `validate` without its own path falls back to the global --config.
    let command = match cli.command {
        Commands::Validate { config } => Commands::Validate {
            config: config.or_else(|| cli.config.clone()),
        },
        other => other,
    };

    let config = Config::load_or_default(cli.config.as_deref());
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(command, config))
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; stopping");
                cancel.cancel();
            }
        });
    }

    let tools = ToolRegistry::discover(&config.tools);

    match command {
        Commands::Probe { file, json } => probe_file(&tools, &file, json).await,

        Commands::Snapshot { source, at, unit } => {
            let job = Job::open(&config, &tools, &source, cancel).await?;
            let at = position(&at, unit)?.resolve(job.source.duration())?;
            job.produce(Operation::Snapshot { at }).await
        }

        Commands::Series {
            source,
            start,
            stop,
            interval,
            count,
            unit,
        } => {
            let job = Job::open(&config, &tools, &source, cancel).await?;
            let duration = job.source.duration();
            let start = position(&start, unit)?.resolve(duration)?;
            let count = match count {
                Some(n) => n,
                None => {
                    let stop = match stop {
                        Some(raw) => position(&raw, unit)?.resolve(duration)?,
                        None => duration,
                    };
                    auto_count(start, stop, interval)
                }
            };
            tracing::debug!(start, interval, count, "snapshot series");
            job.produce(Operation::SnapshotSeries {
                start,
                interval,
                count,
            })
            .await
        }

        Commands::Splice {
            source,
            start,
            end,
            unit,
        } => {
            let job = Job::open(&config, &tools, &source, cancel).await?;
            let duration = job.source.duration();
            let start = position(&start, unit)?.resolve(duration)?;
            let end = position(&end, unit)?.resolve(duration)?;
            job.produce(Operation::Splice { start, end }).await
        }

        Commands::Thumbnail {
            source,
            at,
            unit,
            width,
        } => {
            let mut job = Job::open(&config, &tools, &source, cancel).await?;
            if let Some(width) = width {
                job.thumbnail_width = width;
            }
            let at = match at {
                Some(raw) => Some(position(&raw, unit)?.resolve(job.source.duration())?),
                None => None,
            };
            job.produce(Operation::Thumbnail { at }).await
        }

        Commands::Hls {
            source,
            segment_duration,
        } => {
            let segment_duration = segment_duration.unwrap_or(config.hls.segment_duration_secs);
            let output_dir = source
                .output
                .clone()
                .unwrap_or_else(|| config.server.root.clone());
            let job = Job::open(&config, &tools, &source, cancel).await?;
            job.transcode(segment_duration, &output_dir).await
        }

        Commands::Serve { root, host, port } => {
            let mut server = config.server.clone();
            if let Some(root) = root {
                server.root = root;
            }
            if let Some(host) = host {
                server.host = host;
            }
            if let Some(port) = port {
                server.port = port;
            }
            vc_server::start(&server, cancel)
                .await
                .with_context(|| format!("serving {}", server.root.display()))
        }

        Commands::CheckTools => check_tools(&tools),

        Commands::Validate { config: path } => validate_config(path.as_deref()),
    }
}

/// One source plus everything needed to run operations against it.
struct Job<'a> {
    config: &'a Config,
    source: MediaSource,
    runner: ProcessRunner,
    output_dir: PathBuf,
    naming: Naming,
    overwrite: OverwritePolicy,
    thumbnail_width: u32,
}

impl<'a> Job<'a> {
    async fn open(
        config: &'a Config,
        tools: &ToolRegistry,
        args: &SourceArgs,
        cancel: CancellationToken,
    ) -> Result<Job<'a>> {
        let source = match args.duration {
            Some(duration) => MediaSource::new(&args.input, duration, !args.no_audio)?,
            None => vc_av::probe_source(tools, &args.input)
                .await
                .with_context(|| format!("probing {}", args.input.display()))?,
        };

        // A missing engine is reported when it is launched, so invalid
        // parameters are still rejected first.
        let engine = match tools.get("ffmpeg") {
            Some(tool) => tool.path.clone(),
            None => {
                tracing::warn!("ffmpeg not found in PATH or config");
                PathBuf::from("ffmpeg")
            }
        };
        let runner = ProcessRunner::new(engine, config.engine.timeout()).with_cancellation(cancel);

        Ok(Job {
            config,
            source,
            runner,
            output_dir: args
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            naming: Naming {
                prefix: args.prefix.clone(),
                image_extension: config.snapshot.image_extension.clone(),
                manifest_name: config.server.manifest_name.clone(),
            },
            overwrite: if args.overwrite {
                OverwritePolicy::Overwrite
            } else {
                config.snapshot.overwrite
            },
            thumbnail_width: config.snapshot.thumbnail_width,
        })
    }

    fn builder(&self) -> CommandBuilder {
        CommandBuilder::new(self.config.encode.clone(), self.thumbnail_width)
    }

    async fn produce(self, op: Operation) -> Result<()> {
        let label = op.label();
        let request = OperationRequest::new(op, &self.output_dir).with_naming(self.naming.clone());
        let splicer = SnapshotSplicer::new(self.builder(), self.runner.clone(), self.overwrite);

        let started = Instant::now();
        let outputs = splicer.run(&request, &self.source).await?;

        for path in &outputs {
            println!("{}", path.display());
        }
        tracing::info!(
            op = label,
            outputs = outputs.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "time taken"
        );
        Ok(())
    }

    async fn transcode(self, segment_duration: f64, output_dir: &Path) -> Result<()> {
        let encoder = HlsEncoder::new(self.builder(), self.runner.clone())
            .with_manifest_name(self.naming.manifest_name.clone());

        let started = Instant::now();
        let output = encoder
            .transcode(&self.source, segment_duration, output_dir)
            .await?;

        println!("{}", output.manifest_path.display());
        println!(
            "  {} segments, target duration {}s, {:.3}s total",
            output.manifest.segment_count(),
            output.manifest.target_duration,
            output.manifest.total_duration()
        );
        tracing::info!(
            op = "hls",
            elapsed_ms = started.elapsed().as_millis() as u64,
            "time taken"
        );
        Ok(())
    }
}

fn position(raw: &str, unit: Unit) -> Result<Position> {
    Ok(match unit {
        Unit::Seconds => Position::Seconds(parse_timestamp(raw)?),
        Unit::Percent => Position::Fraction(
            raw.trim()
                .parse()
                .with_context(|| format!("invalid fraction '{raw}'"))?,
        ),
    })
}

/// Frames that fit between `start` and `stop` at `interval` spacing, at
/// least one. A non-positive interval is left for request validation.
fn auto_count(start: f64, stop: f64, interval: f64) -> u32 {
    if interval.is_finite() && interval > 0.0 {
        ((stop - start) / interval).round().clamp(1.0, u32::MAX as f64) as u32
    } else {
        1
    }
}

async fn probe_file(tools: &ToolRegistry, file: &Path, json: bool) -> Result<()> {
    let report = vc_av::probe_report(tools, file)
        .await
        .with_context(|| format!("probing {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let secs = report.duration;
        let whole = secs as u64;
        println!("File: {}", file.display());
        if let Some(ref format) = report.format_name {
            println!("Container: {format}");
        }
        println!(
            "Duration: {:02}:{:02}:{:06.3} ({secs:.3}s)",
            whole / 3600,
            (whole / 60) % 60,
            secs - (whole - whole % 60) as f64
        );
        println!("Video: {}", if report.has_video { "yes" } else { "no" });
        println!("Audio: {}", if report.has_audio { "yes" } else { "no" });
    }

    Ok(())
}

fn check_tools(registry: &ToolRegistry) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = registry.check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to enable snapshots, splices and HLS.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents =
                std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Root: {}", config.server.root.display());
    println!("  Engine timeout: {}s", config.engine.timeout_secs);
    println!(
        "  Encode: {} / {} (preset {}, crf {})",
        config.encode.video_codec, config.encode.audio_codec, config.encode.preset, config.encode.crf
    );
    println!("  HLS segment duration: {}s", config.hls.segment_duration_secs);

    let warnings = config.validate();
    for warning in &warnings {
        println!("  ! {warning}");
    }

    Ok(())
}
