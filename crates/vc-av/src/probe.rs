//! Source probing.
//!
//! Prefers `ffprobe -v quiet -print_format json -show_format -show_streams`.
//! When ffprobe is not installed, falls back to `ffmpeg -i <file>` and reads
//! the `Duration:` line and stream list from its banner.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vc_core::{Error, MediaSource};

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// What probing learned about a file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    /// Duration in seconds.
    pub duration: f64,
    pub has_video: bool,
    pub has_audio: bool,
    pub format_name: Option<String>,
}

impl ProbeReport {
    /// Turn the report into a [`MediaSource`] for `path`.
    pub fn into_source(self, path: &Path) -> vc_core::Result<MediaSource> {
        if !self.has_video {
            return Err(Error::Probe(format!(
                "{} has no video stream",
                path.display()
            )));
        }
        MediaSource::new(path, self.duration, self.has_audio)
    }
}

/// Probe `path` and build its [`MediaSource`].
pub async fn probe_source(tools: &ToolRegistry, path: &Path) -> vc_core::Result<MediaSource> {
    probe_report(tools, path).await?.into_source(path)
}

/// Probe `path` and return everything learned about it.
pub async fn probe_report(tools: &ToolRegistry, path: &Path) -> vc_core::Result<ProbeReport> {
    if !path.is_file() {
        return Err(Error::not_found("file", path.display()));
    }

    let report = match tools.get("ffprobe") {
        Some(ffprobe) => {
            let output = ToolCommand::new(ffprobe.path.clone())
                .args([
                    "-v",
                    "quiet",
                    "-print_format",
                    "json",
                    "-show_format",
                    "-show_streams",
                ])
                .arg(path.to_string_lossy().as_ref())
                .timeout(PROBE_TIMEOUT)
                .execute()
                .await
                .map_err(|e| Error::Probe(format!("ffprobe failed: {e}")))?;
            parse_ffprobe_json(&output.stdout)?
        }
        None => {
            let ffmpeg = tools.require("ffmpeg")?;
            tracing::debug!("ffprobe unavailable; reading ffmpeg banner");
            // Without an output file ffmpeg always exits non-zero after
            // printing the input description.
            let output = ToolCommand::new(ffmpeg.path.clone())
                .args(["-hide_banner", "-nostdin", "-i"])
                .arg(path.to_string_lossy().as_ref())
                .timeout(PROBE_TIMEOUT)
                .output()
                .await?;
            parse_ffmpeg_banner(&output.stderr)?
        }
    };

    tracing::info!(
        path = %path.display(),
        duration = report.duration,
        has_audio = report.has_audio,
        "probed source"
    );

    Ok(report)
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Parse ffprobe's JSON report.
///
/// The container duration is used when present; otherwise the longest stream
/// duration.
pub fn parse_ffprobe_json(json: &str) -> vc_core::Result<ProbeReport> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let parse = |s: &Option<String>| s.as_deref().and_then(|d| d.parse::<f64>().ok());

    let duration = parse(&output.format.duration)
        .or_else(|| {
            output
                .streams
                .iter()
                .filter_map(|s| parse(&s.duration))
                .reduce(f64::max)
        })
        .ok_or_else(|| Error::Probe("no duration reported".into()))?;

    let has_type = |t: &str| {
        output
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some(t))
    };

    Ok(ProbeReport {
        duration,
        has_video: has_type("video"),
        has_audio: has_type("audio"),
        format_name: output.format.format_name.clone(),
    })
}

/// Parse the input description ffmpeg prints to stderr, e.g.
/// `  Duration: 00:03:23.04, start: 0.000000, bitrate: 1205 kb/s`.
pub fn parse_ffmpeg_banner(stderr: &str) -> vc_core::Result<ProbeReport> {
    let duration = stderr
        .lines()
        .find_map(|line| line.trim().strip_prefix("Duration:"))
        .ok_or_else(|| Error::Probe("no Duration line in ffmpeg output".into()))?;

    let clock = duration.split(',').next().unwrap_or_default().trim();
    if clock == "N/A" {
        return Err(Error::Probe("ffmpeg reports no duration".into()));
    }
    let duration = vc_core::parse_timestamp(clock)
        .map_err(|_| Error::Probe(format!("unreadable duration '{clock}'")))?;

    let stream_kind = |kind: &str| {
        stderr
            .lines()
            .filter(|l| l.trim_start().starts_with("Stream #"))
            .any(|l| l.contains(kind))
    };

    let format_name = stderr
        .lines()
        .find_map(|l| l.strip_prefix("Input #0, "))
        .and_then(|rest| rest.split(", from").next())
        .map(str::to_string);

    Ok(ProbeReport {
        duration,
        has_video: stream_kind(": Video:"),
        has_audio: stream_kind(": Audio:"),
        format_name,
    })
}
