//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, external tools, engine limits, encoding and
//! snapshot output. Every section defaults sensibly so a completely empty
//! `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub engine: EngineConfig,
    pub encode: EncodeConfig,
    pub snapshot: SnapshotConfig,
    pub hls: HlsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::InvalidParameters(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.server.manifest_name.contains('/') || !self.server.manifest_name.ends_with(".m3u8")
        {
            warnings.push(format!(
                "server.manifest_name '{}' should be a bare file name ending in .m3u8",
                self.server.manifest_name
            ));
        }

        if self.engine.timeout_secs == 0 {
            warnings.push("engine.timeout_secs is 0; every run will time out immediately".into());
        }

        if self.encode.crf > 51 {
            warnings.push(format!(
                "encode.crf {} is outside the usual 0-51 range",
                self.encode.crf
            ));
        }

        if !(self.hls.segment_duration_secs.is_finite() && self.hls.segment_duration_secs > 0.0) {
            warnings.push(format!(
                "hls.segment_duration_secs {} must be a positive number",
                self.hls.segment_duration_secs
            ));
        }

        let valid = ["jpg", "jpeg", "png"];
        if !valid.contains(&self.snapshot.image_extension.as_str()) {
            warnings.push(format!(
                "snapshot.image_extension '{}' is not a recognized image format (valid: {})",
                self.snapshot.image_extension,
                valid.join(", ")
            ));
        }

        if self.snapshot.thumbnail_width == 0 {
            warnings.push("snapshot.thumbnail_width is 0".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory served over HTTP; usually the HLS output directory.
    pub root: PathBuf,
    pub manifest_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            root: PathBuf::from("./hls"),
            manifest_name: "index.m3u8".into(),
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Limits applied to every engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timeout_secs: u64,
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { timeout_secs: 3600 }
    }
}

/// Re-encoding settings used by splices and HLS transcodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub crf: u32,
    pub audio_bitrate: String,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".into(),
            audio_codec: "aac".into(),
            preset: "veryfast".into(),
            crf: 23,
            audio_bitrate: "128k".into(),
        }
    }
}

/// What to do when an operation's outputs already exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Treat a complete set of existing outputs as an already-finished run.
    #[default]
    Skip,
    /// Replace existing outputs.
    Overwrite,
    /// Refuse to run if any output exists.
    Error,
}

/// Still-image output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub image_extension: String,
    pub thumbnail_width: u32,
    pub overwrite: OverwritePolicy,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            image_extension: "jpg".into(),
            thumbnail_width: 320,
            overwrite: OverwritePolicy::Skip,
        }
    }
}

/// HLS transcode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    pub segment_duration_secs: f64,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            segment_duration_secs: 6.0,
        }
    }
}
