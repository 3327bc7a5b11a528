//! Media-source descriptor and time helpers.
//!
//! A [`MediaSource`] is built once (from a probe or caller-supplied duration)
//! and then only read. Timestamps are plain `f64` seconds throughout; the
//! helpers here parse the user-facing forms and render the engine-facing one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// MediaSource
// ---------------------------------------------------------------------------

/// An input video file and the facts about it that drive argument building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSource {
    path: PathBuf,
    duration: f64,
    has_audio: bool,
}

impl MediaSource {
    /// Create a source, rejecting durations that are not positive and finite.
    pub fn new(path: impl Into<PathBuf>, duration: f64, has_audio: bool) -> Result<Self> {
        if !duration.is_finite() || duration <= 0.0 {
            return Err(Error::invalid(format!(
                "source duration must be positive, got {duration}"
            )));
        }
        Ok(Self {
            path: path.into(),
            duration,
            has_audio,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    /// File stem used as the default prefix for derived outputs.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".into())
    }

    /// Lowercased extension of the source, if it has one.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A point in a source, either absolute or relative to its duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "unit", content = "value")]
pub enum Position {
    /// Seconds from the start.
    Seconds(f64),
    /// Fraction of the duration, in `[0, 1]`.
    Fraction(f64),
}

impl Position {
    /// Resolve to seconds against `duration`.
    pub fn resolve(self, duration: f64) -> Result<f64> {
        match self {
            Position::Seconds(s) if s.is_finite() => Ok(s),
            Position::Seconds(s) => Err(Error::invalid(format!("timestamp {s} is not finite"))),
            Position::Fraction(f) if (0.0..=1.0).contains(&f) => Ok(f * duration),
            Position::Fraction(f) => Err(Error::invalid(format!(
                "fractional position {f} is outside [0, 1]"
            ))),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds(s) => write!(f, "{s}s"),
            Self::Fraction(p) => write!(f, "{}%", p * 100.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamp helpers
// ---------------------------------------------------------------------------

/// Parse `SS[.fff]`, `MM:SS[.fff]` or `HH:MM:SS[.fff]` into seconds.
pub fn parse_timestamp(input: &str) -> Result<f64> {
    let input = input.trim();
    let bad = || Error::invalid(format!("invalid timestamp '{input}'"));

    let parts: Vec<&str> = input.split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(bad());
    }

    let (last, whole) = parts.split_last().ok_or_else(bad)?;
    let seconds: f64 = last.parse().map_err(|_| bad())?;
    if !seconds.is_finite() || seconds < 0.0 || (!whole.is_empty() && seconds >= 60.0) {
        return Err(bad());
    }

    let mut total = 0u64;
    for (i, part) in whole.iter().enumerate() {
        let value: u64 = part.parse().map_err(|_| bad())?;
        // minutes are bounded only when hours are present
        if whole.len() == 2 && i == 1 && value >= 60 {
            return Err(bad());
        }
        total = total * 60 + value;
    }

    Ok(total as f64 * 60.0 + seconds)
}

/// Render seconds the way the engine's `-ss`/`-t` options expect them.
pub fn format_timestamp(seconds: f64) -> String {
    format!("{seconds:.3}")
}

/// Whole milliseconds, used in deterministic output names.
pub fn millis(seconds: f64) -> u64 {
    (seconds * 1000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_source_rejects_bad_duration() {
        assert!(MediaSource::new("a.mp4", 0.0, true).is_err());
        assert!(MediaSource::new("a.mp4", -1.0, true).is_err());
        assert!(MediaSource::new("a.mp4", f64::NAN, true).is_err());
        assert!(MediaSource::new("a.mp4", f64::INFINITY, true).is_err());
    }

    #[test]
    fn media_source_accessors() {
        let src = MediaSource::new("/videos/Clip.MP4", 12.5, false).unwrap();
        assert_eq!(src.path(), Path::new("/videos/Clip.MP4"));
        assert_eq!(src.duration(), 12.5);
        assert!(!src.has_audio());
        assert_eq!(src.stem(), "Clip");
        assert_eq!(src.extension().as_deref(), Some("mp4"));
    }

    #[test]
    fn position_resolution() {
        assert_eq!(Position::Seconds(4.0).resolve(100.0).unwrap(), 4.0);
        assert_eq!(Position::Fraction(0.25).resolve(200.0).unwrap(), 50.0);
        assert!(Position::Fraction(1.5).resolve(200.0).is_err());
        assert!(Position::Seconds(f64::NAN).resolve(200.0).is_err());
    }

    #[test]
    fn position_display() {
        assert_eq!(Position::Seconds(1.5).to_string(), "1.5s");
        assert_eq!(Position::Fraction(0.5).to_string(), "50%");
    }

    #[test]
    fn parse_plain_seconds() {
        assert_eq!(parse_timestamp("12").unwrap(), 12.0);
        assert_eq!(parse_timestamp("0.5").unwrap(), 0.5);
    }

    #[test]
    fn parse_clock_forms() {
        assert_eq!(parse_timestamp("01:30").unwrap(), 90.0);
        assert_eq!(parse_timestamp("1:02:03.5").unwrap(), 3723.5);
        assert_eq!(parse_timestamp("00:03:23").unwrap(), 203.0);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_timestamp("").is_err());
        assert!(parse_timestamp("abc").is_err());
        assert!(parse_timestamp("1:2:3:4").is_err());
        assert!(parse_timestamp("01:75").is_err());
        assert!(parse_timestamp("1:60:00").is_err());
        assert!(parse_timestamp("-3").is_err());
    }

    #[test]
    fn timestamp_rendering() {
        assert_eq!(format_timestamp(1.0), "1.000");
        assert_eq!(format_timestamp(12.3456), "12.346");
        assert_eq!(millis(1.2345), 1235);
    }
}
