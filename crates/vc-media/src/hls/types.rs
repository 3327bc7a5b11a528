//! HLS playlist types.

use serde::{Deserialize, Serialize};
use vc_core::{Error, Result};

use super::writer;

const MICROS_PER_SEC: f64 = 1_000_000.0;

/// A single segment in a media playlist.
///
/// Durations are held in whole microseconds so a manifest written with six
/// decimal places parses back to exactly the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// 0-based position in the stream.
    pub sequence: u64,
    /// Segment duration in microseconds.
    pub duration_us: u64,
    /// URI relative to the manifest.
    pub uri: String,
}

impl Segment {
    /// Build a segment from a duration in seconds.
    pub fn new(sequence: u64, duration_secs: f64, uri: impl Into<String>) -> Result<Self> {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(Error::invalid(format!(
                "segment {sequence} has non-positive duration {duration_secs}"
            )));
        }
        Ok(Self {
            sequence,
            duration_us: (duration_secs * MICROS_PER_SEC).round() as u64,
            uri: uri.into(),
        })
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration_us as f64 / MICROS_PER_SEC
    }
}

/// A complete VOD media playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Maximum segment duration in integer seconds (rounded up).
    pub target_duration: u64,
    /// Sequence number of the first segment; always 0 for a fresh transcode.
    pub media_sequence: u64,
    /// Ordered, gap-free list of segments.
    pub segments: Vec<Segment>,
}

impl Manifest {
    /// Validate `segments` and compute the stream-level fields.
    pub fn from_segments(segments: Vec<Segment>) -> Result<Self> {
        writer::check_segments(&segments)?;
        Ok(Self {
            target_duration: writer::target_duration(&segments),
            media_sequence: 0,
            segments,
        })
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Sum of all segment durations in seconds.
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration_us).sum::<u64>() as f64 / MICROS_PER_SEC
    }

    /// Render the manifest text.
    pub fn render(&self) -> String {
        writer::render_manifest(self)
    }
}
