//! Segment naming and the segment muxer's CSV cue list.
//!
//! The engine writes one `name,start,end` row per finished segment. Those rows
//! are the authoritative per-segment durations; the files on disk are checked
//! against them before a manifest is produced.

use vc_core::{Error, Result};

pub const SEGMENT_PREFIX: &str = "segment_";
pub const SEGMENT_SUFFIX: &str = ".ts";

/// One row of the cue list.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub file: String,
    pub start: f64,
    pub end: f64,
}

impl Cue {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// `segment_00042.ts` for index 42.
pub fn segment_file_name(index: u64) -> String {
    format!("{SEGMENT_PREFIX}{index:05}{SEGMENT_SUFFIX}")
}

/// Inverse of [`segment_file_name`]; `None` for anything not in that shape.
pub fn segment_index(file_name: &str) -> Option<u64> {
    let digits = file_name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?;
    if digits.len() < 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parse the CSV cue list written by the segment muxer.
pub fn parse_cue_list(text: &str) -> Result<Vec<Cue>> {
    let mut cues = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let bad = || Error::CorruptSegmentSet(format!("unreadable cue at line {}: {line}", i + 1));

        // File names may contain commas, so split from the right.
        let mut fields = line.rsplitn(3, ',');
        let end = fields.next().ok_or_else(bad)?;
        let start = fields.next().ok_or_else(bad)?;
        let file = fields.next().ok_or_else(bad)?;

        let start: f64 = start.trim().parse().map_err(|_| bad())?;
        let end: f64 = end.trim().parse().map_err(|_| bad())?;
        if !(start.is_finite() && end.is_finite()) || end <= start {
            return Err(bad());
        }

        cues.push(Cue {
            file: file.trim().trim_matches('"').to_string(),
            start,
            end,
        });
    }

    Ok(cues)
}
