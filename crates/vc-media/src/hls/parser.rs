//! Parsing of the VOD playlists produced by [`super::write_manifest`].

use super::types::{Manifest, Segment};
use super::writer;
use vc_core::{Error, Result};

fn malformed(line_no: usize, msg: impl std::fmt::Display) -> Error {
    Error::invalid(format!("malformed manifest at line {line_no}: {msg}"))
}

/// Parse a complete media playlist back into a [`Manifest`].
///
/// Unknown tags are ignored. The playlist must start with `#EXTM3U`, carry a
/// target duration that covers every segment, and end with `#EXT-X-ENDLIST`.
pub fn parse_manifest(text: &str) -> Result<Manifest> {
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l.trim()));

    match lines.next() {
        Some((_, "#EXTM3U")) => {}
        _ => return Err(malformed(1, "missing #EXTM3U header")),
    }

    let mut target_duration: Option<u64> = None;
    let mut media_sequence = 0u64;
    let mut pending: Option<u64> = None;
    let mut segments = Vec::new();
    let mut ended = false;

    for (line_no, line) in lines {
        if line.is_empty() {
            continue;
        }
        if ended {
            return Err(malformed(line_no, "content after #EXT-X-ENDLIST"));
        }

        if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            target_duration = Some(value.parse().map_err(|_| malformed(line_no, value))?);
        } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = value.parse().map_err(|_| malformed(line_no, value))?;
        } else if let Some(value) = line.strip_prefix("#EXTINF:") {
            if pending.is_some() {
                return Err(malformed(line_no, "#EXTINF without a URI"));
            }
            let duration = value.split(',').next().unwrap_or_default();
            let secs: f64 = duration.parse().map_err(|_| malformed(line_no, duration))?;
            if !secs.is_finite() || secs <= 0.0 {
                return Err(malformed(line_no, "non-positive duration"));
            }
            pending = Some((secs * 1_000_000.0).round() as u64);
        } else if line == "#EXT-X-ENDLIST" {
            ended = true;
        } else if line.starts_with('#') {
            continue;
        } else {
            let duration_us = pending
                .take()
                .ok_or_else(|| malformed(line_no, "URI without #EXTINF"))?;
            segments.push(Segment {
                sequence: media_sequence + segments.len() as u64,
                duration_us,
                uri: line.to_string(),
            });
        }
    }

    if pending.is_some() {
        return Err(Error::invalid("malformed manifest: trailing #EXTINF without a URI"));
    }
    if !ended {
        return Err(Error::invalid("malformed manifest: missing #EXT-X-ENDLIST"));
    }
    let target_duration = target_duration
        .ok_or_else(|| Error::invalid("malformed manifest: missing #EXT-X-TARGETDURATION"))?;
    if segments.is_empty() {
        return Err(Error::invalid("malformed manifest: no segments"));
    }
    if target_duration < writer::target_duration(&segments) {
        return Err(Error::invalid(format!(
            "malformed manifest: target duration {target_duration} is shorter than a segment"
        )));
    }

    Ok(Manifest {
        target_duration,
        media_sequence,
        segments,
    })
}
