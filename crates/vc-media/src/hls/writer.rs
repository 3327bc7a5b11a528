//! HLS media playlist generation.

use super::types::{Manifest, Segment};
use std::fmt::Write;
use vc_core::{Error, Result};

/// Validate `segments` and render a complete VOD manifest.
///
/// Segments must be non-empty, numbered `0..N-1` in order, and each must
/// have a positive duration and a single-line URI.
pub fn write_manifest(segments: &[Segment]) -> Result<String> {
    let manifest = Manifest::from_segments(segments.to_vec())?;
    Ok(render_manifest(&manifest))
}

/// Target duration: the longest segment rounded up to whole seconds.
pub fn target_duration(segments: &[Segment]) -> u64 {
    let max_us = segments.iter().map(|s| s.duration_us).max().unwrap_or(0);
    max_us.div_ceil(1_000_000)
}

/// Generate the M3U8 text for an already-validated [`Manifest`].
///
/// Output includes:
/// - `#EXTM3U` header and `#EXT-X-VERSION`
/// - `#EXT-X-TARGETDURATION`
/// - `#EXT-X-MEDIA-SEQUENCE`
/// - `#EXT-X-PLAYLIST-TYPE:VOD`
/// - `#EXTINF` plus URI for each segment
/// - `#EXT-X-ENDLIST`
pub fn render_manifest(manifest: &Manifest) -> String {
    let mut out = String::new();

    writeln!(out, "#EXTM3U").unwrap();
    writeln!(out, "#EXT-X-VERSION:3").unwrap();
    writeln!(out, "#EXT-X-TARGETDURATION:{}", manifest.target_duration).unwrap();
    writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", manifest.media_sequence).unwrap();
    writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD").unwrap();

    for segment in &manifest.segments {
        writeln!(
            out,
            "#EXTINF:{}.{:06},",
            segment.duration_us / 1_000_000,
            segment.duration_us % 1_000_000
        )
        .unwrap();
        writeln!(out, "{}", segment.uri).unwrap();
    }

    writeln!(out, "#EXT-X-ENDLIST").unwrap();

    out
}

pub(crate) fn check_segments(segments: &[Segment]) -> Result<()> {
    if segments.is_empty() {
        return Err(Error::invalid("a manifest needs at least one segment"));
    }

    for (expected, segment) in segments.iter().enumerate() {
        if segment.sequence != expected as u64 {
            return Err(Error::CorruptSegmentSet(format!(
                "expected segment {expected}, found {} ({})",
                segment.sequence, segment.uri
            )));
        }
        if segment.duration_us == 0 {
            return Err(Error::invalid(format!(
                "segment {} has zero duration",
                segment.sequence
            )));
        }
        if segment.uri.is_empty() || segment.uri.contains(['\n', '\r']) || segment.uri.starts_with('#')
        {
            return Err(Error::invalid(format!(
                "segment {} has an unusable URI {:?}",
                segment.sequence, segment.uri
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::segment_file_name;

    fn seg(sequence: u64, duration: f64) -> Segment {
        Segment::new(sequence, duration, segment_file_name(sequence)).unwrap()
    }

    #[test]
    fn test_manifest_format_exact() {
        let m3u8 = write_manifest(&[seg(0, 6.0), seg(1, 5.5)]).unwrap();

        let expected = "\
#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:0
#EXT-X-PLAYLIST-TYPE:VOD
#EXTINF:6.000000,
segment_00000.ts
#EXTINF:5.500000,
segment_00001.ts
#EXT-X-ENDLIST
";
        assert_eq!(m3u8, expected);
    }

    #[test]
    fn test_target_duration_rounds_up() {
        assert_eq!(target_duration(&[seg(0, 6.0), seg(1, 6.2)]), 7);
        assert_eq!(target_duration(&[seg(0, 0.4)]), 1);
        assert_eq!(target_duration(&[seg(0, 10.0)]), 10);
    }

    #[test]
    fn test_target_covers_every_segment() {
        let segments: Vec<_> = [3.9, 4.0, 4.04, 1.2]
            .iter()
            .enumerate()
            .map(|(i, d)| seg(i as u64, *d))
            .collect();
        let target = target_duration(&segments);
        assert!(segments.iter().all(|s| s.duration() <= target as f64));
    }

    #[test]
    fn test_203_seconds_at_6_second_segments() {
        let mut segments: Vec<_> = (0..33).map(|i| seg(i, 6.0)).collect();
        segments.push(seg(33, 5.0));
        let m3u8 = write_manifest(&segments).unwrap();

        assert!(m3u8.contains("#EXT-X-TARGETDURATION:6\n"));
        assert_eq!(m3u8.matches("#EXTINF:").count(), 34);
        assert!(m3u8.contains("#EXTINF:5.000000,\nsegment_00033.ts\n#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn test_rejects_empty() {
        let err = write_manifest(&[]).unwrap_err();
        assert!(matches!(err, Error::InvalidParameters(_)));
    }

    #[test]
    fn test_rejects_gap() {
        let err = write_manifest(&[seg(0, 6.0), seg(2, 6.0)]).unwrap_err();
        assert!(matches!(err, Error::CorruptSegmentSet(_)));
    }

    #[test]
    fn test_rejects_out_of_order() {
        let err = write_manifest(&[seg(1, 6.0), seg(0, 6.0)]).unwrap_err();
        assert!(matches!(err, Error::CorruptSegmentSet(_)));
    }

    #[test]
    fn test_rejects_multiline_uri() {
        let bad = Segment {
            sequence: 0,
            duration_us: 1_000_000,
            uri: "a.ts\n#EXT-X-ENDLIST".into(),
        };
        assert!(write_manifest(&[bad]).is_err());
    }

    #[test]
    fn test_rejects_zero_duration() {
        let bad = Segment {
            sequence: 0,
            duration_us: 0,
            uri: "a.ts".into(),
        };
        assert!(write_manifest(&[bad]).is_err());
    }
}
