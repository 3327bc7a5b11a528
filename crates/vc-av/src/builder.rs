//! Engine argument construction.
//!
//! [`CommandBuilder::build`] is a pure function of its inputs: it validates an
//! [`OperationRequest`] against a [`MediaSource`] and produces the exact,
//! ordered ffmpeg argument list plus every path the run is expected to write.
//! Nothing here touches the filesystem.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vc_core::config::{EncodeConfig, OverwritePolicy};
use vc_core::{format_timestamp, millis, Error, MediaSource, Result};
use vc_media::hls::{segment_file_name, SEGMENT_PREFIX, SEGMENT_SUFFIX};

/// Name of the segment muxer's cue list inside an HLS output directory.
pub const CUE_LIST_NAME: &str = "segments.csv";

/// Fraction of the duration used for thumbnails when no position is given.
const THUMBNAIL_FRACTION: f64 = 0.1;

/// What to produce from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// One frame at `at` seconds.
    Snapshot { at: f64 },
    /// `count` frames, `interval` seconds apart, starting at `start`.
    SnapshotSeries { start: f64, interval: f64, count: u32 },
    /// The re-encoded range `[start, end)`.
    Splice { start: f64, end: f64 },
    /// A scaled-down frame; defaults to 10% into the source.
    Thumbnail { at: Option<f64> },
    /// The whole source as HLS segments of nominal length `segment_duration`.
    HlsTranscode { segment_duration: f64 },
}

impl Operation {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Snapshot { .. } => "snapshot",
            Operation::SnapshotSeries { .. } => "series",
            Operation::Splice { .. } => "splice",
            Operation::Thumbnail { .. } => "thumbnail",
            Operation::HlsTranscode { .. } => "hls",
        }
    }
}

/// Output file naming convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Naming {
    /// File-name prefix; the source's stem when `None`.
    pub prefix: Option<String>,
    /// Extension for still images.
    pub image_extension: String,
    /// File name of the HLS manifest.
    pub manifest_name: String,
}

impl Default for Naming {
    fn default() -> Self {
        Self {
            prefix: None,
            image_extension: "jpg".into(),
            manifest_name: "index.m3u8".into(),
        }
    }
}

/// An operation plus where and how its outputs are named.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub op: Operation,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub naming: Naming,
}

impl OperationRequest {
    pub fn new(op: Operation, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            op,
            output_dir: output_dir.into(),
            naming: Naming::default(),
        }
    }

    pub fn with_naming(mut self, naming: Naming) -> Self {
        self.naming = naming;
        self
    }
}

/// A fully resolved engine run. Built once, consumed once.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInvocation {
    label: &'static str,
    args: Vec<String>,
    outputs: Vec<PathBuf>,
    claims: Vec<PathBuf>,
    expected_segments: Option<u64>,
    progress_total: Option<f64>,
}

impl EngineInvocation {
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Arguments in the order they are passed to the engine.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Files the run is expected to leave behind. For HLS transcodes this is
    /// the cue list; segment files are discovered afterwards.
    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    /// Paths no other run may write while this one is in flight.
    pub fn claims(&self) -> &[PathBuf] {
        &self.claims
    }

    /// `ceil(duration / segment_duration)` for HLS transcodes.
    pub fn expected_segments(&self) -> Option<u64> {
        self.expected_segments
    }

    /// Seconds of media the run writes, for runs that report progress on
    /// stdout.
    pub fn progress_total(&self) -> Option<f64> {
        self.progress_total
    }
}

/// Pure mapping from requests to engine invocations.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    encode: EncodeConfig,
    thumbnail_width: u32,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new(EncodeConfig::default(), 320)
    }
}

impl CommandBuilder {
    pub fn new(encode: EncodeConfig, thumbnail_width: u32) -> Self {
        Self {
            encode,
            thumbnail_width,
        }
    }

    /// Validate `request` against `source` and build its invocation.
    ///
    /// Only [`OverwritePolicy::Overwrite`] lets the engine replace files;
    /// every other policy passes `-n` so an existing file makes the run fail
    /// instead of being clobbered.
    pub fn build(
        &self,
        request: &OperationRequest,
        source: &MediaSource,
        overwrite: OverwritePolicy,
    ) -> Result<EngineInvocation> {
        let duration = source.duration();
        let dir = &request.output_dir;
        let stem = request
            .naming
            .prefix
            .clone()
            .unwrap_or_else(|| source.stem());
        if stem.is_empty() || stem.contains(['/', '\\']) {
            return Err(Error::invalid(format!("unusable output prefix '{stem}'")));
        }
        let image_ext = &request.naming.image_extension;
        if image_ext.is_empty() || image_ext.contains(['/', '\\']) {
            return Err(Error::invalid(format!("unusable image extension '{image_ext}'")));
        }

        let mut args = base_args(overwrite == OverwritePolicy::Overwrite);

        match request.op {
            Operation::Snapshot { at } => {
                check_instant("snapshot time", at, duration)?;
                let out = dir.join(format!("{stem}-snapshot-{}.{image_ext}", millis(at)));
                push_seek_input(&mut args, at, source.path());
                args.extend(strs(["-map", "0:v:0", "-frames:v", "1", "-q:v", "2"]));
                args.push(path_arg(&out));
                Ok(single(request.op.label(), args, out))
            }

            Operation::Thumbnail { at } => {
                let at = at.unwrap_or(duration * THUMBNAIL_FRACTION);
                check_instant("thumbnail time", at, duration)?;
                if self.thumbnail_width == 0 {
                    return Err(Error::invalid("thumbnail width must be positive"));
                }
                let out = dir.join(format!("{stem}-thumbnail.{image_ext}"));
                push_seek_input(&mut args, at, source.path());
                args.extend(strs(["-map", "0:v:0", "-frames:v", "1"]));
                args.push("-vf".into());
                args.push(format!("scale={}:-2", self.thumbnail_width));
                args.extend(strs(["-q:v", "2"]));
                args.push(path_arg(&out));
                Ok(single(request.op.label(), args, out))
            }

            Operation::SnapshotSeries {
                start,
                interval,
                count,
            } => {
                if count == 0 {
                    return Err(Error::invalid("snapshot count must be at least 1"));
                }
                if !interval.is_finite() || interval <= 0.0 {
                    return Err(Error::invalid(format!(
                        "snapshot interval must be positive, got {interval}"
                    )));
                }
                check_instant("series start", start, duration)?;
                let last = start + interval * f64::from(count - 1);
                check_instant("last snapshot time", last, duration)?;

                let width = series_width(count);
                let pattern = dir.join(format!(
                    "{}-%0{width}d.{image_ext}",
                    stem.replace('%', "%%")
                ));
                let outputs: Vec<PathBuf> = (0..count)
                    .map(|i| dir.join(format!("{stem}-{i:0width$}.{image_ext}")))
                    .collect();

                push_seek_input(&mut args, start, source.path());
                args.extend(strs(["-map", "0:v:0", "-vf"]));
                args.push(format!("fps=1/{}", format_timestamp(interval)));
                args.push("-frames:v".into());
                args.push(count.to_string());
                args.extend(strs(["-q:v", "2", "-start_number", "0", "-f", "image2"]));
                args.push(path_arg(&pattern));

                Ok(EngineInvocation {
                    label: request.op.label(),
                    args,
                    claims: outputs.clone(),
                    outputs,
                    expected_segments: None,
                    progress_total: None,
                })
            }

            Operation::Splice { start, end } => {
                check_instant("splice start", start, duration)?;
                if !end.is_finite() || end <= start {
                    return Err(Error::invalid(format!(
                        "splice end {end} must be after start {start}"
                    )));
                }
                if end > duration {
                    return Err(Error::invalid(format!(
                        "splice end {end} is past the source duration {duration}"
                    )));
                }

                let ext = source.extension().unwrap_or_else(|| "mp4".into());
                let out = dir.join(format!(
                    "{stem}-splice-{}-{}.{ext}",
                    millis(start),
                    millis(end)
                ));

                push_progress(&mut args);
                push_seek_input(&mut args, start, source.path());
                args.push("-t".into());
                args.push(format_timestamp(end - start));
                self.push_encode(&mut args, source.has_audio());
                args.extend(strs(["-avoid_negative_ts", "make_zero"]));
                args.push(path_arg(&out));
                let mut inv = single(request.op.label(), args, out);
                inv.progress_total = Some(end - start);
                Ok(inv)
            }

            Operation::HlsTranscode { segment_duration } => {
                if !segment_duration.is_finite() || segment_duration <= 0.0 {
                    return Err(Error::invalid(format!(
                        "segment duration must be positive, got {segment_duration}"
                    )));
                }
                let manifest_name = &request.naming.manifest_name;
                if manifest_name.is_empty() || manifest_name.contains(['/', '\\']) {
                    return Err(Error::invalid(format!(
                        "unusable manifest name '{manifest_name}'"
                    )));
                }

                let expected = expected_segment_count(duration, segment_duration);
                let cue_list = dir.join(CUE_LIST_NAME);
                let pattern = dir.join(format!("{SEGMENT_PREFIX}%05d{SEGMENT_SUFFIX}"));
                let d = format_timestamp(segment_duration);

                // A new transcode always replaces the previous one.
                args = base_args(true);
                push_progress(&mut args);
                args.push("-i".into());
                args.push(path_arg(source.path()));
                self.push_encode(&mut args, source.has_audio());
                args.push("-force_key_frames".into());
                args.push(format!("expr:gte(t,n_forced*{d})"));
                args.extend(strs(["-f", "segment", "-segment_time"]));
                args.push(d);
                args.extend(strs(["-segment_format", "mpegts", "-segment_list"]));
                args.push(path_arg(&cue_list));
                args.extend(strs([
                    "-segment_list_type",
                    "csv",
                    "-segment_start_number",
                    "0",
                    "-reset_timestamps",
                    "0",
                ]));
                args.push(path_arg(&pattern));

                Ok(EngineInvocation {
                    label: request.op.label(),
                    args,
                    outputs: vec![cue_list.clone()],
                    claims: vec![dir.join(manifest_name), cue_list, dir.join(segment_file_name(0))],
                    expected_segments: Some(expected),
                    progress_total: Some(duration),
                })
            }
        }
    }

    /// Video (and audio, if present) re-encode settings. Stream copy is
    /// never emitted: it can only cut on keyframes.
    fn push_encode(&self, args: &mut Vec<String>, has_audio: bool) {
        let enc = &self.encode;
        args.extend(strs(["-map", "0:v:0"]));
        if has_audio {
            args.extend(strs(["-map", "0:a:0"]));
        }
        args.push("-c:v".into());
        args.push(enc.video_codec.clone());
        args.push("-preset".into());
        args.push(enc.preset.clone());
        args.push("-crf".into());
        args.push(enc.crf.to_string());
        args.extend(strs(["-pix_fmt", "yuv420p"]));
        if has_audio {
            args.push("-c:a".into());
            args.push(enc.audio_codec.clone());
            args.push("-b:a".into());
            args.push(enc.audio_bitrate.clone());
        } else {
            args.push("-an".into());
        }
    }
}

/// Number of segments a transcode of `duration` seconds should produce.
pub fn expected_segment_count(duration: f64, segment_duration: f64) -> u64 {
    // Guard against 12.000000001 / 6 becoming 3.
    let ratio = duration / segment_duration;
    let rounded = ratio.round();
    let n = if (ratio - rounded).abs() < 1e-6 {
        rounded
    } else {
        ratio.ceil()
    };
    (n as u64).max(1)
}

/// Zero-padding width for a series: digits in `count`, at least two.
fn series_width(count: u32) -> usize {
    count.to_string().len().max(2)
}

fn base_args(overwrite: bool) -> Vec<String> {
    let mut args = strs(["-hide_banner", "-nostdin", "-loglevel", "error"]);
    args.push(if overwrite { "-y" } else { "-n" }.into());
    args
}

/// Machine-readable progress on stdout instead of the stats line on stderr.
fn push_progress(args: &mut Vec<String>) {
    args.extend(strs(["-progress", "pipe:1", "-nostats"]));
}

/// Input seeking: decoding starts at the keyframe before `at` and frames up
/// to `at` are discarded, so the cut is frame accurate.
fn push_seek_input(args: &mut Vec<String>, at: f64, input: &Path) {
    args.push("-ss".into());
    args.push(format_timestamp(at));
    args.push("-i".into());
    args.push(path_arg(input));
}

fn check_instant(what: &str, t: f64, duration: f64) -> Result<()> {
    if !t.is_finite() || t < 0.0 || t >= duration {
        return Err(Error::invalid(format!(
            "{what} {t} is outside [0, {duration})"
        )));
    }
    Ok(())
}

fn single(label: &'static str, args: Vec<String>, out: PathBuf) -> EngineInvocation {
    EngineInvocation {
        label,
        args,
        outputs: vec![out.clone()],
        claims: vec![out],
        expected_segments: None,
        progress_total: None,
    }
}

fn path_arg(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn strs<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(duration: f64) -> MediaSource {
        MediaSource::new("/videos/talk.mp4", duration, true).unwrap()
    }

    fn build(op: Operation, duration: f64) -> Result<EngineInvocation> {
        CommandBuilder::default().build(
            &OperationRequest::new(op, "/out"),
            &source(duration),
            OverwritePolicy::Skip,
        )
    }

    fn arg_after<'a>(inv: &'a EngineInvocation, flag: &str) -> &'a str {
        let i = inv.args().iter().position(|a| a == flag).unwrap();
        &inv.args()[i + 1]
    }

    #[test]
    fn snapshot_args() {
        let inv = build(Operation::Snapshot { at: 12.5 }, 60.0).unwrap();
        assert_eq!(
            inv.args(),
            [
                "-hide_banner", "-nostdin", "-loglevel", "error", "-n", "-ss", "12.500", "-i",
                "/videos/talk.mp4", "-map", "0:v:0", "-frames:v", "1", "-q:v", "2",
                "/out/talk-snapshot-12500.jpg",
            ]
        );
        assert_eq!(inv.outputs(), [PathBuf::from("/out/talk-snapshot-12500.jpg")]);
        assert_eq!(inv.claims(), inv.outputs());
        assert_eq!(inv.progress_total(), None);
    }

    #[test]
    fn snapshot_bounds() {
        assert!(build(Operation::Snapshot { at: 0.0 }, 60.0).is_ok());
        assert!(build(Operation::Snapshot { at: 60.0 }, 60.0).is_err());
        assert!(build(Operation::Snapshot { at: -0.1 }, 60.0).is_err());
        assert!(build(Operation::Snapshot { at: f64::NAN }, 60.0).is_err());
    }

    #[test]
    fn overwrite_policy_controls_flag() {
        let b = CommandBuilder::default();
        let req = OperationRequest::new(Operation::Snapshot { at: 1.0 }, "/out");
        let inv = b.build(&req, &source(10.0), OverwritePolicy::Overwrite).unwrap();
        assert!(inv.args().contains(&"-y".to_string()));
        let inv = b.build(&req, &source(10.0), OverwritePolicy::Error).unwrap();
        assert!(inv.args().contains(&"-n".to_string()));
        assert!(!inv.args().contains(&"-y".to_string()));
    }

    #[test]
    fn series_of_ten_from_zero() {
        let inv = build(
            Operation::SnapshotSeries {
                start: 0.0,
                interval: 1.0,
                count: 10,
            },
            1800.0,
        )
        .unwrap();

        let names: Vec<String> = inv
            .outputs()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("talk-{i:02}.jpg")).collect();
        assert_eq!(names, expected);

        assert_eq!(arg_after(&inv, "-vf"), "fps=1/1.000");
        assert_eq!(arg_after(&inv, "-frames:v"), "10");
        assert_eq!(arg_after(&inv, "-start_number"), "0");
        assert_eq!(inv.args().last().unwrap(), "/out/talk-%02d.jpg");
    }

    #[test]
    fn series_is_deterministic() {
        let op = Operation::SnapshotSeries {
            start: 3.0,
            interval: 2.5,
            count: 120,
        };
        let a = build(op.clone(), 600.0).unwrap();
        let b = build(op, 600.0).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.outputs().len(), 120);
        assert_eq!(a.outputs()[7], PathBuf::from("/out/talk-007.jpg"));
    }

    #[test]
    fn series_validation() {
        let series = |start, interval, count| Operation::SnapshotSeries {
            start,
            interval,
            count,
        };
        let err = build(series(0.0, 1.0, 0), 60.0).unwrap_err();
        assert!(matches!(err, Error::InvalidParameters(_)));
        assert!(build(series(0.0, 0.0, 3), 60.0).is_err());
        assert!(build(series(0.0, -1.0, 3), 60.0).is_err());
        // Last frame would land at 60s.
        assert!(build(series(0.0, 6.0, 11), 60.0).is_err());
        assert!(build(series(0.0, 6.0, 10), 60.0).is_ok());
    }

    #[test]
    fn series_escapes_percent_in_prefix() {
        let req = OperationRequest::new(
            Operation::SnapshotSeries {
                start: 0.0,
                interval: 1.0,
                count: 3,
            },
            "/out",
        )
        .with_naming(Naming {
            prefix: Some("100%".into()),
            ..Naming::default()
        });
        let inv = CommandBuilder::default()
            .build(&req, &source(10.0), OverwritePolicy::Skip)
            .unwrap();
        assert_eq!(inv.args().last().unwrap(), "/out/100%%-%02d.jpg");
        assert_eq!(inv.outputs()[0], PathBuf::from("/out/100%-00.jpg"));
    }

    #[test]
    fn splice_reencodes() {
        let inv = build(Operation::Splice { start: 1.0, end: 4.5 }, 60.0).unwrap();
        assert_eq!(arg_after(&inv, "-ss"), "1.000");
        assert_eq!(arg_after(&inv, "-t"), "3.500");
        assert_eq!(arg_after(&inv, "-c:v"), "libx264");
        assert_eq!(arg_after(&inv, "-c:a"), "aac");
        assert!(!inv.args().iter().any(|a| a == "copy"));
        assert_eq!(arg_after(&inv, "-progress"), "pipe:1");
        assert_eq!(inv.progress_total(), Some(3.5));
        assert_eq!(inv.outputs(), [PathBuf::from("/out/talk-splice-1000-4500.mp4")]);
    }

    #[test]
    fn splice_without_audio() {
        let src = MediaSource::new("/videos/mute.mkv", 30.0, false).unwrap();
        let req = OperationRequest::new(Operation::Splice { start: 0.0, end: 30.0 }, "/out");
        let inv = CommandBuilder::default()
            .build(&req, &src, OverwritePolicy::Skip)
            .unwrap();
        assert!(inv.args().contains(&"-an".to_string()));
        assert!(!inv.args().contains(&"0:a:0".to_string()));
        assert_eq!(inv.outputs(), [PathBuf::from("/out/mute-splice-0-30000.mkv")]);
    }

    #[test]
    fn splice_validation() {
        let splice = |start, end| Operation::Splice { start, end };
        let err = build(splice(5.0, 5.0), 60.0).unwrap_err();
        assert!(matches!(err, Error::InvalidParameters(_)));
        assert!(build(splice(6.0, 5.0), 60.0).is_err());
        assert!(build(splice(50.0, 60.5), 60.0).is_err());
        assert!(build(splice(60.0, 61.0), 60.0).is_err());
        assert!(build(splice(-1.0, 2.0), 60.0).is_err());
    }

    #[test]
    fn thumbnail_defaults_to_tenth() {
        let inv = build(Operation::Thumbnail { at: None }, 200.0).unwrap();
        assert_eq!(arg_after(&inv, "-ss"), "20.000");
        assert_eq!(arg_after(&inv, "-vf"), "scale=320:-2");
        assert_eq!(inv.outputs(), [PathBuf::from("/out/talk-thumbnail.jpg")]);
    }

    #[test]
    fn thumbnail_explicit_time() {
        let inv = build(Operation::Thumbnail { at: Some(42.0) }, 200.0).unwrap();
        assert_eq!(arg_after(&inv, "-ss"), "42.000");
        assert!(build(Operation::Thumbnail { at: Some(250.0) }, 200.0).is_err());
    }

    #[test]
    fn hls_args() {
        let inv = build(Operation::HlsTranscode { segment_duration: 6.0 }, 203.0).unwrap();
        assert_eq!(inv.expected_segments(), Some(34));
        assert_eq!(arg_after(&inv, "-f"), "segment");
        assert_eq!(arg_after(&inv, "-segment_time"), "6.000");
        assert_eq!(arg_after(&inv, "-force_key_frames"), "expr:gte(t,n_forced*6.000)");
        assert_eq!(arg_after(&inv, "-segment_list"), "/out/segments.csv");
        assert_eq!(arg_after(&inv, "-segment_list_type"), "csv");
        assert_eq!(inv.args().last().unwrap(), "/out/segment_%05d.ts");
        assert!(inv.args().contains(&"-y".to_string()));
        assert!(inv.claims().contains(&PathBuf::from("/out/index.m3u8")));
        assert!(!inv.args().iter().any(|a| a == "copy"));
        assert!(inv.args().contains(&"-nostats".to_string()));
        assert_eq!(inv.progress_total(), Some(203.0));
    }

    #[test]
    fn hls_validation() {
        let hls = |d| Operation::HlsTranscode { segment_duration: d };
        assert!(matches!(
            build(hls(0.0), 60.0).unwrap_err(),
            Error::InvalidParameters(_)
        ));
        assert!(build(hls(-6.0), 60.0).is_err());
        assert!(build(hls(f64::INFINITY), 60.0).is_err());
        assert!(build(hls(120.0), 60.0).is_ok());
    }

    #[test]
    fn segment_counts() {
        assert_eq!(expected_segment_count(203.0, 6.0), 34);
        assert_eq!(expected_segment_count(12.0, 6.0), 2);
        assert_eq!(expected_segment_count(12.000000001, 6.0), 2);
        assert_eq!(expected_segment_count(12.5, 6.0), 3);
        assert_eq!(expected_segment_count(3.0, 10.0), 1);
    }

    #[test]
    fn rejects_prefix_with_separator() {
        let req = OperationRequest::new(Operation::Snapshot { at: 1.0 }, "/out").with_naming(Naming {
            prefix: Some("../escape".into()),
            ..Naming::default()
        });
        assert!(CommandBuilder::default()
            .build(&req, &source(10.0), OverwritePolicy::Skip)
            .is_err());
    }

    #[test]
    fn rejects_image_extension_with_separator() {
        for ext in ["../x", "a\\b", ""] {
            let req = OperationRequest::new(Operation::Thumbnail { at: None }, "/out").with_naming(
                Naming {
                    image_extension: ext.into(),
                    ..Naming::default()
                },
            );
            let err = CommandBuilder::default()
                .build(&req, &source(10.0), OverwritePolicy::Skip)
                .unwrap_err();
            assert!(matches!(err, Error::InvalidParameters(_)), "accepted '{ext}'");
        }
    }
}
