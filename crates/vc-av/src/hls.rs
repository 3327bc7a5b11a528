//! Whole-file HLS transcode.
//!
//! One engine pass encodes and segments the source; the segment muxer's cue
//! list supplies each segment's duration. The manifest is written to a
//! temporary name and renamed into place only after every segment has been
//! verified, so a server never sees a manifest for an incomplete stream.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use vc_core::config::OverwritePolicy;
use vc_core::{Error, MediaSource, Result, Stage, StageExt};
use vc_media::hls::{parse_cue_list, segment_file_name, segment_index, Manifest, Segment};

use crate::builder::{CommandBuilder, Naming, Operation, OperationRequest, CUE_LIST_NAME};
use crate::runner::ProcessRunner;

/// Result of a successful transcode.
#[derive(Debug, Clone)]
pub struct HlsOutput {
    pub manifest: Manifest,
    pub manifest_path: PathBuf,
}

/// Transcodes sources into a segmented HLS stream plus manifest.
#[derive(Debug, Clone)]
pub struct HlsEncoder {
    builder: CommandBuilder,
    runner: ProcessRunner,
    manifest_name: String,
}

impl HlsEncoder {
    pub fn new(builder: CommandBuilder, runner: ProcessRunner) -> Self {
        Self {
            builder,
            runner,
            manifest_name: Naming::default().manifest_name,
        }
    }

    pub fn with_manifest_name(mut self, name: impl Into<String>) -> Self {
        self.manifest_name = name.into();
        self
    }

    /// Transcode `source` into `output_dir`.
    ///
    /// Segments and the manifest from a previous run in the same directory
    /// are removed first. On any failure after that point every segment this
    /// run wrote is deleted and no manifest is published.
    pub async fn transcode(
        &self,
        source: &MediaSource,
        segment_duration: f64,
        output_dir: &Path,
    ) -> Result<HlsOutput> {
        let request = OperationRequest::new(Operation::HlsTranscode { segment_duration }, output_dir)
            .with_naming(Naming {
                manifest_name: self.manifest_name.clone(),
                ..Naming::default()
            });
        let invocation = self
            .builder
            .build(&request, source, OverwritePolicy::Overwrite)
            .stage(Stage::Validate)?;

        std::fs::create_dir_all(output_dir).stage(Stage::Prepare)?;
        let claim = self.runner.claim(&invocation).stage(Stage::Prepare)?;

        let manifest_path = output_dir.join(&self.manifest_name);
        let temp_path = output_dir.join(format!("{}.tmp", self.manifest_name));
        let cue_path = output_dir.join(CUE_LIST_NAME);

        remove_stale(output_dir, &[&manifest_path, &temp_path, &cue_path]).stage(Stage::Prepare)?;

        tracing::info!(
            source = %source.path().display(),
            output = %output_dir.display(),
            segment_duration,
            expected_segments = invocation.expected_segments(),
            "HLS transcode"
        );

        let result = async {
            let outcome = self
                .runner
                .run_claimed(&invocation, &claim)
                .await
                .stage(Stage::Engine)?;

            let segments = collect_segments(output_dir, &cue_path).stage(Stage::Collect)?;
            if let Some(expected) = invocation.expected_segments() {
                if segments.len() as u64 != expected {
                    tracing::warn!(
                        expected,
                        produced = segments.len(),
                        "segment count differs from duration / segment length"
                    );
                }
            }

            let manifest = Manifest::from_segments(segments).stage(Stage::Collect)?;
            std::fs::write(&temp_path, manifest.render()).stage(Stage::Publish)?;
            std::fs::rename(&temp_path, &manifest_path).stage(Stage::Publish)?;

            tracing::info!(
                manifest = %manifest_path.display(),
                segments = manifest.segment_count(),
                target_duration = manifest.target_duration,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "HLS manifest published"
            );
            Ok::<_, Error>(manifest)
        }
        .await;

        match result {
            Ok(manifest) => {
                if let Err(e) = std::fs::remove_file(&cue_path) {
                    tracing::debug!(error = %e, "could not remove cue list");
                }
                Ok(HlsOutput {
                    manifest,
                    manifest_path,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "HLS transcode failed; removing partial output");
                if let Err(cleanup) = remove_stale(output_dir, &[&temp_path, &cue_path]) {
                    tracing::warn!(error = %cleanup, "cleanup incomplete");
                }
                Err(e)
            }
        }
    }
}

/// Read the cue list and cross-check it against the segment files on disk.
///
/// Both must describe exactly `segment_00000.ts` .. `segment_{N-1}.ts`.
fn collect_segments(dir: &Path, cue_path: &Path) -> Result<Vec<Segment>> {
    let text = std::fs::read_to_string(cue_path).map_err(|e| {
        Error::CorruptSegmentSet(format!("cue list {} unreadable: {e}", cue_path.display()))
    })?;
    let cues = parse_cue_list(&text)?;
    if cues.is_empty() {
        return Err(Error::CorruptSegmentSet("engine produced no segments".into()));
    }

    let on_disk = segment_files(dir)?;

    let mut segments = Vec::with_capacity(cues.len());
    for (i, cue) in cues.iter().enumerate() {
        let expected = segment_file_name(i as u64);
        let listed = Path::new(&cue.file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if listed != expected {
            return Err(Error::CorruptSegmentSet(format!(
                "cue {i} names {listed}, expected {expected}"
            )));
        }
        if !on_disk.contains(&(i as u64)) {
            return Err(Error::CorruptSegmentSet(format!("{expected} is missing")));
        }
        segments.push(Segment::new(i as u64, cue.duration(), expected)?);
    }

    if let Some(stray) = on_disk.iter().find(|&&idx| idx >= cues.len() as u64) {
        return Err(Error::CorruptSegmentSet(format!(
            "{} is not in the cue list",
            segment_file_name(*stray)
        )));
    }

    Ok(segments)
}

/// Indices of every `segment_NNNNN.ts` file in `dir`.
fn segment_files(dir: &Path) -> Result<BTreeSet<u64>> {
    let mut indices = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(idx) = entry.file_name().to_str().and_then(segment_index) {
            indices.insert(idx);
        }
    }
    Ok(indices)
}

/// Delete every segment file in `dir` plus the given extra paths.
fn remove_stale(dir: &Path, extra: &[&PathBuf]) -> Result<()> {
    let mut removed = 0usize;
    for idx in segment_files(dir)? {
        remove_if_present(&dir.join(segment_file_name(idx)))?;
        removed += 1;
    }
    for path in extra {
        remove_if_present(path)?;
    }
    if removed > 0 {
        tracing::debug!(dir = %dir.display(), removed, "removed stale segments");
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_segments(dir: &Path, durations: &[f64]) {
        let mut cues = String::new();
        let mut t = 0.0;
        for (i, d) in durations.iter().enumerate() {
            let name = segment_file_name(i as u64);
            std::fs::write(dir.join(&name), b"ts").unwrap();
            cues.push_str(&format!("{name},{t:.6},{:.6}\n", t + d));
            t += d;
        }
        std::fs::write(dir.join(CUE_LIST_NAME), cues).unwrap();
    }

    #[test]
    fn collect_contiguous_segments() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path(), &[6.0, 6.0, 2.5]);
        let segments = collect_segments(dir.path(), &dir.path().join(CUE_LIST_NAME)).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2].duration_us, 2_500_000);
        assert_eq!(segments[2].uri, "segment_00002.ts");
    }

    #[test]
    fn collect_detects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path(), &[6.0, 6.0, 2.5]);
        std::fs::remove_file(dir.path().join("segment_00001.ts")).unwrap();
        let err = collect_segments(dir.path(), &dir.path().join(CUE_LIST_NAME)).unwrap_err();
        assert!(matches!(err, Error::CorruptSegmentSet(_)));
    }

    #[test]
    fn collect_detects_stray_file() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path(), &[6.0, 1.0]);
        std::fs::write(dir.path().join("segment_00005.ts"), b"ts").unwrap();
        let err = collect_segments(dir.path(), &dir.path().join(CUE_LIST_NAME)).unwrap_err();
        assert!(err.to_string().contains("segment_00005.ts"));
    }

    #[test]
    fn collect_requires_cue_list() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_segments(dir.path(), &dir.path().join(CUE_LIST_NAME)).unwrap_err();
        assert!(matches!(err, Error::CorruptSegmentSet(_)));
    }

    #[test]
    fn remove_stale_keeps_other_files() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path(), &[6.0, 6.0]);
        std::fs::write(dir.path().join("player.html"), b"<html>").unwrap();
        let cue = dir.path().join(CUE_LIST_NAME);
        remove_stale(dir.path(), &[&cue]).unwrap();

        let left: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(left, vec!["player.html".to_string()]);
    }
}
