//! Snapshot, snapshot-series, thumbnail and splice operations.

use std::path::PathBuf;

use vc_core::config::OverwritePolicy;
use vc_core::{Error, MediaSource, Result, Stage, StageExt};

use crate::builder::{CommandBuilder, Operation, OperationRequest};
use crate::runner::ProcessRunner;

/// Produces still images and trimmed clips into an output directory.
///
/// Existing outputs are handled by the configured [`OverwritePolicy`]:
///
/// - `Skip`: a complete set of existing outputs is returned as-is without
///   running the engine, since names are deterministic; a partial set is a
///   [`Error::Conflict`].
/// - `Overwrite`: the engine replaces whatever is there.
/// - `Error`: any existing output is a [`Error::Conflict`].
///
/// Output paths are claimed before the existence check, so a request whose
/// outputs another run is still writing fails with [`Error::OutputBusy`]
/// instead of seeing half-written files. When the engine fails, outputs that
/// did not exist before the run are deleted again, so a retry is not blocked
/// by the frames a failed series left behind.
#[derive(Debug, Clone)]
pub struct SnapshotSplicer {
    builder: CommandBuilder,
    runner: ProcessRunner,
    overwrite: OverwritePolicy,
}

impl SnapshotSplicer {
    pub fn new(builder: CommandBuilder, runner: ProcessRunner, overwrite: OverwritePolicy) -> Self {
        Self {
            builder,
            runner,
            overwrite,
        }
    }

    /// Run `request` against `source` and return the paths it produced.
    pub async fn run(
        &self,
        request: &OperationRequest,
        source: &MediaSource,
    ) -> Result<Vec<PathBuf>> {
        if matches!(request.op, Operation::HlsTranscode { .. }) {
            return Err(
                Error::invalid("HLS transcodes are handled by the HLS encoder").at(Stage::Validate),
            );
        }

        let invocation = self
            .builder
            .build(request, source, self.overwrite)
            .stage(Stage::Validate)?;

        std::fs::create_dir_all(&request.output_dir).stage(Stage::Prepare)?;
        let claim = self.runner.claim(&invocation).stage(Stage::Prepare)?;

        let existing: Vec<&PathBuf> = invocation
            .outputs()
            .iter()
            .filter(|p| p.exists())
            .collect();

        if !existing.is_empty() {
            match self.overwrite {
                OverwritePolicy::Skip if existing.len() == invocation.outputs().len() => {
                    tracing::info!(
                        op = invocation.label(),
                        outputs = existing.len(),
                        "outputs already present; skipping"
                    );
                    return Ok(invocation.outputs().to_vec());
                }
                OverwritePolicy::Skip | OverwritePolicy::Error => {
                    return Err(Error::Conflict(format!(
                        "{} of {} outputs already exist (first: {})",
                        existing.len(),
                        invocation.outputs().len(),
                        existing[0].display()
                    ))
                    .at(Stage::Prepare));
                }
                OverwritePolicy::Overwrite => {
                    tracing::warn!(
                        op = invocation.label(),
                        outputs = existing.len(),
                        "overwriting existing outputs"
                    );
                }
            }
        }

        let fresh: Vec<&PathBuf> = invocation
            .outputs()
            .iter()
            .filter(|p| !existing.contains(p))
            .collect();

        let outcome = match self.runner.run_claimed(&invocation, &claim).await {
            Ok(outcome) => outcome,
            Err(e) => {
                remove_partial(&fresh);
                return Err(e.at(Stage::Engine));
            }
        };

        let missing: Vec<String> = outcome
            .outputs
            .iter()
            .filter(|p| !p.is_file())
            .map(|p| p.display().to_string())
            .collect();
        if !missing.is_empty() {
            let mut diagnostics = format!("engine exited cleanly but did not write: {}", missing.join(", "));
            if !outcome.diagnostics.trim().is_empty() {
                diagnostics.push('\n');
                diagnostics.push_str(outcome.diagnostics.trim());
            }
            remove_partial(&fresh);
            return Err(Error::EngineFailure {
                exit_code: Some(0),
                diagnostics,
            }
            .at(Stage::Collect));
        }

        tracing::info!(
            op = invocation.label(),
            outputs = outcome.outputs.len(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "done"
        );

        Ok(outcome.outputs)
    }
}

/// Delete whatever a failed run managed to write.
fn remove_partial(paths: &[&PathBuf]) {
    let mut removed = 0usize;
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove partial output"),
        }
    }
    if removed > 0 {
        tracing::debug!(removed, "removed partial outputs");
    }
}
