//! Engine execution with per-output exclusivity.
//!
//! A [`ProcessRunner`] is cheap to clone; clones share the in-flight map, so
//! every run started through any clone sees the same claims.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use vc_core::{Error, Result};

use crate::builder::EngineInvocation;
use crate::command::ToolCommand;
use crate::progress::ProgressTracker;

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub outputs: Vec<PathBuf>,
    /// Anything the engine wrote to stderr.
    pub diagnostics: String,
    pub elapsed: Duration,
}

/// Runs engine invocations, at most one per output path at a time.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    engine: PathBuf,
    timeout: Duration,
    cancel: CancellationToken,
    in_flight: Arc<DashMap<PathBuf, &'static str>>,
}

impl ProcessRunner {
    pub fn new(engine: PathBuf, timeout: Duration) -> Self {
        Self {
            engine,
            timeout,
            cancel: CancellationToken::new(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Kill in-flight runs when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn engine(&self) -> &Path {
        &self.engine
    }

    /// Whether some run currently holds `path`.
    pub fn is_busy(&self, path: &Path) -> bool {
        self.in_flight.contains_key(&claim_key(path))
    }

    /// Run `invocation` to completion.
    ///
    /// Fails fast with [`Error::OutputBusy`] if another run holds any of its
    /// claimed paths; nothing is launched in that case. Never retries.
    pub async fn run(&self, invocation: &EngineInvocation) -> Result<RunOutcome> {
        let claim = self.claim(invocation)?;
        self.run_claimed(invocation, &claim).await
    }

    /// Run `invocation` under a claim taken earlier with [`Self::claim`], for
    /// callers that must prepare or publish files while holding the paths.
    pub async fn run_claimed(
        &self,
        invocation: &EngineInvocation,
        _claim: &OutputClaim,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        tracing::info!(op = invocation.label(), engine = %self.engine.display(), "engine started");

        let mut command = ToolCommand::new(self.engine.clone());
        command
            .args(invocation.args().iter().cloned())
            .timeout(self.timeout)
            .cancel_on(self.cancel.clone());

        let result = match invocation.progress_total() {
            Some(total) => {
                let op = invocation.label();
                let mut tracker = ProgressTracker::new(total);
                command
                    .execute_with_stdout_callback(|line| {
                        if let Some(percent) = tracker.observe(line) {
                            tracing::info!(op, percent, "progress");
                        }
                    })
                    .await
            }
            None => command.execute().await,
        };
        let elapsed = started.elapsed();

        match result {
            Ok(output) => {
                tracing::info!(
                    op = invocation.label(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "engine finished"
                );
                Ok(RunOutcome {
                    outputs: invocation.outputs().to_vec(),
                    diagnostics: output.stderr,
                    elapsed,
                })
            }
            Err(e) => {
                tracing::warn!(
                    op = invocation.label(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "engine failed"
                );
                Err(e)
            }
        }
    }

    /// Take every path `invocation` claims, or none of them.
    pub fn claim(&self, invocation: &EngineInvocation) -> Result<OutputClaim> {
        let mut claim = OutputClaim {
            map: Arc::clone(&self.in_flight),
            keys: Vec::with_capacity(invocation.claims().len()),
        };

        for path in invocation.claims() {
            let key = claim_key(path);
            match self.in_flight.entry(key.clone()) {
                Entry::Occupied(e) => {
                    let holder = *e.get();
                    // Release the shard lock before `claim` drops and removes
                    // what was taken so far.
                    drop(e);
                    tracing::debug!(path = %path.display(), holder, "output busy");
                    return Err(Error::busy(path));
                }
                Entry::Vacant(e) => {
                    e.insert(invocation.label());
                    claim.keys.push(key);
                }
            }
        }

        Ok(claim)
    }
}

/// Exclusive hold on a run's output paths. Released when dropped.
#[derive(Debug)]
pub struct OutputClaim {
    map: Arc<DashMap<PathBuf, &'static str>>,
    keys: Vec<PathBuf>,
}

impl Drop for OutputClaim {
    fn drop(&mut self) {
        for key in &self.keys {
            self.map.remove(key);
        }
    }
}

/// Canonical form of an output path: the resolved parent directory (when it
/// exists) joined with the file name.
fn claim_key(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .unwrap_or_else(|_| parent.to_path_buf())
            .join(name),
        _ => absolute,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::builder::{CommandBuilder, Operation, OperationRequest};
    use vc_core::config::OverwritePolicy;
    use std::os::unix::fs::PermissionsExt;
    use vc_core::MediaSource;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn invocation(dir: &Path) -> EngineInvocation {
        let source = MediaSource::new(dir.join("in.mp4"), 10.0, false).unwrap();
        CommandBuilder::default()
            .build(
                &OperationRequest::new(Operation::Snapshot { at: 1.0 }, dir),
                &source,
                OverwritePolicy::Skip,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn success_reports_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(PathBuf::from("true"), Duration::from_secs(5));
        let inv = invocation(dir.path());
        let outcome = runner.run(&inv).await.unwrap();
        assert_eq!(outcome.outputs, inv.outputs());
        assert!(!runner.is_busy(&inv.outputs()[0]));
    }

    #[tokio::test]
    async fn failure_is_engine_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(PathBuf::from("false"), Duration::from_secs(5));
        let err = runner.run(&invocation(dir.path())).await.unwrap_err();
        assert!(matches!(err, Error::EngineFailure { exit_code: Some(1), .. }));
    }

    #[tokio::test]
    async fn same_output_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let slow = script(dir.path(), "slow.sh", "sleep 1");
        let runner = ProcessRunner::new(slow, Duration::from_secs(10));
        let inv = invocation(dir.path());

        let first = {
            let runner = runner.clone();
            let inv = inv.clone();
            tokio::spawn(async move { runner.run(&inv).await })
        };

        // Wait until the first run holds its claim.
        while !runner.is_busy(&inv.outputs()[0]) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = runner.run(&inv).await.unwrap_err();
        assert!(matches!(err, Error::OutputBusy { .. }));

        first.await.unwrap().unwrap();
        assert!(!runner.is_busy(&inv.outputs()[0]));
    }

    #[tokio::test]
    async fn distinct_outputs_run_concurrently() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(PathBuf::from("true"), Duration::from_secs(5));
        let inv_a = invocation(dir_a.path());
        let inv_b = invocation(dir_b.path());
        let (a, b) = tokio::join!(runner.run(&inv_a), runner.run(&inv_b));
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn timeout_releases_claim() {
        let dir = tempfile::tempdir().unwrap();
        let hang = script(dir.path(), "hang.sh", "exec sleep 30");
        let runner = ProcessRunner::new(hang, Duration::from_millis(100));
        let inv = invocation(dir.path());
        let err = runner.run(&inv).await.unwrap_err();
        assert!(matches!(err, Error::EngineTimeout { .. }));
        assert!(!runner.is_busy(&inv.outputs()[0]));
    }

    #[test]
    fn claim_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(PathBuf::from("true"), Duration::from_secs(5));
        let series = CommandBuilder::default()
            .build(
                &OperationRequest::new(
                    Operation::SnapshotSeries {
                        start: 0.0,
                        interval: 1.0,
                        count: 3,
                    },
                    dir.path(),
                ),
                &MediaSource::new(dir.path().join("in.mp4"), 10.0, false).unwrap(),
                OverwritePolicy::Skip,
            )
            .unwrap();

        // Hold the last frame so the series claim fails part way.
        let single = runner.in_flight.insert(claim_key(&series.outputs()[2]), "test");
        assert!(single.is_none());

        let err = runner.claim(&series).unwrap_err();
        assert!(matches!(err, Error::OutputBusy { .. }));
        assert!(!runner.is_busy(&series.outputs()[0]));
        assert!(!runner.is_busy(&series.outputs()[1]));

        runner.in_flight.remove(&claim_key(&series.outputs()[2]));
        let claim = runner.claim(&series).unwrap();
        assert!(runner.is_busy(&series.outputs()[1]));
        drop(claim);
        assert!(!runner.is_busy(&series.outputs()[1]));
    }

    #[tokio::test]
    async fn progress_runs_still_fail_on_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let engine = script(
            dir.path(),
            "encode.sh",
            "echo out_time_us=500000\necho progress=continue\necho 'bad input' >&2\nexit 1",
        );
        let runner = ProcessRunner::new(engine, Duration::from_secs(5));
        let splice = CommandBuilder::default()
            .build(
                &OperationRequest::new(Operation::Splice { start: 0.0, end: 2.0 }, dir.path()),
                &MediaSource::new(dir.path().join("in.mp4"), 10.0, false).unwrap(),
                OverwritePolicy::Skip,
            )
            .unwrap();
        assert_eq!(splice.progress_total(), Some(2.0));

        let err = runner.run(&splice).await.unwrap_err();
        match err {
            Error::EngineFailure { diagnostics, .. } => assert_eq!(diagnostics, "bad input"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!runner.is_busy(&splice.outputs()[0]));
    }

    #[test]
    fn claim_keys_normalize() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("x.jpg");
        let b = dir.path().join(".").join("x.jpg");
        assert_eq!(claim_key(&a), claim_key(&b));
    }
}
