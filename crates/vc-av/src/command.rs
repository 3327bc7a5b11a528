//! Builder for executing external tool commands with timeout and
//! cancellation support.

use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use vc_core::Error;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// The child is spawned with `kill_on_drop`, so when the timeout fires or the
/// cancellation token is triggered the process is killed rather than left
/// running in the background.
///
/// # Example
///
/// ```no_run
/// use vc_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> vc_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("quiet")
///     .arg("-print_format").arg("json")
///     .arg("-show_format")
///     .arg("/path/to/video.mp4")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    cancel: Option<CancellationToken>,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            cancel: None,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Kill the process when `token` is cancelled.
    pub fn cancel_on(&mut self, token: CancellationToken) -> &mut Self {
        self.cancel = Some(token);
        self
    }

    /// Short name of the program, for logs and errors.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command and require a zero exit status.
    ///
    /// # Errors
    ///
    /// - [`Error::EngineFailure`] if the process exits with a non-zero status
    ///   (diagnostics carry the trimmed stderr).
    /// - [`Error::EngineTimeout`] if the process outlives the timeout.
    /// - [`Error::Cancelled`] if the cancellation token fires first.
    /// - [`Error::Tool`] if spawning or waiting on the process fails.
    pub async fn execute(&self) -> vc_core::Result<ToolOutput> {
        require_success(self.output().await?)
    }

    /// Like [`Self::execute`] but hands every stdout line to `on_line` as it
    /// arrives. Used with `-progress pipe:1` to follow a long encode.
    ///
    /// Stdout is still captured in the returned [`ToolOutput`].
    pub async fn execute_with_stdout_callback(
        &self,
        mut on_line: impl FnMut(&str),
    ) -> vc_core::Result<ToolOutput> {
        let program_name = self.program_name();
        let mut child = self.spawn(&program_name)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async move {
            let read_stdout = async {
                let mut captured = String::new();
                if let Some(out) = stdout {
                    let mut lines = BufReader::new(out).lines();
                    while let Some(line) = lines.next_line().await? {
                        on_line(&line);
                        captured.push_str(&line);
                        captured.push('\n');
                    }
                }
                Ok::<_, std::io::Error>(captured)
            };
            let read_stderr = async {
                let mut buf = Vec::new();
                if let Some(mut err) = stderr {
                    err.read_to_end(&mut buf).await?;
                }
                Ok::<_, std::io::Error>(buf)
            };

            let (stdout, stderr) = tokio::try_join!(read_stdout, read_stderr)?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>(ToolOutput {
                status,
                stdout,
                stderr: String::from_utf8_lossy(&stderr).to_string(),
            })
        };

        require_success(self.supervise(&program_name, run).await?)
    }

    /// Execute the command and return its output whatever the exit status.
    ///
    /// Timeout, cancellation and spawn failures are still errors.
    pub async fn output(&self) -> vc_core::Result<ToolOutput> {
        let program_name = self.program_name();
        let child = self.spawn(&program_name)?;

        let run = async move {
            let output = child.wait_with_output().await?;
            Ok::<_, std::io::Error>(ToolOutput {
                status: output.status,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        };

        self.supervise(&program_name, run).await
    }

    fn spawn(&self, program_name: &str) -> vc_core::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(tool = %program_name, args = ?self.args, "spawning");

        cmd.spawn().map_err(|e| Error::Tool {
            tool: program_name.to_string(),
            message: format!("failed to spawn: {e}"),
        })
    }

    /// Drive `run` under the timeout and cancellation token.
    ///
    /// `run` owns the child, so dropping it on timeout or cancellation kills
    /// the process.
    async fn supervise(
        &self,
        program_name: &str,
        run: impl Future<Output = std::io::Result<ToolOutput>>,
    ) -> vc_core::Result<ToolOutput> {
        let wait = tokio::time::timeout(self.timeout, run);

        let result = match &self.cancel {
            Some(token) => tokio::select! {
                res = wait => res,
                _ = token.cancelled() => {
                    tracing::warn!(tool = %program_name, "cancelled; killing process");
                    return Err(Error::Cancelled);
                }
            },
            None => wait.await,
        };

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(Error::Tool {
                tool: program_name.to_string(),
                message: format!("I/O error waiting for process: {e}"),
            }),
            Err(_elapsed) => {
                tracing::warn!(tool = %program_name, timeout = ?self.timeout, "timed out; killing process");
                Err(Error::EngineTimeout {
                    timeout: self.timeout,
                })
            }
        }
    }
}

fn require_success(output: ToolOutput) -> vc_core::Result<ToolOutput> {
    if !output.status.success() {
        return Err(Error::EngineFailure {
            exit_code: output.status.code(),
            diagnostics: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn execute_echo() {
        // `echo` should be universally available.
        let output = ToolCommand::new(PathBuf::from("echo"))
            .arg("hello")
            .execute()
            .await;

        match output {
            Ok(out) => {
                assert!(out.status.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_tool() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute()
            .await;
        assert!(matches!(result, Err(Error::Tool { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_engine_failure() {
        let result = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo broken input >&2; exit 3"])
            .execute()
            .await;
        match result {
            Err(Error::EngineFailure {
                exit_code,
                diagnostics,
            }) => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(diagnostics, "broken input");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_tolerates_non_zero_exit() {
        let out = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo banner >&2; exit 1"])
            .output()
            .await
            .unwrap();
        assert!(!out.status.success());
        assert!(out.stderr.contains("banner"));
    }

    #[tokio::test]
    async fn timeout_fires() {
        // `sleep 10` should be killed well before 10 seconds.
        let started = Instant::now();
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute()
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        let err = result.unwrap_err();
        assert!(matches!(err, Error::EngineTimeout { .. }), "unexpected error: {err}");
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_kills_process() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .cancel_on(token)
            .execute()
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_lines_reach_callback() {
        let mut seen = Vec::new();
        let out = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo out_time_us=1000000; echo progress=end; echo done >&2"])
            .execute_with_stdout_callback(|line| seen.push(line.to_string()))
            .await
            .unwrap();
        assert_eq!(seen, ["out_time_us=1000000", "progress=end"]);
        assert!(out.stdout.contains("progress=end"));
        assert_eq!(out.stderr.trim(), "done");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_callback_still_checks_exit_status() {
        let result = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo progress=continue; echo bad >&2; exit 2"])
            .execute_with_stdout_callback(|_| {})
            .await;
        assert!(matches!(
            result,
            Err(Error::EngineFailure {
                exit_code: Some(2),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn stdout_callback_honors_timeout() {
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute_with_stdout_callback(|_| {})
            .await;
        assert!(matches!(result, Err(Error::EngineTimeout { .. })));
    }
}
