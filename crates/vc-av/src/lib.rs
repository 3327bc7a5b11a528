//! # vc-av
//!
//! Engine orchestration for the vidcast pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find ffmpeg and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout and
//!   cancellation support for running external processes.
//! - **Probing** ([`probe`]) -- turn an input file into a [`vc_core::MediaSource`].
//! - **Argument construction** ([`CommandBuilder`]) -- pure mapping from an
//!   [`OperationRequest`] to an [`EngineInvocation`].
//! - **Execution** ([`ProcessRunner`]) -- one engine run per output path at a
//!   time, with progress logged for long encodes ([`progress`]).
//! - **Operations** ([`SnapshotSplicer`], [`HlsEncoder`]) -- the user-facing
//!   snapshot, splice, thumbnail and HLS transcode flows.

pub mod builder;
pub mod command;
pub mod hls;
pub mod probe;
pub mod progress;
pub mod runner;
pub mod splicer;
pub mod tools;

// ---- Re-exports for convenience ----

pub use builder::{CommandBuilder, EngineInvocation, Naming, Operation, OperationRequest};
pub use command::{ToolCommand, ToolOutput};
pub use hls::{HlsEncoder, HlsOutput};
pub use probe::{probe_report, probe_source, ProbeReport};
pub use progress::{parse_progress_line, ProgressLine, ProgressTracker};
pub use runner::{OutputClaim, ProcessRunner, RunOutcome};
pub use splicer::SnapshotSplicer;
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
