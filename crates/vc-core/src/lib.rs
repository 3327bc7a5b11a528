//! vc-core: shared errors, configuration, and media-source types.
//!
//! Every other vc-* crate depends on this one for the unified [`Error`]
//! taxonomy and the [`MediaSource`] descriptor that flows through the
//! snapshot, splice, and HLS pipelines.

pub mod config;
pub mod error;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result, Stage, StageExt};
pub use media::*;
