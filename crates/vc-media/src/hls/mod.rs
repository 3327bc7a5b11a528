//! HLS playlist generation.
//!
//! Manifests are always complete on-demand playlists: every segment is known
//! before the text is produced, and the end marker is always emitted.

mod cues;
mod parser;
mod types;
mod writer;

pub use cues::{parse_cue_list, segment_file_name, segment_index, Cue, SEGMENT_PREFIX, SEGMENT_SUFFIX};
pub use parser::parse_manifest;
pub use types::{Manifest, Segment};
pub use writer::{render_manifest, target_duration, write_manifest};
