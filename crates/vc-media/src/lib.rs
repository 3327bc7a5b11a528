//! vc-media: HLS playlist types, generation, and parsing.
//!
//! # Modules
//!
//! - [`hls`] - VOD media playlists (M3U8), the segment muxer's cue list, and
//!   the fixed segment naming scheme

pub mod hls;

// Re-export commonly used items at the crate root.
pub use hls::{
    parse_cue_list, parse_manifest, render_manifest, segment_file_name, segment_index,
    write_manifest, Cue, Manifest, Segment,
};
