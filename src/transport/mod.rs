//! Row transport
//!
//! Rows leave a collect node as encoded batches inside length-prefixed
//! frames. The payload layout is owned by the phase's
//! [`RowStreamer`](crate::planner::streamer::RowStreamer); this module only
//! frames it.

pub mod codec;

pub use codec::{decode_frame, decode_rows, encode_frame, encode_rows, read_frames, MAX_FRAME_SIZE};
