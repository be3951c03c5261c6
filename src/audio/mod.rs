//! Audio container handling.
//!
//! Parses WAV segments returned by the engine and merges them into a single track.

pub mod wav;

pub use wav::{MIN_WAV_SIZE, WavError, WavFormat, WavSegment, merge, merge_bytes, parse};
