//! VOICEVOX episode audio builder.
//!
//! Turns a stage-5 project into one merged WAV track per episode plus a manifest
//! recording what was attempted, what succeeded and why anything failed.

pub mod audio;
pub mod build;
pub mod engine;
pub mod tts;
