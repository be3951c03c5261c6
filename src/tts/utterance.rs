//! Utterance and voice selector types handed to the synthesis pipeline.

use serde::{Deserialize, Serialize};

use super::query::SynthesisQuery;

/// Engine voice and style that renders an utterance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSelector {
    pub engine_id: String,
    pub speaker_id: String,
    pub style_id: u32, // Passed to the engine as `speaker`
}

/// One unit of text to synthesize, addressed by a stable key.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub audio_key: String,
    pub text: String,
    pub voice: VoiceSelector,
    pub query: Option<SynthesisQuery>, // Precomputed query, if the project supplied one
}
