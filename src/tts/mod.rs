//! Speech synthesis pipeline against the VOICEVOX engine.
//!
//! Resolves a canonical synthesis query per utterance and renders it to audio.

mod query;
mod resolver;
mod synthesizer;
mod utterance;

pub use query::{
    AccentPhrase, DEFAULT_OUTPUT_SAMPLING_RATE, EngineSynthesisPayload, Mora, QueryError, SamplingRate, SynthesisQuery, normalize_query_response,
    to_engine_synthesis_payload,
};
pub use resolver::{QueryResolver, QuerySource, ResolvedQuery};
pub use synthesizer::{SynthesizedAudio, Synthesizer};
pub use utterance::{Utterance, VoiceSelector};
