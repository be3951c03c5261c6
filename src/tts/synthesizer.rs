//! Speech synthesis through the engine's `/synthesis` endpoint.

use tracing::{debug, info};

use super::query::{SynthesisQuery, to_engine_synthesis_payload};
use super::utterance::VoiceSelector;
use crate::engine::{EngineClient, Operation, RequestError};

/// Raw audio returned by the engine for one utterance.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub wav: Vec<u8>,  // Container bytes, exactly as the engine sent them
    pub attempts: u32, // Engine attempts used
}

/// Text-to-speech synthesizer backed by the VOICEVOX engine.
pub struct Synthesizer<'a> {
    client: &'a EngineClient,
}

impl<'a> Synthesizer<'a> {
    pub fn new(client: &'a EngineClient) -> Self {
        Self { client }
    }

    /// Synthesize one utterance.
    ///
    /// # Arguments
    /// * `audio_key` - Utterance key (used in errors and logs)
    /// * `voice` - Voice selector; its style id is sent as `speaker`
    /// * `query` - Canonical query, mapped to the engine payload here
    ///
    /// # Returns
    /// The response body verbatim; the container format is not inspected.
    ///
    /// # Errors
    /// Returns a [`RequestError`] with operation `Synthesis` when the engine call fails.
    pub async fn synthesize(&self, audio_key: &str, voice: &VoiceSelector, query: &SynthesisQuery) -> Result<SynthesizedAudio, RequestError> {
        let endpoint = self.client.endpoint("synthesis", &[("speaker", &voice.style_id.to_string())]);

        let body = serde_json::to_vec(&to_engine_synthesis_payload(query)).map_err(|e| RequestError {
            operation: Operation::Synthesis,
            audio_key: audio_key.to_string(),
            endpoint: endpoint.clone(),
            attempts: 0,
            status_code: None,
            retriable: false,
            message: format!("Failed to encode synthesis payload for {}: {}", audio_key, e),
        })?;

        debug!("Synthesizing {} with style {}", audio_key, voice.style_id);
        let (response, attempts) = self.client.post(&endpoint, Some(body), Operation::Synthesis, audio_key).await?;

        info!("🎵 Synthesized {} ({} bytes, {} attempt(s))", audio_key, response.body.len(), attempts);
        Ok(SynthesizedAudio { wav: response.body, attempts })
    }
}
