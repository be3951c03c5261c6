//! Resolves the synthesis query for an utterance.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::query::{QueryError, SynthesisQuery, normalize_query_response};
use super::utterance::Utterance;
use crate::engine::{EngineClient, Operation, RequestError};

/// Where a resolved query came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuerySource {
    /// Precomputed and carried by the utterance
    Supplied,
    /// Fetched from the engine's `/audio_query`
    Engine,
}

/// A query ready for synthesis.
#[derive(Debug, Clone)]
pub struct ResolvedQuery<'u> {
    pub query: Cow<'u, SynthesisQuery>,
    pub source: QuerySource,
    pub attempts: u32, // Engine attempts used (0 when supplied)
}

/// Resolves queries through the engine when the utterance does not carry one.
pub struct QueryResolver<'a> {
    client: &'a EngineClient,
}

impl<'a> QueryResolver<'a> {
    pub fn new(client: &'a EngineClient) -> Self {
        Self { client }
    }

    /// Resolve the synthesis query for `utterance`.
    ///
    /// A supplied query is returned as-is without touching the engine.
    ///
    /// # Errors
    /// Returns a [`RequestError`] with operation `AudioQuery` when the engine call fails
    /// or its response cannot be normalized.
    pub async fn resolve<'u>(&self, utterance: &'u Utterance) -> Result<ResolvedQuery<'u>, RequestError> {
        if let Some(query) = &utterance.query {
            debug!("Using supplied query for {}", utterance.audio_key);
            return Ok(ResolvedQuery { query: Cow::Borrowed(query), source: QuerySource::Supplied, attempts: 0 });
        }

        let style_id = utterance.voice.style_id.to_string();
        let endpoint = self.client.endpoint("audio_query", &[("text", &utterance.text), ("speaker", &style_id)]);
        let (response, attempts) = self.client.post(&endpoint, None, Operation::AudioQuery, &utterance.audio_key).await?;

        let query = normalize_query_response(&response.body).map_err(|e| {
            let message = match e {
                QueryError::EmptyAccentPhrases => format!("VOICEVOX audio_query produced empty accentPhrases for {}", utterance.audio_key),
                QueryError::Malformed(err) => format!("VOICEVOX audio_query returned a malformed query for {}: {}", utterance.audio_key, err),
            };
            RequestError {
                operation: Operation::AudioQuery,
                audio_key: utterance.audio_key.clone(),
                endpoint: endpoint.clone(),
                attempts,
                status_code: Some(response.status.as_u16()),
                retriable: false,
                message,
            }
        })?;

        debug!("Resolved query for {} from engine ({} accent phrases, {} attempts)", utterance.audio_key, query.accent_phrases.len(), attempts);
        Ok(ResolvedQuery { query: Cow::Owned(query), source: QuerySource::Engine, attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RetryPolicy;
    use crate::tts::VoiceSelector;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn utterance(query: Option<SynthesisQuery>) -> Utterance {
        Utterance {
            audio_key: "E01_U001".to_string(),
            text: "これはテストです。".to_string(),
            voice: VoiceSelector { engine_id: "engine".into(), speaker_id: "speaker".into(), style_id: 67 },
            query,
        }
    }

    fn client(server: &MockServer) -> EngineClient {
        EngineClient::new(&server.uri(), RetryPolicy { max_attempts: 3, base_delay_ms: 1, timeout_ms: 2000 }).unwrap()
    }

    #[tokio::test]
    async fn test_supplied_query_never_calls_engine() {
        let server = MockServer::start().await;
        let supplied = normalize_query_response(br#"{"accentPhrases": [{"moras": []}], "pitchScale": 0.3}"#).unwrap();
        let utterance = utterance(Some(supplied.clone()));

        let resolved = QueryResolver::new(&client(&server)).resolve(&utterance).await.unwrap();

        assert_eq!(resolved.source, QuerySource::Supplied);
        assert_eq!(resolved.attempts, 0);
        assert_eq!(*resolved.query, supplied);
        assert!(matches!(resolved.query, Cow::Borrowed(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetches_query_with_text_and_style() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio_query"))
            .and(query_param("text", "これはテストです。"))
            .and(query_param("speaker", "67"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accent_phrases": [{"moras": [], "accent": 2}]})))
            .expect(1)
            .mount(&server)
            .await;

        let utterance = utterance(None);
        let resolved = QueryResolver::new(&client(&server)).resolve(&utterance).await.unwrap();

        assert_eq!(resolved.source, QuerySource::Engine);
        assert_eq!(resolved.attempts, 1);
        assert_eq!(resolved.query.accent_phrases[0].accent, 2);
    }

    #[tokio::test]
    async fn test_empty_accent_phrases_is_non_retriable_query_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200).set_body_json(json!({"accent_phrases": []}))).mount(&server).await;

        let utterance = utterance(None);
        let err = QueryResolver::new(&client(&server)).resolve(&utterance).await.unwrap_err();

        assert_eq!(err.operation, Operation::AudioQuery);
        assert_eq!(err.attempts, 1);
        assert_eq!(err.status_code, Some(200));
        assert!(!err.retriable);
        assert!(err.message.contains("empty accentPhrases for E01_U001"));
    }
}
