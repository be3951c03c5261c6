//! Canonical synthesis query and its mappings to and from the engine wire format.
//!
//! The engine (and older project files) may spell the accent-phrase list and the mora
//! fields either in camelCase or in snake_case. Decoding accepts both through the
//! `Wire*` mirror types; the canonical types below are the only shape the rest of the
//! crate sees. Encoding for `/synthesis` always emits the snake_case keys.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Sampling rate sent to the engine when a query asks for the engine default.
pub const DEFAULT_OUTPUT_SAMPLING_RATE: u32 = 24000;

/// Sentinel used on the wire for "use the engine default sampling rate".
const ENGINE_DEFAULT_SENTINEL: &str = "engineDefault";

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("malformed audio query: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("audio query produced empty accentPhrases")]
    EmptyAccentPhrases,
}

/// Requested output sampling rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingRate {
    Hz(u32),
    #[default]
    EngineDefault,
}

impl SamplingRate {
    /// Concrete rate to send to the engine.
    pub fn resolve(self) -> u32 {
        match self {
            SamplingRate::Hz(rate) => rate,
            SamplingRate::EngineDefault => DEFAULT_OUTPUT_SAMPLING_RATE,
        }
    }

    /// Anything other than a positive integer falls back to the engine default.
    fn from_value(value: &Value) -> Self {
        value.as_u64().filter(|rate| *rate > 0).and_then(|rate| u32::try_from(rate).ok()).map(SamplingRate::Hz).unwrap_or_default()
    }
}

impl Serialize for SamplingRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SamplingRate::Hz(rate) => serializer.serialize_u32(*rate),
            SamplingRate::EngineDefault => serializer.serialize_str(ENGINE_DEFAULT_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for SamplingRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(SamplingRate::from_value(&value))
    }
}

/// One sound unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireMora")]
pub struct Mora {
    pub text: String,
    pub vowel: String,
    pub vowel_length: f64,
    pub pitch: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consonant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consonant_length: Option<f64>,
}

/// A pitch-accent grouping of moras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireAccentPhrase")]
pub struct AccentPhrase {
    pub moras: Vec<Mora>,
    pub accent: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_mora: Option<Mora>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_interrogative: Option<bool>,
}

/// Canonical synthesis query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireQuery")]
pub struct SynthesisQuery {
    pub accent_phrases: Vec<AccentPhrase>,
    pub speed_scale: f64,
    pub pitch_scale: f64,
    pub intonation_scale: f64,
    pub volume_scale: f64,
    pub pause_length_scale: f64,
    pub pre_phoneme_length: f64,
    pub post_phoneme_length: f64,
    pub output_sampling_rate: SamplingRate,
    pub output_stereo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kana: Option<String>,
}

// Wire mirrors: both spellings accepted, absent fields take the engine's defaults.

fn one() -> f64 {
    1.0
}

fn default_phoneme_length() -> f64 {
    0.1
}

fn default_accent() -> u32 {
    1
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMora {
    #[serde(default)]
    text: String,
    #[serde(default)]
    vowel: String,
    #[serde(default, alias = "vowel_length")]
    vowel_length: f64,
    #[serde(default)]
    pitch: f64,
    #[serde(default)]
    consonant: Option<String>,
    #[serde(default, alias = "consonant_length")]
    consonant_length: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAccentPhrase {
    #[serde(default)]
    moras: Vec<Mora>,
    #[serde(default = "default_accent")]
    accent: u32,
    #[serde(default, alias = "pause_mora")]
    pause_mora: Option<Mora>,
    #[serde(default, alias = "is_interrogative")]
    is_interrogative: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQuery {
    #[serde(default, alias = "accent_phrases")]
    accent_phrases: Vec<AccentPhrase>,
    #[serde(default = "one")]
    speed_scale: f64,
    #[serde(default)]
    pitch_scale: f64,
    #[serde(default = "one")]
    intonation_scale: f64,
    #[serde(default = "one")]
    volume_scale: f64,
    #[serde(default = "one")]
    pause_length_scale: f64,
    #[serde(default = "default_phoneme_length")]
    pre_phoneme_length: f64,
    #[serde(default = "default_phoneme_length")]
    post_phoneme_length: f64,
    #[serde(default)]
    output_sampling_rate: SamplingRate,
    #[serde(default)]
    output_stereo: bool,
    #[serde(default)]
    kana: Option<String>,
}

impl From<WireMora> for Mora {
    fn from(raw: WireMora) -> Self {
        Self {
            text: raw.text,
            vowel: raw.vowel,
            vowel_length: raw.vowel_length,
            pitch: raw.pitch,
            consonant: raw.consonant,
            consonant_length: raw.consonant_length,
        }
    }
}

impl From<WireAccentPhrase> for AccentPhrase {
    fn from(raw: WireAccentPhrase) -> Self {
        Self { moras: raw.moras, accent: raw.accent, pause_mora: raw.pause_mora, is_interrogative: raw.is_interrogative }
    }
}

impl From<WireQuery> for SynthesisQuery {
    fn from(raw: WireQuery) -> Self {
        Self {
            accent_phrases: raw.accent_phrases,
            speed_scale: raw.speed_scale,
            pitch_scale: raw.pitch_scale,
            intonation_scale: raw.intonation_scale,
            volume_scale: raw.volume_scale,
            pause_length_scale: raw.pause_length_scale,
            pre_phoneme_length: raw.pre_phoneme_length,
            post_phoneme_length: raw.post_phoneme_length,
            output_sampling_rate: raw.output_sampling_rate,
            output_stereo: raw.output_stereo,
            kana: raw.kana,
        }
    }
}

/// Normalize an `/audio_query` response body into the canonical query.
///
/// # Errors
/// Returns [`QueryError::Malformed`] if the body is not a query object and
/// [`QueryError::EmptyAccentPhrases`] if the engine could not segment the text.
pub fn normalize_query_response(raw: &[u8]) -> Result<SynthesisQuery, QueryError> {
    let value: Value = serde_json::from_slice(raw)?;
    if !value.is_object() {
        return Err(QueryError::Malformed(serde::de::Error::custom("audio query must be a JSON object")));
    }

    let query: SynthesisQuery = serde_json::from_value(value)?;
    if query.accent_phrases.is_empty() {
        return Err(QueryError::EmptyAccentPhrases);
    }
    Ok(query)
}

/// Body of a `/synthesis` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSynthesisPayload<'a> {
    #[serde(rename = "accent_phrases")]
    accent_phrases: Vec<EngineAccentPhrase<'a>>,
    speed_scale: f64,
    pitch_scale: f64,
    intonation_scale: f64,
    volume_scale: f64,
    pause_length_scale: f64,
    pre_phoneme_length: f64,
    post_phoneme_length: f64,
    output_sampling_rate: u32,
    output_stereo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    kana: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct EngineAccentPhrase<'a> {
    moras: Vec<EngineMora<'a>>,
    accent: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pause_mora: Option<EngineMora<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_interrogative: Option<bool>,
}

#[derive(Debug, Serialize)]
struct EngineMora<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    consonant: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    consonant_length: Option<f64>,
    vowel: &'a str,
    vowel_length: f64,
    pitch: f64,
}

impl<'a> From<&'a Mora> for EngineMora<'a> {
    fn from(mora: &'a Mora) -> Self {
        Self {
            text: &mora.text,
            consonant: mora.consonant.as_deref(),
            consonant_length: mora.consonant_length,
            vowel: &mora.vowel,
            vowel_length: mora.vowel_length,
            pitch: mora.pitch,
        }
    }
}

/// Map a canonical query to the `/synthesis` body.
///
/// The engine-default sampling rate sentinel is resolved here and only here.
pub fn to_engine_synthesis_payload(query: &SynthesisQuery) -> EngineSynthesisPayload<'_> {
    EngineSynthesisPayload {
        accent_phrases: query
            .accent_phrases
            .iter()
            .map(|phrase| EngineAccentPhrase {
                moras: phrase.moras.iter().map(EngineMora::from).collect(),
                accent: phrase.accent,
                pause_mora: phrase.pause_mora.as_ref().map(EngineMora::from),
                is_interrogative: phrase.is_interrogative,
            })
            .collect(),
        speed_scale: query.speed_scale,
        pitch_scale: query.pitch_scale,
        intonation_scale: query.intonation_scale,
        volume_scale: query.volume_scale,
        pause_length_scale: query.pause_length_scale,
        pre_phoneme_length: query.pre_phoneme_length,
        post_phoneme_length: query.post_phoneme_length,
        output_sampling_rate: query.output_sampling_rate.resolve(),
        output_stereo: query.output_stereo,
        kana: query.kana.as_deref(),
    }
}
