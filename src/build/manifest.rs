//! Per-episode build manifest.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::BuildError;
use crate::engine::{Operation, RetryPolicy};
use crate::tts::{QuerySource, VoiceSelector};

pub const SCHEMA_VERSION: &str = "1.0";

/// File name of the manifest inside the audio directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: String,
    pub meta: ManifestMeta,
    pub engine: EngineInfo,
    pub parameters: RetryParameters,
    pub output: OutputInfo,
    pub utterances: Vec<ManifestEntry>,
    pub summary: Summary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMeta {
    pub project_id: String,
    pub run_id: String,
    pub episode_id: String,
    pub source_vvproj: String,
    pub generated_at: String, // RFC 3339, UTC
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub url: String,
    pub app_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryParameters {
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_ms: u64,
}

impl From<RetryPolicy> for RetryParameters {
    fn from(policy: RetryPolicy) -> Self {
        Self { retry_max_attempts: policy.max_attempts, retry_base_delay_ms: policy.base_delay_ms, request_timeout_ms: policy.timeout_ms }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_wav_path: Option<String>, // Relative to the run dir
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Succeeded,
    Failed,
}

/// Pipeline stage at which an utterance failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Query,
    Synthesis,
    Merge,
}

impl From<Operation> for FailureStage {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::AudioQuery => FailureStage::Query,
            Operation::Synthesis => FailureStage::Synthesis,
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Query => write!(f, "query"),
            FailureStage::Synthesis => write!(f, "synthesis"),
            FailureStage::Merge => write!(f, "merge"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attempts {
    pub audio_query: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<u32>, // Absent when synthesis never ran
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryError {
    pub stage: FailureStage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub retriable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub audio_key: String,
    pub text: String,
    pub voice: VoiceSelector,
    pub query_source: QuerySource,
    pub wav_path: String, // Merged track holding this utterance, relative to the run dir
    pub status: EntryStatus,
    pub attempts: Attempts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EntryError>,
}

impl ManifestEntry {
    pub fn is_succeeded(&self) -> bool {
        self.status == EntryStatus::Succeeded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl Summary {
    pub fn from_entries(entries: &[ManifestEntry]) -> Self {
        let succeeded = entries.iter().filter(|e| e.is_succeeded()).count();
        Self { total: entries.len(), succeeded, failed: entries.len() - succeeded }
    }
}

impl Manifest {
    /// Serialize as pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Write the manifest to `path`, replacing any previous file.
    pub async fn write(&self, path: &Path) -> Result<(), BuildError> {
        let json = self.to_json().map_err(BuildError::EncodeManifest)?;
        tokio::fs::write(path, json).await.map_err(|source| BuildError::Io { path: path.to_path_buf(), source })
    }
}
