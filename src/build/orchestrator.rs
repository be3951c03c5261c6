//! Per-episode audio build: query, synthesize, merge, record.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

use super::BuildError;
use super::manifest::{
    Attempts, EngineInfo, EntryError, EntryStatus, FailureStage, MANIFEST_FILE_NAME, Manifest, ManifestEntry, ManifestMeta, OutputInfo,
    SCHEMA_VERSION, Summary,
};
use super::project::{BuildIdentity, Project};
use crate::audio::{self, WavError};
use crate::engine::{EngineClient, RequestError};
use crate::tts::{QueryResolver, QuerySource, Synthesizer, Utterance, VoiceSelector};

/// Audio directory name inside a run directory.
pub const AUDIO_DIR_NAME: &str = "audio";

/// Inputs for one build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub project_path: PathBuf,
    pub run_dir: Option<PathBuf>, // Inferred from the project path when absent
    pub concurrency: usize,       // Utterances in flight at once
}

impl BuildOptions {
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self { project_path: project_path.into(), run_dir: None, concurrency: 1 }
    }

    pub fn with_run_dir(mut self, run_dir: impl Into<PathBuf>) -> Self {
        self.run_dir = Some(run_dir.into());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// One failed utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildFailure {
    pub audio_key: String,
    pub stage: FailureStage,
    pub message: String,
    pub status_code: Option<u16>,
    pub attempts: u32,
    pub retriable: bool,
}

impl From<RequestError> for BuildFailure {
    fn from(err: RequestError) -> Self {
        Self {
            audio_key: err.audio_key,
            stage: err.operation.into(),
            message: err.message,
            status_code: err.status_code,
            attempts: err.attempts,
            retriable: err.retriable,
        }
    }
}

impl BuildFailure {
    fn missing_item(audio_key: &str) -> Self {
        Self {
            audio_key: audio_key.to_string(),
            stage: FailureStage::Query,
            message: format!("Missing audio item for key: {}", audio_key),
            status_code: None,
            attempts: 1,
            retriable: false,
        }
    }

    fn invalid_audio(audio_key: &str, err: &WavError, attempts: u32) -> Self {
        Self {
            audio_key: audio_key.to_string(),
            stage: FailureStage::Synthesis,
            message: format!("VOICEVOX synthesis returned invalid audio for {}: {}", audio_key, err),
            status_code: None,
            attempts,
            retriable: false,
        }
    }

    fn entry_error(&self) -> EntryError {
        EntryError { stage: self.stage, message: self.message.clone(), status_code: self.status_code, retriable: self.retriable }
    }
}

/// What a finished build produced.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub manifest_path: PathBuf,
    pub audio_dir: PathBuf,
    pub merged_wav_path: Option<PathBuf>,
    pub episode_id: String,
    pub utterance_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub failures: Vec<BuildFailure>,
}

/// Terminal state of one utterance.
enum Outcome {
    Succeeded { wav: Vec<u8>, source: QuerySource, query_attempts: u32, synthesis_attempts: u32 },
    FailedAtQuery { source: QuerySource, failure: BuildFailure },
    FailedAtSynthesis { source: QuerySource, query_attempts: u32, failure: BuildFailure },
}

impl Outcome {
    fn failure(&self) -> Option<&BuildFailure> {
        match self {
            Outcome::Succeeded { .. } => None,
            Outcome::FailedAtQuery { failure, .. } | Outcome::FailedAtSynthesis { failure, .. } => Some(failure),
        }
    }
}

async fn process_utterance(client: &EngineClient, utterance: &Utterance) -> Outcome {
    let initial_source = if utterance.query.is_some() { QuerySource::Supplied } else { QuerySource::Engine };

    let resolved = match QueryResolver::new(client).resolve(utterance).await {
        Ok(resolved) => resolved,
        Err(err) => return Outcome::FailedAtQuery { source: initial_source, failure: err.into() },
    };

    let audio = match Synthesizer::new(client).synthesize(&utterance.audio_key, &utterance.voice, &resolved.query).await {
        Ok(audio) => audio,
        Err(err) => return Outcome::FailedAtSynthesis { source: resolved.source, query_attempts: resolved.attempts, failure: err.into() },
    };

    // A 200 with an unusable body fails this utterance only, never the merge.
    if let Err(err) = audio::parse(&audio.wav) {
        let failure = BuildFailure::invalid_audio(&utterance.audio_key, &err, audio.attempts);
        return Outcome::FailedAtSynthesis { source: resolved.source, query_attempts: resolved.attempts, failure };
    }

    Outcome::Succeeded { wav: audio.wav, source: resolved.source, query_attempts: resolved.attempts, synthesis_attempts: audio.attempts }
}

fn manifest_entry(audio_key: &str, utterance: Option<&Utterance>, outcome: &Outcome, wav_path: &str) -> ManifestEntry {
    let (text, voice) = match utterance {
        Some(u) => (u.text.clone(), u.voice.clone()),
        None => (String::new(), VoiceSelector::default()),
    };

    let (query_source, status, attempts) = match outcome {
        Outcome::Succeeded { source, query_attempts, synthesis_attempts, .. } => {
            (*source, EntryStatus::Succeeded, Attempts { audio_query: *query_attempts, synthesis: Some(*synthesis_attempts) })
        }
        Outcome::FailedAtQuery { source, failure } => (*source, EntryStatus::Failed, Attempts { audio_query: failure.attempts, synthesis: None }),
        Outcome::FailedAtSynthesis { source, query_attempts, failure } => {
            (*source, EntryStatus::Failed, Attempts { audio_query: *query_attempts, synthesis: Some(failure.attempts) })
        }
    };

    ManifestEntry {
        audio_key: audio_key.to_string(),
        text,
        voice,
        query_source,
        wav_path: wav_path.to_string(),
        status,
        attempts,
        error: outcome.failure().map(BuildFailure::entry_error),
    }
}

/// Delete the merged track and any per-utterance files left by a previous build.
async fn cleanup_episode_outputs(audio_dir: &Path, episode_id: &str) -> Result<(), BuildError> {
    let io_err = |source| BuildError::Io { path: audio_dir.to_path_buf(), source };
    let merged_name = format!("{}.wav", episode_id);
    let segment_prefix = format!("{}_", episode_id);

    let mut entries = tokio::fs::read_dir(audio_dir).await.map_err(io_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let stale = name == merged_name || (name.starts_with(&segment_prefix) && name.ends_with(".wav"));
        if !stale {
            continue;
        }

        debug!("Removing stale output {}", name);
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(BuildError::Io { path: entry.path(), source }),
        }
    }
    Ok(())
}

fn relative_display(path: &Path, base: &Path) -> String {
    path.strip_prefix(base).unwrap_or(path).display().to_string()
}

/// Build the audio for one episode project.
///
/// Every utterance is attempted. Per-utterance failures are recorded in the manifest and
/// the result, never raised. The manifest is written even when every utterance fails.
///
/// # Errors
/// Returns a [`BuildError`] when the project cannot be loaded, the run dir cannot be
/// inferred, output files cannot be written, or the successful segments have
/// incompatible formats. In the last case the manifest is still written, with the
/// affected entries marked as failed at the merge stage.
pub async fn build_audio(client: &EngineClient, options: &BuildOptions) -> Result<BuildResult, BuildError> {
    let project_path = std::path::absolute(&options.project_path).map_err(|source| BuildError::Io { path: options.project_path.clone(), source })?;
    let project = Project::load(&project_path)?;

    let run_dir = match &options.run_dir {
        Some(dir) => Some(std::path::absolute(dir).map_err(|source| BuildError::Io { path: dir.clone(), source })?),
        None => None,
    };
    let identity = BuildIdentity::infer(&project_path, run_dir.as_deref(), &project)?;

    build_project(client, &project, &project_path, &identity, options.concurrency).await
}

/// Build an already loaded project for a known identity.
pub async fn build_project(
    client: &EngineClient,
    project: &Project,
    project_path: &Path,
    identity: &BuildIdentity,
    concurrency: usize,
) -> Result<BuildResult, BuildError> {
    let audio_dir = identity.run_dir.join(AUDIO_DIR_NAME);
    tokio::fs::create_dir_all(&audio_dir).await.map_err(|source| BuildError::Io { path: audio_dir.clone(), source })?;
    cleanup_episode_outputs(&audio_dir, &identity.episode_id).await?;

    let total = project.audio_keys.len();
    info!("🔊 Building {} utterance(s) for episode {} via {}", total, identity.episode_id, client.base_url());

    let outcomes: Vec<Outcome> = stream::iter(project.audio_keys.iter())
        .map(|key| async move {
            match project.utterance(key) {
                Some(utterance) => process_utterance(client, utterance).await,
                None => Outcome::FailedAtQuery { source: QuerySource::Engine, failure: BuildFailure::missing_item(key) },
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let merged_file_name = format!("{}.wav", identity.episode_id);
    let merged_relative_path = format!("{}/{}", AUDIO_DIR_NAME, merged_file_name);

    let mut entries = Vec::with_capacity(total);
    let mut segments = Vec::new();
    for (key, outcome) in project.audio_keys.iter().zip(outcomes) {
        entries.push(manifest_entry(key, project.utterance(key), &outcome, &merged_relative_path));
        match outcome {
            Outcome::Succeeded { wav, .. } => segments.push(wav),
            Outcome::FailedAtQuery { failure, .. } | Outcome::FailedAtSynthesis { failure, .. } => {
                warn!("❌ {} failed at {}: {}", failure.audio_key, failure.stage, failure.message);
            }
        }
    }

    let mut merge_error = None;
    let mut merged_wav_path = None;
    if !segments.is_empty() {
        match audio::merge_bytes(segments.as_slice()) {
            Ok(merged) => {
                let path = audio_dir.join(&merged_file_name);
                tokio::fs::write(&path, &merged).await.map_err(|source| BuildError::Io { path: path.clone(), source })?;
                info!("✅ Merged {} segment(s) into {} ({} bytes)", segments.len(), path.display(), merged.len());
                merged_wav_path = Some(path);
            }
            Err(err) => {
                let message = format!("Failed to merge audio for episode {}: {}", identity.episode_id, err);
                warn!("❌ {}", message);
                for entry in entries.iter_mut().filter(|e| e.is_succeeded()) {
                    entry.status = EntryStatus::Failed;
                    entry.error = Some(EntryError { stage: FailureStage::Merge, message: message.clone(), status_code: None, retriable: false });
                }
                merge_error = Some(err);
            }
        }
    }

    let failures: Vec<BuildFailure> = entries
        .iter()
        .filter_map(|entry| {
            let error = entry.error.as_ref()?;
            let attempts = match error.stage {
                FailureStage::Query => entry.attempts.audio_query,
                FailureStage::Synthesis | FailureStage::Merge => entry.attempts.synthesis.unwrap_or(0),
            };
            Some(BuildFailure {
                audio_key: entry.audio_key.clone(),
                stage: error.stage,
                message: error.message.clone(),
                status_code: error.status_code,
                attempts,
                retriable: error.retriable,
            })
        })
        .collect();

    let summary = Summary::from_entries(&entries);
    let manifest = Manifest {
        schema_version: SCHEMA_VERSION.to_string(),
        meta: ManifestMeta {
            project_id: identity.project_id.clone(),
            run_id: identity.run_id.clone(),
            episode_id: identity.episode_id.clone(),
            source_vvproj: relative_display(project_path, &identity.run_dir),
            generated_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
        },
        engine: EngineInfo { url: client.base_url().to_string(), app_version: project.app_version.clone() },
        parameters: client.retry_policy().into(),
        output: OutputInfo { merged_wav_path: merged_wav_path.as_ref().map(|_| merged_relative_path.clone()) },
        utterances: entries,
        summary,
    };

    let manifest_path = audio_dir.join(MANIFEST_FILE_NAME);
    manifest.write(&manifest_path).await?;
    info!("📝 Wrote manifest {} ({} succeeded, {} failed)", manifest_path.display(), summary.succeeded, summary.failed);

    if let Some(source) = merge_error {
        return Err(BuildError::Merge { episode_id: identity.episode_id.clone(), manifest_path, source });
    }

    Ok(BuildResult {
        manifest_path,
        audio_dir,
        merged_wav_path,
        episode_id: identity.episode_id.clone(),
        utterance_count: summary.total,
        success_count: summary.succeeded,
        failure_count: summary.failed,
        failures,
    })
}
