//! Episode audio builds.
//!
//! Loads a stage-5 project, renders every utterance through the engine, merges the
//! successful segments in track order, and records the outcome in a manifest.

mod manifest;
mod orchestrator;
mod project;

use std::path::PathBuf;

use thiserror::Error;

use crate::audio::WavError;

pub use manifest::{
    Attempts, EngineInfo, EntryError, EntryStatus, FailureStage, MANIFEST_FILE_NAME, Manifest, ManifestEntry, ManifestMeta, OutputInfo,
    RetryParameters, SCHEMA_VERSION, Summary,
};
pub use orchestrator::{AUDIO_DIR_NAME, BuildFailure, BuildOptions, BuildResult, build_audio, build_project};
pub use project::{BuildIdentity, Project, infer_episode_id, infer_project_and_run_ids, infer_run_dir};

/// Errors that abort a build as a whole.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Could not infer run directory from {0}. Expected .../voicevox_project/<episode>.vvproj or pass --run-dir explicitly.")]
    RunDirUnknown(PathBuf),

    #[error("Failed to read project file {path}: {source}")]
    ReadProject { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse project file {path}: {source}")]
    ParseProject { path: PathBuf, source: serde_json::Error },

    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Failed to encode manifest: {0}")]
    EncodeManifest(#[source] serde_json::Error),

    #[error("Failed to format manifest timestamp: {0}")]
    Timestamp(#[from] time::error::Format),

    #[error("Failed to merge audio for episode {episode_id} (manifest written to {manifest_path}): {source}")]
    Merge { episode_id: String, manifest_path: PathBuf, source: WavError },
}
