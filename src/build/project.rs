//! Stage-5 VOICEVOX project loading and build identity inference.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::BuildError;
use crate::tts::{SynthesisQuery, Utterance, VoiceSelector};

/// Directory name that holds stage-5 project files inside a run directory.
const PROJECT_DIR_NAME: &str = "voicevox_project";

/// Run directory names look like `run-20260214-1020`.
static RUN_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^run-\d{8}-\d{4}$").expect("run id pattern is a valid regex"));

/// Identifier used when an id cannot be inferred.
const UNKNOWN_ID: &str = "unknown";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectFile {
    #[serde(default)]
    app_version: String,
    talk: TalkFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TalkFile {
    audio_keys: Vec<String>,
    #[serde(default)]
    audio_items: HashMap<String, AudioItemFile>,
}

#[derive(Debug, Deserialize)]
struct AudioItemFile {
    text: String,
    voice: VoiceSelector,
    #[serde(default)]
    query: Option<SynthesisQuery>,
}

/// Utterances of one episode, in canonical order.
#[derive(Debug, Clone)]
pub struct Project {
    pub app_version: String,
    pub audio_keys: Vec<String>, // Canonical track order
    items: HashMap<String, Utterance>,
}

impl Project {
    /// Decode a project from its JSON text.
    ///
    /// Supplied queries go through the same normalization as engine responses, so either
    /// field-naming convention is accepted.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: ProjectFile = serde_json::from_str(json)?;
        let items = file
            .talk
            .audio_items
            .into_iter()
            .map(|(key, item)| {
                let utterance = Utterance { audio_key: key.clone(), text: item.text, voice: item.voice, query: item.query };
                (key, utterance)
            })
            .collect();

        Ok(Self { app_version: file.app_version, audio_keys: file.talk.audio_keys, items })
    }

    /// Load a project file from disk.
    ///
    /// # Errors
    /// Returns [`BuildError::ReadProject`] or [`BuildError::ParseProject`].
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let json = std::fs::read_to_string(path).map_err(|source| BuildError::ReadProject { path: path.to_path_buf(), source })?;
        Self::from_json(&json).map_err(|source| BuildError::ParseProject { path: path.to_path_buf(), source })
    }

    /// Utterance for `audio_key`, if the project defines one.
    pub fn utterance(&self, audio_key: &str) -> Option<&Utterance> {
        self.items.get(audio_key)
    }
}

/// Who and where a build is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildIdentity {
    pub project_id: String,
    pub run_id: String,
    pub episode_id: String,
    pub run_dir: PathBuf,
}

impl BuildIdentity {
    /// Infer the identity of a build from the project path and an optional run dir.
    ///
    /// # Errors
    /// Returns [`BuildError::RunDirUnknown`] when no run dir is given and the project file
    /// does not live in a `voicevox_project` directory.
    pub fn infer(project_path: &Path, run_dir: Option<&Path>, project: &Project) -> Result<Self, BuildError> {
        let run_dir = match run_dir {
            Some(dir) => dir.to_path_buf(),
            None => infer_run_dir(project_path).ok_or_else(|| BuildError::RunDirUnknown(project_path.to_path_buf()))?,
        };
        let (project_id, run_id) = infer_project_and_run_ids(&run_dir);
        let episode_id = infer_episode_id(project_path, project);

        Ok(Self { project_id, run_id, episode_id, run_dir })
    }
}

/// `<run>/voicevox_project/E01.vvproj` -> `<run>`.
pub fn infer_run_dir(project_path: &Path) -> Option<PathBuf> {
    let project_dir = project_path.parent()?;
    if project_dir.file_name()? != PROJECT_DIR_NAME {
        return None;
    }
    project_dir.parent().map(Path::to_path_buf)
}

/// `<projects>/<project_id>/<run_id>` -> `(project_id, run_id)`.
pub fn infer_project_and_run_ids(run_dir: &Path) -> (String, String) {
    let run_name = file_name(run_dir);
    let run_id = if RUN_ID_PATTERN.is_match(&run_name) { run_name } else { UNKNOWN_ID.to_string() };

    let project_id = run_dir.parent().map(file_name).filter(|name| !name.is_empty()).unwrap_or_else(|| UNKNOWN_ID.to_string());
    (project_id, run_id)
}

/// Episode id from the project file stem, else the first audio key's prefix.
pub fn infer_episode_id(project_path: &Path, project: &Project) -> String {
    if let Some(stem) = project_path.file_stem().map(|s| s.to_string_lossy()).filter(|s| !s.is_empty()) {
        return stem.into_owned();
    }

    project
        .audio_keys
        .first()
        .and_then(|key| key.split('_').next())
        .filter(|prefix| !prefix.is_empty())
        .unwrap_or(UNKNOWN_ID)
        .to_string()
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}
