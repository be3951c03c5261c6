//! Engine base URL normalization and reachability checks.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

/// Engine URL used when nothing else is configured.
pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:50021";

/// Candidates tried, in order, when no URL is given explicitly.
const AUTO_DETECT_ENGINE_URLS: &[&str] =
    &["http://127.0.0.1:50021", "http://voicevox-engine:50021", "http://host.docker.internal:50021", "http://narrative-vox-voicevox-engine:50021"];

/// Timeout for each reachability check.
const CHECK_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("VOICEVOX Engine is not reachable. Tried: {}. Use --voicevox-url explicitly if needed.", .tried.join(", "))]
    Unreachable { tried: Vec<String> },

    #[error("failed to create reachability client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Normalize an engine URL: trim, fall back to the default when empty, strip one trailing `/`.
pub fn normalize_engine_url(value: Option<&str>) -> String {
    let url = value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(DEFAULT_ENGINE_URL);
    url.strip_suffix('/').unwrap_or(url).to_string()
}

/// Environment variable naming a preferred engine, tried before the built-in candidates.
pub const ENGINE_URL_ENV: &str = "VOICEVOX_URL";

/// Auto-detect candidates in the order they are tried: the environment URL first, then the
/// built-in list, normalized and de-duplicated.
pub fn candidate_urls(env_url: Option<&str>) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    let env = env_url.filter(|u| !u.trim().is_empty());
    for candidate in env.into_iter().chain(AUTO_DETECT_ENGINE_URLS.iter().copied()).map(|c| normalize_engine_url(Some(c))) {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

/// Resolve the engine base URL.
///
/// An explicit URL wins without any reachability check. Otherwise the candidates from
/// [`candidate_urls`] are checked with `GET /version`, falling back to `GET /speakers`,
/// and the first one that answers with a 2xx is returned. An unreachable `env_url`
/// does not stop the built-in candidates from being tried.
///
/// # Errors
/// Returns [`DiscoveryError::Unreachable`] listing every candidate when none answers.
pub async fn resolve_engine_url(explicit: Option<&str>, env_url: Option<&str>) -> Result<String, DiscoveryError> {
    if let Some(url) = explicit.filter(|u| !u.trim().is_empty()) {
        return Ok(normalize_engine_url(Some(url)));
    }

    let http = reqwest::Client::builder().timeout(CHECK_TIMEOUT).build()?;
    let candidates = candidate_urls(env_url);

    for candidate in &candidates {
        if is_reachable(&http, candidate).await {
            info!("Detected VOICEVOX engine at {}", candidate);
            return Ok(candidate.clone());
        }
        debug!("VOICEVOX engine not reachable at {}", candidate);
    }

    Err(DiscoveryError::Unreachable { tried: candidates })
}

/// Check whether an engine answers on `/version` or `/speakers`.
pub async fn is_reachable(http: &reqwest::Client, base_url: &str) -> bool {
    for endpoint in ["version", "speakers"] {
        let url = format!("{}/{}", base_url, endpoint);
        if let Ok(response) = http.get(&url).send().await
            && response.status().is_success()
        {
            return true;
        }
    }
    false
}
