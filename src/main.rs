//! VOICEVOX Build - renders episode audio through a local VOICEVOX engine.
//!
//! Reads a stage-5 `.vvproj`, synthesizes every utterance, merges the results into
//! `<run>/audio/<episode>.wav` and writes `<run>/audio/manifest.json`.

mod config;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use config::AppConfig;
use voicevox_build::build::{BuildResult, build_audio};
use voicevox_build::engine::{EngineClient, resolve_engine_url};

fn report(result: &BuildResult) {
    info!(
        "✅ Episode {}: {} utterance(s), {} succeeded, {} failed",
        result.episode_id, result.utterance_count, result.success_count, result.failure_count
    );
    for failure in &result.failures {
        warn!("  {} [{}] {}", failure.audio_key, failure.stage, failure.message);
    }

    println!("manifest: {}", result.manifest_path.display());
    match &result.merged_wav_path {
        Some(path) => println!("merged: {}", path.display()),
        None => println!("merged: (none, no utterance succeeded)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config = AppConfig::from_args();

    // Respect RUST_LOG env var, fallback to verbose flag, default to info
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| if config.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🎙️ VOICEVOX Build v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("❌ Configuration error: {}", e);
        std::process::exit(1);
    }
    config.log_config();

    let engine_url = resolve_engine_url(config.voicevox_url.as_deref(), config.env_voicevox_url.as_deref()).await?;
    info!("🔌 Using VOICEVOX engine at {}", engine_url);

    let client = EngineClient::new(&engine_url, config.retry_policy()).context("Failed to create engine HTTP client")?;
    let options = config.build_options();

    tokio::select! {
        result = build_audio(&client, &options) => {
            let result = result.with_context(|| format!("Audio build failed for {}", options.project_path.display()))?;
            report(&result);
        }
        _ = signal::ctrl_c() => {
            warn!("Interrupted, outputs in the audio directory may be incomplete");
            std::process::exit(130);
        }
    }

    Ok(())
}
