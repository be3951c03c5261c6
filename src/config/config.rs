//! Application configuration and CLI argument parsing.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use voicevox_build::build::BuildOptions;
use voicevox_build::engine::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_MS, ENGINE_URL_ENV, RetryPolicy};

/// Episode audio builder configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "voicevox-build")]
#[command(author, version, about = "Build episode audio from a VOICEVOX project", long_about = None)]
pub struct AppConfig {
    /// Path to the episode project file (.vvproj)
    #[arg(long)]
    pub vvproj: PathBuf,

    /// Run directory (inferred from <run>/voicevox_project/<episode>.vvproj if omitted)
    #[arg(long)]
    pub run_dir: Option<PathBuf>,

    /// VOICEVOX engine URL (auto-detected if omitted; $VOICEVOX_URL is tried first)
    #[arg(long, short = 'u')]
    pub voicevox_url: Option<String>,

    /// Preferred engine from the environment, tried before the built-in candidates
    #[arg(skip = std::env::var(ENGINE_URL_ENV).ok())]
    pub env_voicevox_url: Option<String>,

    /// Attempts per engine call, counting the first one
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = parse_max_attempts)]
    pub retry_max_attempts: u32,

    /// Delay before the first retry; doubles on each further retry
    #[arg(long, default_value_t = DEFAULT_BASE_DELAY_MS)]
    pub retry_base_delay_ms: u64,

    /// Timeout for each engine request attempt
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS, value_parser = parse_timeout_ms)]
    pub request_timeout_ms: u64,

    /// Utterances synthesized concurrently (1 = sequential)
    #[arg(long, short = 'j', default_value = "1")]
    pub concurrency: usize,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Retry policy applied to every engine call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { max_attempts: self.retry_max_attempts, base_delay_ms: self.retry_base_delay_ms, timeout_ms: self.request_timeout_ms }
    }

    /// Build options for the configured project.
    pub fn build_options(&self) -> BuildOptions {
        let mut options = BuildOptions::new(&self.vvproj).with_concurrency(self.concurrency);
        if let Some(run_dir) = &self.run_dir {
            options = options.with_run_dir(run_dir);
        }
        options
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.vvproj.is_file() {
            anyhow::bail!("Project file not found: {}", self.vvproj.display());
        }

        if let Some(run_dir) = &self.run_dir
            && run_dir.exists()
            && !run_dir.is_dir()
        {
            anyhow::bail!("Run directory is not a directory: {}", run_dir.display());
        }

        if self.concurrency == 0 {
            anyhow::bail!("Concurrency must be at least 1");
        }

        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  Project: {}", self.vvproj.display());
        if let Some(run_dir) = &self.run_dir {
            info!("  Run directory: {}", run_dir.display());
        }
        match (&self.voicevox_url, &self.env_voicevox_url) {
            (Some(url), _) => info!("  VOICEVOX URL: {}", url),
            (None, Some(url)) => info!("  VOICEVOX URL: auto-detect, trying {} first", url),
            (None, None) => info!("  VOICEVOX URL: auto-detect"),
        }
        info!("  Retry: {} attempt(s), base delay {}ms", self.retry_max_attempts, self.retry_base_delay_ms);
        info!("  Request timeout: {}ms", self.request_timeout_ms);
        info!("  Concurrency: {}", self.concurrency);
    }
}

/// Parse and validate the attempt count (at least 1).
fn parse_max_attempts(s: &str) -> Result<u32, String> {
    let value: u32 = s.parse().map_err(|_| format!("'{}' is not a valid attempt count", s))?;
    if value >= 1 { Ok(value) } else { Err("retry attempts must be at least 1".to_string()) }
}

/// Parse and validate the per-attempt timeout (positive).
fn parse_timeout_ms(s: &str) -> Result<u64, String> {
    let value: u64 = s.parse().map_err(|_| format!("'{}' is not a valid timeout", s))?;
    if value > 0 { Ok(value) } else { Err("request timeout must be positive".to_string()) }
}
