//! VOICEVOX engine access.
//!
//! Provides the retrying HTTP client and base URL discovery.

mod client;
mod discovery;

pub use client::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_MS, EngineClient, EngineResponse, Operation, RequestError, RetryPolicy, backoff_ms,
};
pub use discovery::{DEFAULT_ENGINE_URL, DiscoveryError, ENGINE_URL_ENV, candidate_urls, is_reachable, normalize_engine_url, resolve_engine_url};
