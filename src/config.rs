//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the analysis engine API key) are referenced by env-var name
//! in the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use crate::types::ScreenError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub screening: ScreeningConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub market_data: MarketDataConfig,
    pub engine: EngineConfig,
}

// ---------------------------------------------------------------------------
// Screening (per-run) configuration
// ---------------------------------------------------------------------------

/// Index or category that defines the symbol universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniverseCategory {
    Csi300,
    Csi500,
    #[serde(alias = "all_shares")]
    All,
}

impl UniverseCategory {
    /// Index code of the category; `None` for the full listing.
    pub fn index_code(&self) -> Option<&'static str> {
        match self {
            UniverseCategory::Csi300 => Some("000300"),
            UniverseCategory::Csi500 => Some("000905"),
            UniverseCategory::All => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UniverseCategory::Csi300 => "csi300",
            UniverseCategory::Csi500 => "csi500",
            UniverseCategory::All => "all",
        }
    }
}

impl fmt::Display for UniverseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UniverseCategory {
    type Err = ScreenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csi300" | "000300" => Ok(UniverseCategory::Csi300),
            "csi500" | "000905" => Ok(UniverseCategory::Csi500),
            "all" | "all_shares" | "all_a_shares" => Ok(UniverseCategory::All),
            other => Err(ScreenError::Config(format!("unknown universe: {other}"))),
        }
    }
}

/// Parameters of one screening run. Immutable for the run's duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    pub universe: UniverseCategory,
    pub min_market_cap: f64,
    pub min_daily_volume: f64,
    pub max_pe_ratio: f64,
    pub exclude_st: bool,
    /// Cap on symbols carried into technical screening.
    pub max_technical_candidates: usize,
    /// Cap on symbols carried into deep analysis.
    pub max_deep_candidates: usize,
    /// Size of the final shortlist.
    pub target_count: usize,
    /// Reference date for history windows; today when unset.
    pub as_of: Option<NaiveDate>,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            universe: UniverseCategory::Csi300,
            min_market_cap: 1_000_000_000.0,
            min_daily_volume: 10_000_000.0,
            max_pe_ratio: 100.0,
            exclude_st: true,
            max_technical_candidates: 200,
            max_deep_candidates: 50,
            target_count: 10,
            as_of: None,
        }
    }
}

impl ScreeningConfig {
    pub fn as_of_date(&self) -> NaiveDate {
        self.as_of
            .unwrap_or_else(|| chrono::Utc::now().date_naive())
    }
}

// ---------------------------------------------------------------------------
// Pipeline tunables
// ---------------------------------------------------------------------------

/// Concurrency, timing, and window tunables of the pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Prefix size passed on when the snapshot source is down.
    pub filter_fallback_size: usize,
    /// Calendar days of price history per symbol.
    pub history_days: i64,
    pub min_history_points: usize,
    pub technical_workers: usize,
    pub technical_timeout_secs: u64,
    /// Max engine requests in flight.
    pub analysis_concurrency: usize,
    pub pacing_delay_ms: u64,
    pub analysis_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub initial_cash: f64,
    pub news_count: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter_fallback_size: 100,
            history_days: 90,
            min_history_points: 20,
            technical_workers: 8,
            technical_timeout_secs: 30,
            analysis_concurrency: 3,
            pacing_delay_ms: 2000,
            analysis_timeout_secs: 300,
            max_attempts: 3,
            backoff_base_ms: 1000,
            initial_cash: 100_000.0,
            news_count: 5,
        }
    }
}

impl PipelineConfig {
    pub fn technical_timeout(&self) -> Duration {
        Duration::from_secs(self.technical_timeout_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    /// Backoff before retry number `attempt` (1-based): base × 2^(attempt-1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

// ---------------------------------------------------------------------------
// Collaborator endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct MarketDataConfig {
    pub base_url: String,
    #[serde(default = "default_market_data_timeout")]
    pub timeout_secs: u64,
}

fn default_market_data_timeout() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub base_url: String,
    /// Name of the env var holding the engine API key.
    pub api_key_env: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
}

fn default_engine_timeout() -> u64 {
    120
}

/// Resolved, immutable engine client settings.
pub struct EngineSettings {
    pub base_url: String,
    pub api_key: SecretString,
    pub model: Option<String>,
    pub timeout: Duration,
}

impl fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl EngineConfig {
    /// Resolve the API key from the environment into client settings.
    pub fn resolve(&self) -> Result<EngineSettings> {
        let api_key = AppConfig::resolve_env(&self.api_key_env)?;
        Ok(EngineSettings {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_key: SecretString::new(api_key),
            model: self.model.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or empty the pipeline.
    pub fn validate(&self) -> Result<(), ScreenError> {
        let p = &self.pipeline;
        if p.technical_workers == 0 {
            return Err(ScreenError::Config("technical_workers must be > 0".into()));
        }
        if p.analysis_concurrency == 0 {
            return Err(ScreenError::Config("analysis_concurrency must be > 0".into()));
        }
        if p.max_attempts == 0 {
            return Err(ScreenError::Config("max_attempts must be > 0".into()));
        }
        if self.screening.target_count == 0 {
            return Err(ScreenError::Config("target_count must be > 0".into()));
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
