//! Shared types for the screener.
//!
//! These types form the data model used across all pipeline stages.
//! Every entity here lives for a single screening run; nothing is
//! cached or persisted between runs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Opaque instrument identifier (a ticker such as `600519`).
pub type Symbol = String;

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Point-in-time market snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub name: String,
    /// Total market capitalisation in local currency.
    pub market_cap: f64,
    /// Daily traded value in local currency.
    pub daily_volume: f64,
    /// Dynamic P/E ratio. Absent when the source has no figure.
    #[serde(default)]
    pub pe_ratio: Option<f64>,
}

impl MarketSnapshot {
    /// Whether the instrument name carries a special-treatment marker.
    ///
    /// Exchanges prefix such names with `ST`, `*ST` or `S*ST`; the marker
    /// is never followed by another Latin letter, so `STEEL` is not one.
    pub fn is_special_treatment(&self) -> bool {
        let name = self.name.trim_start();
        let rest = name.strip_prefix("S*").unwrap_or(name);
        let rest = rest.strip_prefix('*').unwrap_or(rest);
        match rest.strip_prefix("ST") {
            Some(after) => !after.starts_with(|c: char| c.is_ascii_alphabetic()),
            None => false,
        }
    }
}

impl fmt::Display for MarketSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (cap: {:.0} | vol: {:.0} | P/E: {})",
            self.symbol,
            self.name,
            self.market_cap,
            self.daily_volume,
            self.pe_ratio
                .map(|pe| format!("{pe:.1}"))
                .unwrap_or_else(|| "n/a".to_string()),
        )
    }
}

/// One OHLCV bar of a daily price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// ---------------------------------------------------------------------------
// Technical scoring
// ---------------------------------------------------------------------------

/// Technical factor contributing to the composite technical score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Momentum,
    Trend,
    Volatility,
    Volume,
}

impl Factor {
    pub const ALL: &'static [Factor] = &[
        Factor::Momentum,
        Factor::Trend,
        Factor::Volatility,
        Factor::Volume,
    ];

    /// Fixed weight of this factor in the composite. Weights sum to 1.0.
    pub fn weight(&self) -> f64 {
        match self {
            Factor::Momentum => 0.3,
            Factor::Trend => 0.3,
            Factor::Volatility => 0.2,
            Factor::Volume => 0.2,
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Factor::Momentum => write!(f, "momentum"),
            Factor::Trend => write!(f, "trend"),
            Factor::Volatility => write!(f, "volatility"),
            Factor::Volume => write!(f, "volume"),
        }
    }
}

/// Technical score of one symbol. Composite and components are in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalScore {
    pub symbol: Symbol,
    pub composite: f64,
    pub components: BTreeMap<Factor, f64>,
}

/// A symbol that survived technical screening, ready for deep analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: Symbol,
    pub name: String,
    pub technical_score: f64,
    /// Last close seen in the technical window.
    pub last_close: f64,
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// The closed set of analysis perspectives kept from an engine response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCategory {
    Technical,
    Fundamental,
    Sentiment,
    Valuation,
}

impl AgentCategory {
    /// Matching order used when classifying free-form agent names.
    pub const ALL: &'static [AgentCategory] = &[
        AgentCategory::Technical,
        AgentCategory::Fundamental,
        AgentCategory::Sentiment,
        AgentCategory::Valuation,
    ];

    /// Weight of this perspective in the deep-analysis composite.
    pub fn weight(&self) -> f64 {
        match self {
            AgentCategory::Technical => 0.25,
            AgentCategory::Fundamental => 0.30,
            AgentCategory::Sentiment => 0.10,
            AgentCategory::Valuation => 0.35,
        }
    }

    /// Classify an engine agent name (e.g. "Valuation Analysis") by
    /// case-insensitive substring. Unknown agents map to `None`.
    pub fn from_agent_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|cat| lower.contains(cat.keyword()))
    }

    fn keyword(&self) -> &'static str {
        match self {
            AgentCategory::Technical => "technical",
            AgentCategory::Fundamental => "fundamental",
            AgentCategory::Sentiment => "sentiment",
            AgentCategory::Valuation => "valuation",
        }
    }
}

impl fmt::Display for AgentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// Direction of an agent signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl SignalDirection {
    /// Lenient label parsing; anything unrecognised is neutral.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "bullish" | "buy" | "positive" => SignalDirection::Bullish,
            "bearish" | "sell" | "negative" => SignalDirection::Bearish,
            _ => SignalDirection::Neutral,
        }
    }
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalDirection::Bullish => write!(f, "bullish"),
            SignalDirection::Bearish => write!(f, "bearish"),
            SignalDirection::Neutral => write!(f, "neutral"),
        }
    }
}

/// One agent's verdict, confidence in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentSignal {
    pub direction: SignalDirection,
    pub confidence: f64,
}

/// Overall action recommended by the analysis engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "buy" => TradeAction::Buy,
            "sell" => TradeAction::Sell,
            _ => TradeAction::Hold,
        }
    }
}

/// Normalised outcome of a deep analysis for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub symbol: Symbol,
    pub name: String,
    /// Σ confidence × weight × 100 over the retained agent signals.
    pub composite_score: f64,
    pub agent_signals: BTreeMap<AgentCategory, AgentSignal>,
    pub key_reasons: Vec<String>,
    pub risk_factors: Vec<String>,
    pub current_price: f64,
    pub technical_score: f64,
    pub action: TradeAction,
    pub decision_confidence: f64,
    pub rationale: String,
}

impl AnalysisResult {
    /// Whether the given agent reported a bullish signal.
    pub fn is_bullish(&self, category: AgentCategory) -> bool {
        self.direction_of(category) == Some(SignalDirection::Bullish)
    }

    pub fn direction_of(&self, category: AgentCategory) -> Option<SignalDirection> {
        self.agent_signals.get(&category).map(|s| s.direction)
    }
}

/// An analysis result with its final position in the shortlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPick {
    /// 1-based rank.
    pub rank: usize,
    /// Composite score plus tie-break bonuses.
    pub adjusted_score: f64,
    pub analysis: AnalysisResult,
}

impl fmt::Display for RankedPick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} (score: {:.1} | price: {:.2} | {:?})",
            self.rank,
            self.analysis.symbol,
            self.analysis.name,
            self.adjusted_score,
            self.analysis.current_price,
            self.analysis.action,
        )
    }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Universe,
    QuickFilter,
    Technical,
    DeepAnalysis,
    Ranking,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Universe => write!(f, "universe"),
            Stage::QuickFilter => write!(f, "quick_filter"),
            Stage::Technical => write!(f, "technical"),
            Stage::DeepAnalysis => write!(f, "deep_analysis"),
            Stage::Ranking => write!(f, "ranking"),
        }
    }
}

/// Counts and timing for one stage of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage: Stage,
    pub input: usize,
    pub output: usize,
    /// Units that failed or timed out (excluded, not fatal).
    pub failed: usize,
    pub elapsed_ms: u64,
}

impl StageMetrics {
    pub fn new(stage: Stage, input: usize, output: usize, failed: usize, elapsed: Duration) -> Self {
        Self {
            stage,
            input,
            output,
            failed,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

impl fmt::Display for StageMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {} (failed={}, {}ms)",
            self.stage, self.input, self.output, self.failed, self.elapsed_ms
        )
    }
}

/// Summary of one complete screening run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageMetrics>,
    /// The snapshot source was down and the quick filter passed a prefix.
    pub filter_fallback_used: bool,
    /// Highest number of engine requests observed in flight at once.
    pub peak_in_flight: usize,
    pub total_elapsed_ms: u64,
    pub picks: Vec<RankedPick>,
}

impl ScreeningReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageMetrics> {
        self.stages.iter().find(|m| m.stage == stage)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the screening pipeline.
///
/// None of these escape `Screener::run_screening`; they only shrink the
/// result set of the stage where they happen.
#[derive(Debug, thiserror::Error)]
pub enum ScreenError {
    #[error("Upstream unavailable ({source_name}): {message}")]
    UpstreamUnavailable { source_name: String, message: String },

    #[error("Insufficient history for {symbol}: {points} points, need {required}")]
    InsufficientHistory {
        symbol: Symbol,
        points: usize,
        required: usize,
    },

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Malformed engine response: {message}")]
    MalformedResponse { message: String, raw: String },

    #[error("Analysis failed for {symbol}: {message}")]
    AnalysisFailure { symbol: Symbol, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task aborted: {0}")]
    Aborted(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScreenError {
    pub fn upstream(source_name: &str, message: impl fmt::Display) -> Self {
        ScreenError::UpstreamUnavailable {
            source_name: source_name.to_string(),
            message: message.to_string(),
        }
    }

    /// Errors worth another attempt after a backoff delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScreenError::RateLimited(_) | ScreenError::Transient(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
