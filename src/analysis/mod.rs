//! Multi-signal analysis engine integration.
//!
//! Defines the `AnalysisEngine` trait (the expensive, rate-limited final
//! collaborator), its request types, an HTTP client, and the defensive
//! parser that turns the engine's decision payload into typed signals.

pub mod client;
pub mod parser;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{ScreenError, Symbol};

/// Portfolio context sent with each analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioContext {
    pub cash: f64,
    /// Shares currently held.
    pub stock: u64,
}

impl PortfolioContext {
    /// All cash, no position: the engine evaluates a fresh entry.
    pub fn neutral(cash: f64) -> Self {
        Self { cash, stock: 0 }
    }
}

/// One `RunAnalysis` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub symbol: Symbol,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub portfolio: PortfolioContext,
    pub show_reasoning: bool,
    pub num_of_news: u32,
}

/// Abstraction over the external analysis engine.
///
/// Implementors return the raw decision payload; parsing happens in
/// [`parser::parse_decision`]. Errors must be classified so the caller
/// can tell retryable failures (`RateLimited`, `Transient`) from final ones.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn run_analysis(&self, request: &AnalysisRequest) -> Result<String, ScreenError>;

    /// Engine identifier for logging.
    fn name(&self) -> &str;
}
