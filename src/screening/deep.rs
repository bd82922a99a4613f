//! Third-stage deep analysis.
//!
//! Every candidate becomes one unit of work against the analysis engine.
//! Units run concurrently but pass through a [`Gate`] that caps how many
//! engine requests are in flight and paces each dispatch. Rate-limited and
//! transient failures are retried with exponential backoff outside the
//! gate; everything else, including timeouts, drops the symbol.

use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::gate::Gate;
use super::HistoryWindow;
use crate::analysis::parser::{parse_decision, EngineDecision};
use crate::analysis::{AnalysisEngine, AnalysisRequest, PortfolioContext};
use crate::config::PipelineConfig;
use crate::types::{
    AgentCategory, AgentSignal, AnalysisResult, Candidate, ScreenError, SignalDirection, Symbol,
};

/// Order in which agents contribute rationale phrases.
const RATIONALE_ORDER: [AgentCategory; 4] = [
    AgentCategory::Technical,
    AgentCategory::Fundamental,
    AgentCategory::Valuation,
    AgentCategory::Sentiment,
];

const DEFAULT_REASON: &str = "Composite analysis indicates investment merit";
const DEFAULT_RISK: &str = "Systemic market risk";

/// Terminal state of one candidate.
#[derive(Debug)]
pub enum UnitOutcome {
    Analysed(AnalysisResult),
    Failed { symbol: Symbol, error: ScreenError },
}

/// Stage output.
#[derive(Debug, Default)]
pub struct DeepReport {
    /// Successful results in candidate order.
    pub results: Vec<AnalysisResult>,
    pub failed: usize,
    /// Highest number of engine requests observed in flight at once.
    pub peak_in_flight: usize,
}

pub struct DeepAnalyzer {
    engine: Arc<dyn AnalysisEngine>,
    pipeline: PipelineConfig,
}

impl DeepAnalyzer {
    pub fn new(engine: Arc<dyn AnalysisEngine>, pipeline: PipelineConfig) -> Self {
        Self { engine, pipeline }
    }

    /// Analyse all candidates over `window`.
    pub async fn analyze(&self, candidates: &[Candidate], window: HistoryWindow) -> DeepReport {
        if candidates.is_empty() {
            return DeepReport::default();
        }

        let gate = Gate::new(self.pipeline.analysis_concurrency, self.pipeline.pacing_delay());
        info!(
            candidates = candidates.len(),
            concurrency = gate.capacity(),
            engine = self.engine.name(),
            "Starting deep analysis"
        );

        let units = candidates.iter().map(|candidate| {
            AssertUnwindSafe(self.analyze_one(&gate, candidate, window))
                .catch_unwind()
                .map(move |caught| {
                    caught.unwrap_or_else(|panic| UnitOutcome::Failed {
                        symbol: candidate.symbol.clone(),
                        error: ScreenError::Aborted(panic_message(panic.as_ref())),
                    })
                })
        });
        let outcomes = join_all(units).await;

        let mut report = DeepReport {
            peak_in_flight: gate.peak(),
            ..DeepReport::default()
        };
        for outcome in outcomes {
            match outcome {
                UnitOutcome::Analysed(result) => report.results.push(result),
                UnitOutcome::Failed { symbol, error } => {
                    warn!(symbol = %symbol, error = %error, "Deep analysis failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            analysed = report.results.len(),
            failed = report.failed,
            peak_in_flight = report.peak_in_flight,
            "Deep analysis complete"
        );
        report
    }

    async fn analyze_one(
        &self,
        gate: &Gate,
        candidate: &Candidate,
        window: HistoryWindow,
    ) -> UnitOutcome {
        let request = AnalysisRequest {
            symbol: candidate.symbol.clone(),
            start_date: window.start,
            end_date: window.end,
            portfolio: PortfolioContext::neutral(self.pipeline.initial_cash),
            show_reasoning: false,
            num_of_news: self.pipeline.news_count,
        };
        let timeout = self.pipeline.analysis_timeout();
        let max_attempts = self.pipeline.max_attempts.max(1);
        let fail = |error| UnitOutcome::Failed {
            symbol: candidate.symbol.clone(),
            error,
        };

        let mut attempt = 1;
        loop {
            let response = {
                let _permit = match gate.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => return fail(e),
                };
                debug!(symbol = %candidate.symbol, attempt, "Dispatching to analysis engine");
                tokio::time::timeout(timeout, self.engine.run_analysis(&request)).await
            };

            match response {
                Err(_) => return fail(ScreenError::Timeout(timeout)),
                Ok(Ok(raw)) => {
                    return match parse_decision(&raw) {
                        Ok(decision) => UnitOutcome::Analysed(build_result(candidate, &decision)),
                        Err(e) => {
                            if let ScreenError::MalformedResponse { raw, .. } = &e {
                                warn!(symbol = %candidate.symbol, raw = %raw, "Unparseable engine payload");
                            }
                            fail(e)
                        }
                    };
                }
                Ok(Err(e)) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.pipeline.backoff(attempt);
                    warn!(
                        symbol = %candidate.symbol,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying analysis"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Ok(Err(e)) if e.is_retryable() => {
                    return fail(ScreenError::AnalysisFailure {
                        symbol: candidate.symbol.clone(),
                        message: format!("gave up after {attempt} attempts: {e}"),
                    });
                }
                Ok(Err(e)) => return fail(e),
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unit panicked".to_string())
}

// ---------------------------------------------------------------------------
// Result synthesis
// ---------------------------------------------------------------------------

/// Σ confidence × weight × 100 over the retained signals.
pub fn composite_score(signals: &BTreeMap<AgentCategory, AgentSignal>) -> f64 {
    signals
        .iter()
        .map(|(category, signal)| signal.confidence * category.weight() * 100.0)
        .sum()
}

pub fn key_reasons(signals: &BTreeMap<AgentCategory, AgentSignal>) -> Vec<String> {
    phrases(signals, SignalDirection::Bullish, DEFAULT_REASON, |category| match category {
        AgentCategory::Technical => "Technical signals positive: price momentum and trend improving",
        AgentCategory::Fundamental => "Strong fundamentals: healthy profitability and balance sheet",
        AgentCategory::Valuation => "Valuation suggests the stock is undervalued with upside potential",
        AgentCategory::Sentiment => "Positive market sentiment supported by news flow",
    })
}

pub fn risk_factors(signals: &BTreeMap<AgentCategory, AgentSignal>) -> Vec<String> {
    phrases(signals, SignalDirection::Bearish, DEFAULT_RISK, |category| match category {
        AgentCategory::Technical => "Technical indicators show risk signals",
        AgentCategory::Fundamental => "Fundamental indicators point to potential weakness",
        AgentCategory::Valuation => "Valuation is stretched with correction risk",
        AgentCategory::Sentiment => "Negative market sentiment",
    })
}

fn phrases(
    signals: &BTreeMap<AgentCategory, AgentSignal>,
    direction: SignalDirection,
    default: &str,
    phrase: impl Fn(AgentCategory) -> &'static str,
) -> Vec<String> {
    let out: Vec<String> = RATIONALE_ORDER
        .iter()
        .filter(|c| signals.get(*c).is_some_and(|s| s.direction == direction))
        .map(|c| phrase(*c).to_string())
        .collect();
    if out.is_empty() {
        vec![default.to_string()]
    } else {
        out
    }
}

pub fn build_result(candidate: &Candidate, decision: &EngineDecision) -> AnalysisResult {
    let agent_signals = decision.categorised_signals();
    AnalysisResult {
        symbol: candidate.symbol.clone(),
        name: candidate.name.clone(),
        composite_score: composite_score(&agent_signals),
        key_reasons: key_reasons(&agent_signals),
        risk_factors: risk_factors(&agent_signals),
        agent_signals,
        current_price: candidate.last_close,
        technical_score: candidate.technical_score,
        action: decision.action,
        decision_confidence: decision.confidence,
        rationale: decision.reasoning.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
