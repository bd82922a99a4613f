//! Second-stage technical screening.
//!
//! A fixed pool of worker tasks drains a shared queue of symbols. Each
//! worker fetches a price window, scores it on four factors, and pushes
//! the outcome into a shared accumulator. Symbols are independent: a
//! failure or timeout on one is logged and excluded, never propagated.
//!
//! Factor formulas (each clamped to [0, 1]):
//! - momentum   = Σ last 20 daily returns × 5 + 0.5
//! - trend      = (MA5 / MA20 − 1) × 10 + 0.5
//! - volume     = (mean vol last 5 / mean vol last 20 − 0.5) × 2
//! - volatility = 1 − 2 × σ(daily returns) × √252

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::HistoryWindow;
use crate::config::PipelineConfig;
use crate::data::PriceHistorySource;
use crate::indicators::{clamp_unit, pct_change, sample_std, trailing_mean, trailing_sum};
use crate::types::{Factor, PriceBar, ScreenError, Symbol, TechnicalScore};

const MOMENTUM_WINDOW: usize = 20;
const SHORT_MA: usize = 5;
const LONG_MA: usize = 20;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// A symbol that was scored successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSymbol {
    pub score: TechnicalScore,
    pub last_close: f64,
}

/// Terminal state of one per-symbol unit of work.
#[derive(Debug)]
pub enum TechnicalOutcome {
    Scored(ScoredSymbol),
    /// Not enough data. Expected, not an error.
    Skipped { symbol: Symbol, reason: ScreenError },
    Failed { symbol: Symbol, error: ScreenError },
}

/// Stage output.
#[derive(Debug, Default)]
pub struct TechnicalReport {
    /// Top-K by composite, descending; ties broken by symbol.
    pub ranked: Vec<ScoredSymbol>,
    pub scored: usize,
    pub skipped: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Score one price history. Bars must be oldest first.
///
/// The only error is `InsufficientHistory`; degenerate values score 0.
pub fn score_history(
    symbol: &str,
    bars: &[PriceBar],
    min_points: usize,
) -> Result<ScoredSymbol, ScreenError> {
    let required = min_points.max(LONG_MA);
    if bars.len() < required {
        return Err(ScreenError::InsufficientHistory {
            symbol: symbol.to_string(),
            points: bars.len(),
            required,
        });
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let returns = pct_change(&closes);

    let momentum = trailing_sum(&returns, MOMENTUM_WINDOW.min(returns.len()))
        .map(|m| m * 5.0 + 0.5)
        .unwrap_or(0.0);

    let trend = match (trailing_mean(&closes, SHORT_MA), trailing_mean(&closes, LONG_MA)) {
        (Some(short), Some(long)) => (short / long - 1.0) * 10.0 + 0.5,
        _ => 0.0,
    };

    let volume = match (trailing_mean(&volumes, SHORT_MA), trailing_mean(&volumes, LONG_MA)) {
        (Some(recent), Some(base)) => (recent / base - 0.5) * 2.0,
        _ => 0.0,
    };

    let volatility = sample_std(&returns)
        .map(|sd| 1.0 - sd * TRADING_DAYS_PER_YEAR.sqrt() * 2.0)
        .unwrap_or(0.0);

    let mut components = BTreeMap::new();
    components.insert(Factor::Momentum, clamp_unit(momentum));
    components.insert(Factor::Trend, clamp_unit(trend));
    components.insert(Factor::Volume, clamp_unit(volume));
    components.insert(Factor::Volatility, clamp_unit(volatility));

    let composite = clamp_unit(
        components
            .iter()
            .map(|(factor, value)| factor.weight() * value)
            .sum(),
    );

    Ok(ScoredSymbol {
        score: TechnicalScore {
            symbol: symbol.to_string(),
            composite,
            components,
        },
        last_close: closes.last().copied().unwrap_or(0.0),
    })
}

/// Order by composite descending, then symbol ascending.
pub fn sort_scored(scored: &mut [ScoredSymbol]) {
    scored.sort_by(|a, b| {
        b.score
            .composite
            .total_cmp(&a.score.composite)
            .then_with(|| a.score.symbol.cmp(&b.score.symbol))
    });
}

// ---------------------------------------------------------------------------
// Screener
// ---------------------------------------------------------------------------

pub struct TechnicalScreener {
    history: Arc<dyn PriceHistorySource>,
    workers: usize,
    timeout: Duration,
    min_points: usize,
}

impl TechnicalScreener {
    pub fn new(history: Arc<dyn PriceHistorySource>, pipeline: &PipelineConfig) -> Self {
        Self {
            history,
            workers: pipeline.technical_workers.max(1),
            timeout: pipeline.technical_timeout(),
            min_points: pipeline.min_history_points,
        }
    }

    /// Score `symbols` in parallel and keep the best `top_k`.
    pub async fn screen(
        &self,
        symbols: &[Symbol],
        top_k: usize,
        window: HistoryWindow,
    ) -> TechnicalReport {
        if symbols.is_empty() {
            return TechnicalReport::default();
        }

        let queue = Arc::new(Mutex::new(symbols.iter().cloned().collect::<VecDeque<_>>()));
        let results: Arc<Mutex<Vec<TechnicalOutcome>>> =
            Arc::new(Mutex::new(Vec::with_capacity(symbols.len())));

        let workers = self.workers.min(symbols.len());
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let history = Arc::clone(&self.history);
            let timeout = self.timeout;
            let min_points = self.min_points;

            handles.push(tokio::spawn(async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some(symbol) = next else { break };

                    // Each unit runs in its own task so a panic stays with its symbol
                    let unit = {
                        let history = Arc::clone(&history);
                        let symbol = symbol.clone();
                        tokio::spawn(async move {
                            tokio::time::timeout(
                                timeout,
                                score_symbol(history.as_ref(), &symbol, window, min_points),
                            )
                            .await
                        })
                    };

                    let outcome = match unit.await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(_)) => TechnicalOutcome::Failed {
                            symbol,
                            error: ScreenError::Timeout(timeout),
                        },
                        Err(e) => TechnicalOutcome::Failed {
                            symbol,
                            error: ScreenError::Aborted(e.to_string()),
                        },
                    };
                    results.lock().await.push(outcome);
                }
                debug!(worker, "Technical worker drained queue");
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Technical worker aborted");
            }
        }

        let outcomes = std::mem::take(&mut *results.lock().await);
        let mut report = TechnicalReport::default();
        let mut scored = Vec::with_capacity(outcomes.len());

        for outcome in outcomes {
            match outcome {
                TechnicalOutcome::Scored(s) => scored.push(s),
                TechnicalOutcome::Skipped { symbol, reason } => {
                    debug!(symbol = %symbol, reason = %reason, "Excluded from technical screening");
                    report.skipped += 1;
                }
                TechnicalOutcome::Failed { symbol, error } => {
                    warn!(symbol = %symbol, error = %error, "Technical analysis failed");
                    report.failed += 1;
                }
            }
        }

        report.scored = scored.len();
        sort_scored(&mut scored);
        scored.truncate(top_k);
        report.ranked = scored;

        info!(
            input = symbols.len(),
            scored = report.scored,
            skipped = report.skipped,
            failed = report.failed,
            output = report.ranked.len(),
            "Technical screening complete"
        );

        report
    }
}

/// Fetch and score one symbol.
async fn score_symbol(
    history: &dyn PriceHistorySource,
    symbol: &str,
    window: HistoryWindow,
    min_points: usize,
) -> TechnicalOutcome {
    let bars = match history
        .get_price_history(symbol, window.start, window.end)
        .await
    {
        Ok(Some(bars)) => bars,
        Ok(None) => {
            return TechnicalOutcome::Skipped {
                symbol: symbol.to_string(),
                reason: ScreenError::InsufficientHistory {
                    symbol: symbol.to_string(),
                    points: 0,
                    required: min_points,
                },
            }
        }
        Err(error) => {
            return TechnicalOutcome::Failed {
                symbol: symbol.to_string(),
                error,
            }
        }
    };

    match score_history(symbol, &bars, min_points) {
        Ok(scored) => TechnicalOutcome::Scored(scored),
        Err(reason) => TechnicalOutcome::Skipped {
            symbol: symbol.to_string(),
            reason,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
