//! Batch screening pipeline.
//!
//! Universe → quick filter → technical screening → deep analysis →
//! ranking. Each stage shrinks the candidate set; failures of individual
//! symbols shrink it further but never abort the run.

pub mod deep;
pub mod gate;
pub mod quick_filter;
pub mod ranking;
pub mod technical;

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::AnalysisEngine;
use crate::config::{PipelineConfig, ScreeningConfig};
use crate::data::{MarketSnapshotSource, PriceHistorySource};
use crate::types::{Candidate, RankedPick, ScreeningReport, Stage, StageMetrics};
use deep::DeepAnalyzer;
use quick_filter::QuickFilter;
use ranking::RankingEngine;
use technical::TechnicalScreener;

/// Inclusive date range used for price history and engine requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// `days` of calendar history ending the day before `as_of`.
pub fn history_window(as_of: NaiveDate, days: i64) -> HistoryWindow {
    HistoryWindow {
        start: as_of - ChronoDuration::days(days),
        end: as_of - ChronoDuration::days(1),
    }
}

/// Runs the full pipeline against injected collaborators.
pub struct Screener {
    snapshots: Arc<dyn MarketSnapshotSource>,
    history: Arc<dyn PriceHistorySource>,
    engine: Arc<dyn AnalysisEngine>,
    pipeline: PipelineConfig,
}

impl Screener {
    pub fn new(
        snapshots: Arc<dyn MarketSnapshotSource>,
        history: Arc<dyn PriceHistorySource>,
        engine: Arc<dyn AnalysisEngine>,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            snapshots,
            history,
            engine,
            pipeline,
        }
    }

    /// Run one screening pass and return the ranked shortlist.
    ///
    /// Never fails: collaborator outages degrade the result set, down to
    /// an empty list when the universe itself is unavailable.
    pub async fn run_screening(&self, config: &ScreeningConfig) -> Vec<RankedPick> {
        self.run_with_report(config).await.picks
    }

    /// Like [`run_screening`](Self::run_screening), with per-stage metrics.
    pub async fn run_with_report(&self, config: &ScreeningConfig) -> ScreeningReport {
        let run_started = Instant::now();
        let mut report = ScreeningReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            stages: Vec::with_capacity(5),
            filter_fallback_used: false,
            peak_in_flight: 0,
            total_elapsed_ms: 0,
            picks: Vec::new(),
        };
        let window = history_window(config.as_of_date(), self.pipeline.history_days);

        info!(
            run_id = %report.run_id,
            universe = %config.universe,
            start = %window.start,
            end = %window.end,
            "Starting screening run"
        );

        // -- Universe ---------------------------------------------------------

        let t = Instant::now();
        let universe = match self.snapshots.get_universe(config.universe).await {
            Ok(u) => u,
            Err(e) => {
                error!(error = %e, universe = %config.universe, "Universe unavailable, nothing to screen");
                report
                    .stages
                    .push(StageMetrics::new(Stage::Universe, 0, 0, 1, t.elapsed()));
                return finish(report, run_started);
            }
        };
        report.stages.push(StageMetrics::new(
            Stage::Universe,
            universe.len(),
            universe.len(),
            0,
            t.elapsed(),
        ));
        if universe.is_empty() {
            warn!(universe = %config.universe, "Universe is empty");
            return finish(report, run_started);
        }
        info!(symbols = universe.len(), "Universe loaded");

        // -- Quick filter -----------------------------------------------------

        let t = Instant::now();
        let filtered = QuickFilter::new(config, self.pipeline.filter_fallback_size)
            .apply(self.snapshots.as_ref(), &universe)
            .await;
        report.filter_fallback_used = filtered.fallback_used;
        report.stages.push(StageMetrics::new(
            Stage::QuickFilter,
            universe.len(),
            filtered.symbols.len(),
            0,
            t.elapsed(),
        ));

        // -- Technical --------------------------------------------------------

        let t = Instant::now();
        let technical = TechnicalScreener::new(Arc::clone(&self.history), &self.pipeline)
            .screen(&filtered.symbols, config.max_deep_candidates, window)
            .await;
        report.stages.push(StageMetrics::new(
            Stage::Technical,
            filtered.symbols.len(),
            technical.ranked.len(),
            technical.failed,
            t.elapsed(),
        ));

        let candidates: Vec<Candidate> = technical
            .ranked
            .into_iter()
            .map(|scored| {
                let name = filtered
                    .snapshots
                    .get(&scored.score.symbol)
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| format!("Stock_{}", scored.score.symbol));
                Candidate {
                    symbol: scored.score.symbol,
                    name,
                    technical_score: scored.score.composite,
                    last_close: scored.last_close,
                }
            })
            .collect();

        // -- Deep analysis ----------------------------------------------------

        let t = Instant::now();
        let deep = DeepAnalyzer::new(Arc::clone(&self.engine), self.pipeline.clone())
            .analyze(&candidates, window)
            .await;
        report.peak_in_flight = deep.peak_in_flight;
        report.stages.push(StageMetrics::new(
            Stage::DeepAnalysis,
            candidates.len(),
            deep.results.len(),
            deep.failed,
            t.elapsed(),
        ));

        // -- Ranking ----------------------------------------------------------

        let t = Instant::now();
        let analysed = deep.results.len();
        report.picks = RankingEngine::rank(deep.results, config.target_count);
        report.stages.push(StageMetrics::new(
            Stage::Ranking,
            analysed,
            report.picks.len(),
            0,
            t.elapsed(),
        ));

        finish(report, run_started)
    }
}

fn finish(mut report: ScreeningReport, started: Instant) -> ScreeningReport {
    report.total_elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        run_id = %report.run_id,
        picks = report.picks.len(),
        fallback = report.filter_fallback_used,
        elapsed_ms = report.total_elapsed_ms,
        "Screening run complete"
    );
    report
}
