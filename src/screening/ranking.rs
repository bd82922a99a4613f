//! Final ordering of analysed candidates.
//!
//! Sort by raw composite, add fixed tie-break bonuses for bullish
//! valuation and fundamental signals, re-sort, and truncate. Symbol order
//! breaks any remaining tie, so the output never depends on the order in
//! which concurrent stages happened to finish.

use std::cmp::Ordering;
use tracing::info;

use crate::types::{AgentCategory, AnalysisResult, RankedPick};

pub const VALUATION_BONUS: f64 = 2.0;
pub const FUNDAMENTAL_BONUS: f64 = 1.0;

pub struct RankingEngine;

impl RankingEngine {
    /// Composite score plus bonuses.
    pub fn adjusted_score(result: &AnalysisResult) -> f64 {
        let mut score = result.composite_score;
        if result.is_bullish(AgentCategory::Valuation) {
            score += VALUATION_BONUS;
        }
        if result.is_bullish(AgentCategory::Fundamental) {
            score += FUNDAMENTAL_BONUS;
        }
        score
    }

    /// Top `target` results, best first, ranked from 1.
    pub fn rank(results: Vec<AnalysisResult>, target: usize) -> Vec<RankedPick> {
        let input = results.len();

        let mut scored: Vec<(f64, AnalysisResult)> = results
            .into_iter()
            .map(|r| (r.composite_score, r))
            .collect();
        scored.sort_by(|a, b| by_score_then_symbol(a, b));

        for (score, result) in scored.iter_mut() {
            *score = Self::adjusted_score(result);
        }
        scored.sort_by(|a, b| by_score_then_symbol(a, b));
        scored.truncate(target);

        let picks: Vec<RankedPick> = scored
            .into_iter()
            .enumerate()
            .map(|(i, (adjusted_score, analysis))| RankedPick {
                rank: i + 1,
                adjusted_score,
                analysis,
            })
            .collect();

        info!(input, output = picks.len(), "Ranking complete");
        picks
    }
}

fn by_score_then_symbol(a: &(f64, AnalysisResult), b: &(f64, AnalysisResult)) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| a.1.symbol.cmp(&b.1.symbol))
}
