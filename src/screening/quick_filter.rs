//! First-stage numeric filter over market snapshots.
//!
//! Cheap and sequential: one snapshot fetch for the whole universe, then
//! a per-symbol threshold check. If the snapshot source is down, the
//! filter degrades to passing a bounded prefix of its input and reports
//! that it did so.

use std::collections::HashMap;
use tracing::{debug, error, info};

use crate::config::ScreeningConfig;
use crate::data::MarketSnapshotSource;
use crate::types::{MarketSnapshot, Symbol};

/// Result of the quick filter stage.
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    /// Surviving symbols, in input order.
    pub symbols: Vec<Symbol>,
    /// Snapshots fetched for the run (empty in fallback mode).
    pub snapshots: HashMap<Symbol, MarketSnapshot>,
    pub fallback_used: bool,
}

pub struct QuickFilter {
    min_market_cap: f64,
    min_daily_volume: f64,
    max_pe_ratio: f64,
    exclude_st: bool,
    /// Hard cap on the output size.
    cap: usize,
    fallback_size: usize,
}

impl QuickFilter {
    pub fn new(config: &ScreeningConfig, fallback_size: usize) -> Self {
        Self {
            min_market_cap: config.min_market_cap,
            min_daily_volume: config.min_daily_volume,
            max_pe_ratio: config.max_pe_ratio,
            exclude_st: config.exclude_st,
            cap: config.max_technical_candidates,
            fallback_size,
        }
    }

    /// Whether a snapshot meets every threshold.
    pub fn passes(&self, snap: &MarketSnapshot) -> bool {
        let pe_ok = matches!(snap.pe_ratio, Some(pe) if pe > 0.0 && pe <= self.max_pe_ratio);

        snap.market_cap >= self.min_market_cap
            && snap.daily_volume >= self.min_daily_volume
            && pe_ok
            && !(self.exclude_st && snap.is_special_treatment())
    }

    /// Filter `symbols` using a fresh snapshot from `source`.
    pub async fn apply(
        &self,
        source: &dyn MarketSnapshotSource,
        symbols: &[Symbol],
    ) -> FilterOutcome {
        let snapshots = match source.get_snapshot(symbols).await {
            Ok(s) => s,
            Err(e) => {
                let prefix = self.fallback_size.min(self.cap);
                error!(
                    error = %e,
                    fallback = prefix,
                    "Snapshot source unavailable, passing input prefix unfiltered"
                );
                return FilterOutcome {
                    symbols: symbols.iter().take(prefix).cloned().collect(),
                    snapshots: HashMap::new(),
                    fallback_used: true,
                };
            }
        };

        let mut passed: Vec<Symbol> = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match snapshots.get(symbol) {
                Some(snap) if self.passes(snap) => passed.push(symbol.clone()),
                Some(snap) => debug!(snapshot = %snap, "Rejected by quick filter"),
                None => debug!(symbol = %symbol, "No snapshot, excluded"),
            }
        }
        let eligible = passed.len();
        passed.truncate(self.cap);

        info!(
            input = symbols.len(),
            eligible,
            output = passed.len(),
            "Quick filter complete"
        );

        FilterOutcome {
            symbols: passed,
            snapshots,
            fallback_used: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
