//! Market data collaborators.
//!
//! Defines the `MarketSnapshotSource` and `PriceHistorySource` traits
//! consumed by the screening pipeline, and an HTTP/JSON implementation
//! of both in [`market::MarketDataClient`].

pub mod market;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::config::UniverseCategory;
use crate::types::{MarketSnapshot, PriceBar, ScreenError, Symbol};

/// Supplies the symbol universe and point-in-time snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketSnapshotSource: Send + Sync {
    /// Full symbol list of an index or category.
    async fn get_universe(&self, category: UniverseCategory) -> Result<Vec<Symbol>, ScreenError>;

    /// Snapshots keyed by symbol. Symbols unknown to the source are
    /// simply missing from the map.
    async fn get_snapshot(
        &self,
        symbols: &[Symbol],
    ) -> Result<HashMap<Symbol, MarketSnapshot>, ScreenError>;
}

/// Supplies daily OHLCV history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceHistorySource: Send + Sync {
    /// Bars between `start` and `end` inclusive, oldest first.
    /// `Ok(None)` means no data (new listing, gap), which is not an error.
    async fn get_price_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<Vec<PriceBar>>, ScreenError>;
}
