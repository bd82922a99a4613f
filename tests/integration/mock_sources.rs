//! Deterministic collaborators for integration testing.
//!
//! A thirty-symbol market whose snapshots, price histories, and engine
//! verdicts are pure functions of the symbol, so every run of the
//! pipeline over them has one correct answer.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use screener::analysis::{AnalysisEngine, AnalysisRequest};
use screener::config::UniverseCategory;
use screener::data::{MarketSnapshotSource, PriceHistorySource};
use screener::types::{MarketSnapshot, PriceBar, ScreenError, Symbol};

pub const UNIVERSE_SIZE: usize = 30;

/// Symbol index within the mock universe.
pub fn index_of(symbol: &str) -> usize {
    symbol
        .parse::<usize>()
        .map(|n| n.saturating_sub(600_000))
        .unwrap_or(0)
}

pub fn symbol_at(i: usize) -> Symbol {
    format!("{}", 600_000 + i)
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Universe and snapshots.
///
/// Filter behaviour by index:
/// - `i % 5 == 4` → market cap below the default threshold
/// - `i == 3` → special-treatment name
/// - `i == 8` → no P/E (loss-making)
/// - `i == 13` → missing from the snapshot entirely
#[derive(Default)]
pub struct MockMarket {
    pub universe_down: AtomicBool,
    pub snapshot_down: AtomicBool,
    pub snapshot_calls: AtomicUsize,
}

impl MockMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot_for(i: usize) -> MarketSnapshot {
        let name = if i == 3 {
            format!("*ST Mock {i}")
        } else {
            format!("Mock Industries {i}")
        };
        MarketSnapshot {
            symbol: symbol_at(i),
            name,
            market_cap: if i % 5 == 4 { 2e8 } else { 5e9 + i as f64 * 1e8 },
            daily_volume: 5e7,
            pe_ratio: if i == 8 { None } else { Some(10.0 + i as f64) },
        }
    }

    /// Whether the default quick filter keeps index `i`.
    pub fn passes_filter(i: usize) -> bool {
        i % 5 != 4 && i != 3 && i != 8 && i != 13
    }
}

#[async_trait]
impl MarketSnapshotSource for MockMarket {
    async fn get_universe(&self, _category: UniverseCategory) -> Result<Vec<Symbol>, ScreenError> {
        if self.universe_down.load(Ordering::SeqCst) {
            return Err(ScreenError::upstream("mock-market", "universe endpoint down"));
        }
        Ok((0..UNIVERSE_SIZE).map(symbol_at).collect())
    }

    async fn get_snapshot(
        &self,
        symbols: &[Symbol],
    ) -> Result<HashMap<Symbol, MarketSnapshot>, ScreenError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        if self.snapshot_down.load(Ordering::SeqCst) {
            return Err(ScreenError::upstream("mock-market", "snapshot endpoint down"));
        }
        Ok(symbols
            .iter()
            .map(|s| index_of(s))
            .filter(|&i| i != 13)
            .map(|i| (symbol_at(i), Self::snapshot_for(i)))
            .collect())
    }
}

/// Price histories: index `i` trends up with slope proportional to `i`,
/// except `i == 7` which only has ten bars.
#[derive(Default)]
pub struct MockHistory;

#[async_trait]
impl PriceHistorySource for MockHistory {
    async fn get_price_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<Vec<PriceBar>>, ScreenError> {
        let i = index_of(symbol);
        let days = (end - start).num_days().max(0) as usize + 1;
        let len = if i == 7 { 10 } else { days.min(60) };
        let slope = 0.002 * i as f64;

        let bars = (0..len)
            .map(|d| {
                let close = 10.0 * (1.0 + slope * d as f64);
                PriceBar {
                    date: end - Duration::days((len - 1 - d) as i64),
                    open: close,
                    high: close * 1.01,
                    low: close * 0.99,
                    close,
                    volume: 1_000_000.0 + (d as f64) * 1000.0,
                }
            })
            .collect();
        Ok(Some(bars))
    }
}

// ---------------------------------------------------------------------------
// Analysis engine
// ---------------------------------------------------------------------------

/// Engine whose verdict depends only on the symbol.
///
/// - valuation bullish for even indices, bearish for odd
/// - confidence rises with `i % 10`
/// - `malformed` symbols get a payload with no JSON object
/// - `rate_limited_once` symbols fail with 429 on the first call
#[derive(Default)]
pub struct MockEngine {
    malformed: Vec<Symbol>,
    rate_limited_once: Vec<Symbol>,
    delay_ms: u64,
    calls: Mutex<HashMap<Symbol, usize>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            delay_ms: 5,
            ..Self::default()
        }
    }

    /// Answer these symbols with an unparseable payload.
    pub fn malformed(mut self, symbols: &[&str]) -> Self {
        self.malformed = symbols.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Fail the first call for these symbols with a 429.
    pub fn rate_limited_once(mut self, symbols: &[&str]) -> Self {
        self.rate_limited_once = symbols.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn calls(&self, symbol: &str) -> usize {
        self.calls.lock().unwrap().get(symbol).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn payload_for(i: usize) -> String {
        let conf = 0.5 + (i % 10) as f64 / 20.0;
        let valuation = if i % 2 == 0 { "bullish" } else { "bearish" };
        format!(
            "```json\n{{\"action\": \"buy\", \"confidence\": {conf}, \"reasoning\": \"mock verdict {i}\",\
             \"agent_signals\": [\
               {{\"agent\": \"Technical Analysis\", \"signal\": \"bullish\", \"confidence\": {conf}}},\
               {{\"agent\": \"Fundamental Analysis\", \"signal\": \"neutral\", \"confidence\": 0.5}},\
               {{\"agent\": \"Sentiment Analysis\", \"signal\": \"neutral\", \"confidence\": 0.5}},\
               {{\"agent\": \"Valuation Analysis\", \"signal\": \"{valuation}\", \"confidence\": {conf}}},\
               {{\"agent\": \"Risk Management\", \"signal\": \"neutral\", \"confidence\": 1.0}}\
             ]}}\n```"
        )
    }
}

#[async_trait]
impl AnalysisEngine for MockEngine {
    async fn run_analysis(&self, request: &AnalysisRequest) -> Result<String, ScreenError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(request.symbol.clone()).or_default();
            *n += 1;
            *n
        };

        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        self.live.fetch_sub(1, Ordering::SeqCst);

        if call == 1 && self.rate_limited_once.contains(&request.symbol) {
            return Err(ScreenError::RateLimited("HTTP 429".into()));
        }
        if self.malformed.contains(&request.symbol) {
            return Ok("Service busy, please retry later.".to_string());
        }
        Ok(Self::payload_for(index_of(&request.symbol)))
    }

    fn name(&self) -> &str {
        "mock-engine"
    }
}
