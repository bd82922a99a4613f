//! HTTP market data client.
//!
//! Talks to a JSON market data service that fronts the exchange feeds.
//!
//! Endpoints (relative to the configured base URL):
//! - `GET /universe?category=csi300&index=000300` → `{"symbols": ["600519", ...]}`
//!   (`index` is omitted for the full listing)
//! - `GET /snapshot?symbols=600519,000001` → `{"snapshots": [...]}`
//! - `GET /history?symbol=600519&start=2024-01-01&end=2024-03-31` → `{"bars": [...]}`
//!
//! A 404 on `/history` means the symbol has no data for the window.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{MarketSnapshotSource, PriceHistorySource};
use crate::config::{MarketDataConfig, UniverseCategory};
use crate::types::{MarketSnapshot, PriceBar, ScreenError, Symbol};

const SOURCE_NAME: &str = "market-data";

/// Symbols per snapshot request (keeps query strings bounded).
const SNAPSHOT_CHUNK: usize = 200;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UniverseResponse {
    #[serde(default)]
    symbols: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(default)]
    snapshots: Vec<MarketSnapshot>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    bars: Vec<PriceBar>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct MarketDataClient {
    http: Client,
    base_url: String,
}

impl MarketDataClient {
    pub fn new(config: &MarketDataConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("screener/0.1.0")
            .build()
            .context("Failed to build market data HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn universe_url(&self, category: UniverseCategory) -> String {
        match category.index_code() {
            Some(index) => format!(
                "{}/universe?category={}&index={index}",
                self.base_url,
                category.as_str()
            ),
            None => format!("{}/universe?category={}", self.base_url, category.as_str()),
        }
    }

    fn snapshot_url(&self, symbols: &[Symbol]) -> String {
        let joined = symbols.join(",");
        format!(
            "{}/snapshot?symbols={}",
            self.base_url,
            urlencoding::encode(&joined)
        )
    }

    fn history_url(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        format!(
            "{}/history?symbol={}&start={}&end={}",
            self.base_url,
            urlencoding::encode(symbol),
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
        )
    }

    /// GET a URL and decode its JSON body, mapping every failure to
    /// `UpstreamUnavailable`.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ScreenError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ScreenError::upstream(SOURCE_NAME, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ScreenError::upstream(
                SOURCE_NAME,
                format!("HTTP {status}: {body}"),
            ));
        }

        resp.json::<T>()
            .await
            .map_err(|e| ScreenError::upstream(SOURCE_NAME, format!("bad JSON: {e}")))
    }
}

#[async_trait]
impl MarketSnapshotSource for MarketDataClient {
    async fn get_universe(&self, category: UniverseCategory) -> Result<Vec<Symbol>, ScreenError> {
        let body: UniverseResponse = self.get_json(&self.universe_url(category)).await?;
        info!(category = %category, count = body.symbols.len(), "Universe fetched");
        Ok(body.symbols)
    }

    async fn get_snapshot(
        &self,
        symbols: &[Symbol],
    ) -> Result<HashMap<Symbol, MarketSnapshot>, ScreenError> {
        let mut out = HashMap::with_capacity(symbols.len());
        for chunk in symbols.chunks(SNAPSHOT_CHUNK) {
            let body: SnapshotResponse = self.get_json(&self.snapshot_url(chunk)).await?;
            for snap in body.snapshots {
                out.insert(snap.symbol.clone(), snap);
            }
        }
        debug!(requested = symbols.len(), received = out.len(), "Snapshots fetched");
        Ok(out)
    }
}

#[async_trait]
impl PriceHistorySource for MarketDataClient {
    async fn get_price_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<Vec<PriceBar>>, ScreenError> {
        let url = self.history_url(symbol, start, end);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ScreenError::upstream(SOURCE_NAME, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ScreenError::upstream(
                SOURCE_NAME,
                format!("HTTP {} for {symbol} history", resp.status()),
            ));
        }

        let body: HistoryResponse = resp
            .json()
            .await
            .map_err(|e| ScreenError::upstream(SOURCE_NAME, format!("bad JSON: {e}")))?;

        if body.bars.is_empty() {
            return Ok(None);
        }
        let mut bars = body.bars;
        bars.sort_by_key(|b| b.date);
        Ok(Some(bars))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
