//! HTTP analysis engine client.
//!
//! Posts `AnalysisRequest`s to the hosted engine (`POST {base}/analyze`)
//! and returns the decision payload verbatim. Retrying is the caller's
//! job; this client only classifies failures:
//! - 429 → `RateLimited`
//! - 5xx, connect/timeout errors → `Transient`
//! - other non-success statuses → `AnalysisFailure`

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::debug;

use super::{AnalysisEngine, AnalysisRequest};
use crate::config::EngineSettings;
use crate::types::ScreenError;

#[derive(Debug, Serialize)]
struct AnalyzeBody<'a> {
    #[serde(flatten)]
    request: &'a AnalysisRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

pub struct EngineClient {
    http: Client,
    settings: EngineSettings,
}

impl EngineClient {
    pub fn new(settings: EngineSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to build analysis engine HTTP client")?;
        Ok(Self { http, settings })
    }

    fn analyze_url(&self) -> String {
        format!("{}/analyze", self.settings.base_url)
    }
}

#[async_trait]
impl AnalysisEngine for EngineClient {
    async fn run_analysis(&self, request: &AnalysisRequest) -> Result<String, ScreenError> {
        let body = AnalyzeBody {
            request,
            model: self.settings.model.as_deref(),
        };

        debug!(symbol = %request.symbol, url = %self.analyze_url(), "Dispatching analysis request");

        let resp = self
            .http
            .post(self.analyze_url())
            .header(
                "Authorization",
                format!("Bearer {}", self.settings.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| ScreenError::Transient(format!("request error: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ScreenError::Transient(format!("body read error: {e}")))?;

        if status.is_success() {
            return Ok(text);
        }
        if status.as_u16() == 429 {
            return Err(ScreenError::RateLimited(format!("HTTP {status}: {text}")));
        }
        if status.is_server_error() {
            return Err(ScreenError::Transient(format!("HTTP {status}: {text}")));
        }
        Err(ScreenError::AnalysisFailure {
            symbol: request.symbol.clone(),
            message: format!("HTTP {status}: {text}"),
        })
    }

    fn name(&self) -> &str {
        self.settings.model.as_deref().unwrap_or("analysis-engine")
    }
}
