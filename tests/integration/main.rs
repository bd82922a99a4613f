//! End-to-end pipeline tests against deterministic mock collaborators.

mod mock_sources;

use chrono::NaiveDate;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use mock_sources::{MockEngine, MockHistory, MockMarket, UNIVERSE_SIZE};
use screener::config::{PipelineConfig, ScreeningConfig};
use screener::screening::Screener;
use screener::types::{RankedPick, Stage};

fn screening_config() -> ScreeningConfig {
    ScreeningConfig {
        target_count: 5,
        as_of: NaiveDate::from_ymd_opt(2024, 6, 28),
        ..ScreeningConfig::default()
    }
}

fn pipeline() -> PipelineConfig {
    PipelineConfig {
        pacing_delay_ms: 1,
        backoff_base_ms: 1,
        analysis_timeout_secs: 5,
        ..PipelineConfig::default()
    }
}

fn make_screener(market: Arc<MockMarket>, engine: Arc<MockEngine>, pipeline: PipelineConfig) -> Screener {
    Screener::new(market, Arc::new(MockHistory), engine, pipeline)
}

fn symbols(picks: &[RankedPick]) -> Vec<&str> {
    picks.iter().map(|p| p.analysis.symbol.as_str()).collect()
}

#[tokio::test]
async fn test_full_pipeline_ranks_expected_shortlist() {
    let market = Arc::new(MockMarket::new());
    let engine = Arc::new(MockEngine::new());
    let screener = make_screener(market, engine.clone(), pipeline());

    let report = screener.run_with_report(&screening_config()).await;

    // Composite = 60·conf + 20, +2 when valuation is bullish (even index).
    // Indices ending in 9 and 600008 never pass the filter.
    assert_eq!(
        symbols(&report.picks),
        vec!["600018", "600028", "600017", "600027", "600006"]
    );
    let ranks: Vec<usize> = report.picks.iter().map(|p| p.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    for pair in report.picks.windows(2) {
        assert!(pair[0].adjusted_score >= pair[1].adjusted_score);
    }

    let top = &report.picks[0].analysis;
    assert_eq!(top.name, "Mock Industries 18");
    assert!(top.current_price > 10.0);
    assert!(top.technical_score > 0.0 && top.technical_score <= 1.0);
    assert!(top.key_reasons.iter().any(|r| r.starts_with("Valuation")));

    assert!(!report.filter_fallback_used);
    assert!(report.peak_in_flight <= 3);
    assert!(engine.max_live() <= 3);

    let universe = report.stage(Stage::Universe).unwrap();
    assert_eq!(universe.output, UNIVERSE_SIZE);
    let filtered = report.stage(Stage::QuickFilter).unwrap();
    assert_eq!(filtered.output, 21);
    let technical = report.stage(Stage::Technical).unwrap();
    assert_eq!(technical.output, 20);
    let deep = report.stage(Stage::DeepAnalysis).unwrap();
    assert_eq!(deep.output, 20);
    assert_eq!(deep.failed, 0);
    assert_eq!(engine.total_calls(), 20);
}

#[tokio::test]
async fn test_filtered_symbols_never_reach_engine() {
    let engine = Arc::new(MockEngine::new());
    let screener = make_screener(Arc::new(MockMarket::new()), engine.clone(), pipeline());
    screener.run_screening(&screening_config()).await;

    for i in 0..UNIVERSE_SIZE {
        let symbol = mock_sources::symbol_at(i);
        let expected = usize::from(MockMarket::passes_filter(i) && i != 7);
        assert_eq!(engine.calls(&symbol), expected, "symbol {symbol}");
    }
}

#[tokio::test]
async fn test_repeat_runs_are_identical() {
    let first = make_screener(Arc::new(MockMarket::new()), Arc::new(MockEngine::new()), pipeline())
        .run_screening(&screening_config())
        .await;

    let serial = PipelineConfig {
        technical_workers: 1,
        analysis_concurrency: 1,
        ..pipeline()
    };
    let second = make_screener(Arc::new(MockMarket::new()), Arc::new(MockEngine::new()), serial)
        .run_screening(&screening_config())
        .await;

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_snapshot_outage_falls_back_to_prefix() {
    let market = Arc::new(MockMarket::new());
    market.snapshot_down.store(true, Ordering::SeqCst);
    let screener = make_screener(market.clone(), Arc::new(MockEngine::new()), pipeline());

    let report = screener.run_with_report(&screening_config()).await;

    assert!(report.filter_fallback_used);
    assert_eq!(market.snapshot_calls.load(Ordering::SeqCst), 1);
    // The whole universe fits in the prefix, so indices ending in 9 get through
    assert_eq!(report.stage(Stage::QuickFilter).unwrap().output, UNIVERSE_SIZE);
    assert_eq!(
        symbols(&report.picks),
        vec!["600009", "600019", "600029", "600008", "600018"]
    );
    assert_eq!(report.picks[0].analysis.name, "Stock_600009");
}

#[tokio::test]
async fn test_snapshot_outage_prefix_is_bounded() {
    let market = Arc::new(MockMarket::new());
    market.snapshot_down.store(true, Ordering::SeqCst);
    let small = PipelineConfig {
        filter_fallback_size: 10,
        ..pipeline()
    };
    let engine = Arc::new(MockEngine::new());
    let report = make_screener(market, engine.clone(), small)
        .run_with_report(&screening_config())
        .await;

    assert_eq!(report.stage(Stage::QuickFilter).unwrap().output, 10);
    // Prefix 600000..600009 minus the short history at 600007
    assert_eq!(engine.total_calls(), 9);
    assert!(report.picks.iter().all(|p| p.analysis.symbol.as_str() < "600010"));
}

#[tokio::test]
async fn test_universe_outage_returns_empty() {
    let market = Arc::new(MockMarket::new());
    market.universe_down.store(true, Ordering::SeqCst);
    let engine = Arc::new(MockEngine::new());
    let report = make_screener(market.clone(), engine.clone(), pipeline())
        .run_with_report(&screening_config())
        .await;

    assert!(report.picks.is_empty());
    assert_eq!(market.snapshot_calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.total_calls(), 0);
}

#[tokio::test]
async fn test_rate_limited_symbol_is_retried_and_kept() {
    let engine = Arc::new(MockEngine::new().rate_limited_once(&["600018"]));
    let picks = make_screener(Arc::new(MockMarket::new()), engine.clone(), pipeline())
        .run_screening(&screening_config())
        .await;

    assert_eq!(engine.calls("600018"), 2);
    assert_eq!(symbols(&picks)[0], "600018");
}

#[tokio::test]
async fn test_malformed_payloads_are_dropped() {
    let engine = Arc::new(MockEngine::new().malformed(&["600018", "600028"]));
    let report = make_screener(Arc::new(MockMarket::new()), engine.clone(), pipeline())
        .run_with_report(&screening_config())
        .await;

    assert_eq!(
        symbols(&report.picks),
        vec!["600017", "600027", "600006", "600016", "600026"]
    );
    let deep = report.stage(Stage::DeepAnalysis).unwrap();
    assert_eq!(deep.failed, 2);
    assert_eq!(deep.output, 18);
}

#[tokio::test]
async fn test_target_larger_than_survivors() {
    let config = ScreeningConfig {
        target_count: 100,
        ..screening_config()
    };
    let picks = make_screener(Arc::new(MockMarket::new()), Arc::new(MockEngine::new()), pipeline())
        .run_screening(&config)
        .await;
    assert_eq!(picks.len(), 20);
    assert_eq!(picks.last().map(|p| p.rank), Some(20));
}

#[tokio::test]
async fn test_report_serialises() {
    let report = make_screener(Arc::new(MockMarket::new()), Arc::new(MockEngine::new()), pipeline())
        .run_with_report(&screening_config())
        .await;
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["stages"].as_array().map(|s| s.len()), Some(5));
    assert_eq!(json["stages"][1]["stage"], "quick_filter");
    assert_eq!(json["picks"][0]["analysis"]["symbol"], "600018");
}
