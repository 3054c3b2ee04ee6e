//! Testes de ponta a ponta do pipeline, com fonte e provedores roteirizados.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trade_risk_pipeline::{
    CycleOutcome, DataSource, PipelineError, RawTick, RecentOrder, RiskBand, RiskLevel,
    RiskPipeline, ScoringError, ScoringProvider, SourceError, StopOutcome, TickBatch,
};

// ============================================================================
// Fakes
// ============================================================================

/// Devolve um tick por símbolo a cada chamada, com volume = score em milésimos.
struct ScriptedSource {
    symbols: Vec<String>,
    volumes: Vec<u64>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(symbols: &[&str], volumes: Vec<u64>) -> Self {
        Self {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            volumes,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn fetch(&self) -> Result<TickBatch, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let volume = *self
            .volumes
            .get(call)
            .ok_or_else(|| SourceError::Unavailable("roteiro esgotado".to_string()))?;

        // timestamps crescentes, sempre no passado recente
        let ts = Utc::now() - ChronoDuration::seconds(60) + ChronoDuration::seconds(call as i64);
        Ok(self
            .symbols
            .iter()
            .map(|symbol| {
                let tick = RawTick {
                    symbol: symbol.clone(),
                    price: 100.0 + call as f64,
                    volume,
                    open: 100.0,
                    high: 101.0,
                    low: 99.0,
                    close: 100.0 + call as f64,
                    timestamp: ts.to_rfc3339_opts(SecondsFormat::Millis, true),
                    trade_id: format!("{symbol}_{call}"),
                };
                (symbol.clone(), tick)
            })
            .collect())
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols.clone()
    }
}

struct FromVolume;

#[async_trait]
impl ScoringProvider for FromVolume {
    fn name(&self) -> &str {
        "from-volume"
    }
    async fn score(&self, tick: &RawTick) -> Result<f64, ScoringError> {
        Ok(tick.volume as f64 / 1_000.0)
    }
}

struct Constant(f64);

#[async_trait]
impl ScoringProvider for Constant {
    fn name(&self) -> &str {
        "constant"
    }
    async fn score(&self, _tick: &RawTick) -> Result<f64, ScoringError> {
        Ok(self.0)
    }
}

struct AlwaysFailing;

#[async_trait]
impl ScoringProvider for AlwaysFailing {
    fn name(&self) -> &str {
        "always-failing"
    }
    async fn score(&self, _tick: &RawTick) -> Result<f64, ScoringError> {
        Err(ScoringError::Failed {
            provider: "always-failing".to_string(),
            reason: "sem modelo".to_string(),
        })
    }
}

fn pipeline(symbols: &[&str], volumes: Vec<u64>, capacity: usize) -> RiskPipeline {
    RiskPipeline::builder(
        Arc::new(ScriptedSource::new(symbols, volumes)),
        Arc::new(FromVolume),
        Arc::new(Constant(0.3)),
    )
    .history_capacity(capacity)
    .min_fetch_spacing(Duration::from_millis(10))
    .staleness_bound(Duration::from_secs(3_600))
    .build()
    .expect("pipeline")
}

// ============================================================================
// Cenários
// ============================================================================

#[tokio::test(start_paused = true)]
async fn two_pass_classification_with_default_threshold() {
    let p = pipeline(&["SENSEX"], vec![720, 640, 100], 100);
    for _ in 0..3 {
        assert!(matches!(
            p.scheduler().run_cycle().await,
            CycleOutcome::Delivered { ticks: 1, failed: 0 }
        ));
    }

    let trades = p.get_recent_trades(10, RecentOrder::OldestFirst);
    let levels: Vec<_> = trades.iter().map(|t| t.risk_level).collect();
    assert_eq!(levels, [RiskLevel::High, RiskLevel::Low, RiskLevel::Low]);
    assert!(trades.iter().all(|t| !t.latency_flag));

    // 0.64 é LOW na ingestão mas medium nos alertas
    let alerts = p.get_alerts(100, 20);
    let bands: Vec<_> = alerts.iter().map(|a| (a.trade_id.as_str(), a.risk_level)).collect();
    assert_eq!(
        bands,
        [("SENSEX_1", RiskBand::Medium), ("SENSEX_0", RiskBand::High)]
    );
}

#[tokio::test(start_paused = true)]
async fn threshold_validation_and_update() {
    let p = pipeline(&["SENSEX"], vec![650], 100);

    assert_eq!(p.set_risk_threshold(1.5), Err(PipelineError::ThresholdOutOfRange(1.5)));
    assert_eq!(p.set_risk_threshold(-0.1), Err(PipelineError::ThresholdOutOfRange(-0.1)));
    assert_eq!(p.get_status().current_threshold, 0.7);

    assert_eq!(p.set_risk_threshold(0.42), Ok(0.42));
    assert_eq!(p.get_status().current_threshold, 0.42);

    // próxima ingestão já usa 0.42
    p.scheduler().run_cycle().await;
    let latest = p.get_latest();
    assert_eq!(latest["SENSEX"].risk_level, RiskLevel::High);
}

#[tokio::test(start_paused = true)]
async fn history_is_bounded_and_latest_tracks_every_symbol() {
    let p = pipeline(&["NIFTY 50", "SENSEX"], vec![100; 6], 5);
    for _ in 0..6 {
        p.scheduler().run_cycle().await;
    }

    let status = p.get_status();
    assert_eq!(status.history_size, 5);
    assert_eq!(status.history_capacity, 5);
    assert_eq!(status.total_processed, 12);
    assert_eq!(status.evicted, 7);
    assert_eq!(status.symbols, vec!["NIFTY 50", "SENSEX"]);
    assert!(status.last_update.is_some());

    let newest = p.get_recent_trades(25, RecentOrder::NewestFirst);
    assert_eq!(newest.len(), 5);
    assert_eq!(newest[0].tick.trade_id, "SENSEX_5");

    let latest = p.get_latest();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest["NIFTY 50"].tick.trade_id, "NIFTY 50_5");
}

#[tokio::test(start_paused = true)]
async fn alerts_are_capped_and_sorted_newest_first() {
    let p = pipeline(&["BANKNIFTY"], vec![900; 30], 1_000);
    for _ in 0..30 {
        p.scheduler().run_cycle().await;
    }

    let alerts = p.get_alerts(100, 20);
    assert_eq!(alerts.len(), 20);
    assert_eq!(alerts[0].trade_id, "BANKNIFTY_29");
    for pair in alerts.windows(2) {
        assert!(pair[0].timestamp >= pair[1].timestamp);
    }
}

#[tokio::test(start_paused = true)]
async fn failing_provider_scores_neutral_across_cycles() {
    let p = RiskPipeline::builder(
        Arc::new(ScriptedSource::new(&["NIFTY 50", "SENSEX"], vec![100; 3])),
        Arc::new(AlwaysFailing),
        Arc::new(Constant(0.2)),
    )
    .min_fetch_spacing(Duration::from_millis(10))
    .build()
    .expect("pipeline");

    for _ in 0..3 {
        p.scheduler().run_cycle().await;
    }
    let trades = p.get_recent_trades(25, RecentOrder::OldestFirst);
    assert_eq!(trades.len(), 6);
    assert!(trades.iter().all(|t| t.manipulation_score == 0.5));
    assert!(trades.iter().all(|t| t.insider_score == 0.2));
}

#[tokio::test(start_paused = true)]
async fn background_loop_survives_source_exhaustion() {
    let p = pipeline(&["SENSEX"], vec![100, 200], 100);
    assert!(p.start(Duration::from_secs(1)));

    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert!(p.get_status().scheduler_running);
    assert_eq!(p.stop().await, StopOutcome::Joined);

    // 2 ciclos úteis, o resto falhou sem derrubar o loop
    assert_eq!(p.get_status().total_processed, 2);
    assert!(p.scheduler().source_failures() >= 2);
    assert!(!p.get_status().scheduler_running);
}
