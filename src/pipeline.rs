//! Pipeline de Risco (contexto explícito)
//!
//! [`RiskPipeline`] é dono de todo o estado compartilhado (histórico, limiar,
//! agendador) e expõe as operações de fronteira. Nada é global: cada instância
//! tem seu próprio estado.

use crate::alerts::AlertSynthesizer;
use crate::dispatcher::ScoringDispatcher;
use crate::error::PipelineError;
use crate::history::TradeHistory;
use crate::scheduler::{IngestionScheduler, StopOutcome};
use crate::scoring::ScoringProvider;
use crate::source::DataSource;
use crate::threshold::RiskThreshold;
use crate::types::{Alert, EnrichedTrade, PipelineStatus, RecentOrder};
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_RECENT_LIMIT: usize = 25;

pub struct PipelineBuilder {
    source: Arc<dyn DataSource>,
    manipulation: Arc<dyn ScoringProvider>,
    insider: Arc<dyn ScoringProvider>,
    threshold: f64,
    history_capacity: usize,
    staleness_bound: Duration,
    score_timeout: Option<Duration>,
    min_spacing: Duration,
    stop_timeout: Duration,
    journal: Option<mpsc::Sender<EnrichedTrade>>,
}

impl PipelineBuilder {
    pub fn new(
        source: Arc<dyn DataSource>,
        manipulation: Arc<dyn ScoringProvider>,
        insider: Arc<dyn ScoringProvider>,
    ) -> Self {
        Self {
            source,
            manipulation,
            insider,
            threshold: crate::threshold::DEFAULT_RISK_THRESHOLD,
            history_capacity: crate::history::DEFAULT_HISTORY_CAPACITY,
            staleness_bound: crate::dispatcher::DEFAULT_STALENESS,
            score_timeout: None,
            min_spacing: crate::scheduler::DEFAULT_MIN_SPACING,
            stop_timeout: crate::scheduler::DEFAULT_STOP_TIMEOUT,
            journal: None,
        }
    }

    pub fn risk_threshold(mut self, value: f64) -> Self {
        self.threshold = value;
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn staleness_bound(mut self, bound: Duration) -> Self {
        self.staleness_bound = bound;
        self
    }

    pub fn score_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.score_timeout = timeout;
        self
    }

    pub fn min_fetch_spacing(mut self, spacing: Duration) -> Self {
        self.min_spacing = spacing;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn journal(mut self, tx: mpsc::Sender<EnrichedTrade>) -> Self {
        self.journal = Some(tx);
        self
    }

    /// Monta o pipeline. Falha apenas com limiar inicial fora de `[0, 1]`.
    pub fn build(self) -> Result<RiskPipeline, PipelineError> {
        let threshold = Arc::new(RiskThreshold::new(self.threshold)?);
        let history = Arc::new(TradeHistory::new(self.history_capacity));

        let mut dispatcher = ScoringDispatcher::new(
            self.manipulation,
            self.insider,
            Arc::clone(&history),
            Arc::clone(&threshold),
        )
        .with_staleness_bound(self.staleness_bound)
        .with_score_timeout(self.score_timeout);
        if let Some(tx) = self.journal {
            dispatcher = dispatcher.with_journal(tx);
        }
        let dispatcher = Arc::new(dispatcher);

        let scheduler = IngestionScheduler::new(self.source)
            .with_min_spacing(self.min_spacing)
            .with_stop_timeout(self.stop_timeout);
        scheduler.register_consumer(dispatcher);

        let alerts = AlertSynthesizer::new(Arc::clone(&history), Arc::clone(&threshold));

        Ok(RiskPipeline {
            history,
            threshold,
            scheduler,
            alerts,
        })
    }
}

pub struct RiskPipeline {
    history: Arc<TradeHistory>,
    threshold: Arc<RiskThreshold>,
    scheduler: IngestionScheduler,
    alerts: AlertSynthesizer,
}

impl RiskPipeline {
    pub fn builder(
        source: Arc<dyn DataSource>,
        manipulation: Arc<dyn ScoringProvider>,
        insider: Arc<dyn ScoringProvider>,
    ) -> PipelineBuilder {
        PipelineBuilder::new(source, manipulation, insider)
    }

    // ========================================================================
    // Ciclo de vida
    // ========================================================================

    /// Ver [`IngestionScheduler::start`]: `false` se nada foi iniciado.
    pub fn start(&self, interval: Duration) -> bool {
        self.scheduler.start(interval)
    }

    pub async fn stop(&self) -> StopOutcome {
        self.scheduler.stop().await
    }

    pub fn scheduler(&self) -> &IngestionScheduler {
        &self.scheduler
    }

    // ========================================================================
    // Operações de fronteira
    // ========================================================================

    /// Último trade enriquecido de cada símbolo (cópia).
    pub fn get_latest(&self) -> BTreeMap<String, EnrichedTrade> {
        self.history.latest()
    }

    /// Últimos `limit` trades na ordem pedida.
    pub fn get_recent_trades(&self, limit: usize, order: RecentOrder) -> Vec<EnrichedTrade> {
        let mut trades = self.history.snapshot(limit);
        if order == RecentOrder::NewestFirst {
            trades.reverse();
        }
        trades
    }

    /// Alertas da janela mais recente, reclassificados com o limiar atual.
    pub fn get_alerts(&self, window: usize, cap: usize) -> Vec<Alert> {
        self.alerts.get_alerts(window, cap)
    }

    pub fn set_risk_threshold(&self, value: f64) -> Result<f64, PipelineError> {
        self.threshold.set(value)
    }

    pub fn risk_threshold(&self) -> f64 {
        self.threshold.get()
    }

    pub fn get_status(&self) -> PipelineStatus {
        let stats = self.history.stats();
        PipelineStatus {
            history_size: stats.len,
            history_capacity: stats.capacity,
            current_threshold: self.threshold.get(),
            scheduler_running: self.scheduler.is_running(),
            symbols: self.scheduler.source().symbols(),
            total_processed: stats.total_appended,
            evicted: stats.evicted,
            last_update: stats.last_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::tests::{Failing, Fixed};
    use crate::source::SyntheticSource;
    use crate::source::default_symbols;
    use crate::types::RiskLevel;

    fn pipeline(manipulation: f64) -> RiskPipeline {
        RiskPipeline::builder(
            Arc::new(SyntheticSource::new(default_symbols())),
            Arc::new(Fixed(manipulation)),
            Arc::new(Fixed(0.1)),
        )
        .history_capacity(5)
        .min_fetch_spacing(Duration::from_secs(1))
        .staleness_bound(Duration::from_secs(60))
        .build()
        .expect("pipeline")
    }

    #[test]
    fn builder_rejects_invalid_initial_threshold() {
        let result = RiskPipeline::builder(
            Arc::new(SyntheticSource::new(default_symbols())),
            Arc::new(Fixed(0.1)),
            Arc::new(Fixed(0.1)),
        )
        .risk_threshold(1.2)
        .build();
        assert!(matches!(result, Err(PipelineError::ThresholdOutOfRange(_))));
    }

    #[test]
    fn empty_pipeline_returns_empty_views() {
        let p = pipeline(0.9);
        assert!(p.get_latest().is_empty());
        assert!(p.get_recent_trades(DEFAULT_RECENT_LIMIT, RecentOrder::OldestFirst).is_empty());
        assert!(p.get_alerts(100, 20).is_empty());

        let status = p.get_status();
        assert_eq!(status.history_size, 0);
        assert_eq!(status.current_threshold, 0.7);
        assert!(!status.scheduler_running);
        assert_eq!(status.symbols, default_symbols());
        assert_eq!(status.last_update, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_fill_history_and_views() {
        let p = pipeline(0.9);
        p.scheduler().run_cycle().await;
        p.scheduler().run_cycle().await;

        // capacidade 5, 6 trades: o mais antigo saiu
        let status = p.get_status();
        assert_eq!(status.history_size, 5);
        assert_eq!(status.total_processed, 6);
        assert_eq!(status.evicted, 1);
        assert!(status.last_update.is_some());

        assert_eq!(p.get_latest().len(), 3);
        let oldest_first = p.get_recent_trades(3, RecentOrder::OldestFirst);
        let newest_first = p.get_recent_trades(3, RecentOrder::NewestFirst);
        assert_eq!(oldest_first.first(), newest_first.last());
        assert!(oldest_first.iter().all(|t| t.risk_level == RiskLevel::High));

        let alerts = p.get_alerts(100, 2);
        assert_eq!(alerts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_update_applies_to_next_classification() {
        let p = pipeline(0.64);
        p.scheduler().run_cycle().await;
        assert_eq!(p.get_alerts(100, 20).len(), 3);

        assert!(p.set_risk_threshold(1.5).is_err());
        assert!(p.set_risk_threshold(-0.1).is_err());
        assert_eq!(p.risk_threshold(), 0.7);

        p.set_risk_threshold(0.8).expect("valid");
        assert!(p.get_alerts(100, 20).is_empty());
        assert_eq!(p.get_status().current_threshold, 0.8);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_provider_does_not_abort_cycle() {
        let p = RiskPipeline::builder(
            Arc::new(SyntheticSource::new(default_symbols())),
            Arc::new(Failing),
            Arc::new(Fixed(0.1)),
        )
        .min_fetch_spacing(Duration::from_secs(1))
        .build()
        .expect("pipeline");

        p.scheduler().run_cycle().await;
        let trades = p.get_recent_trades(10, RecentOrder::OldestFirst);
        assert_eq!(trades.len(), 3);
        assert!(trades.iter().all(|t| t.manipulation_score == 0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_scheduler_state() {
        let p = pipeline(0.1);
        assert!(p.start(Duration::from_secs(1)));
        assert!(p.get_status().scheduler_running);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(p.stop().await, StopOutcome::Joined);
        assert!(!p.get_status().scheduler_running);
        assert!(p.get_status().total_processed >= 3);
    }
}
