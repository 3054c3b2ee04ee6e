//! Dispatcher de Scoring
//!
//! Único caminho de escrita no estado compartilhado. Para cada tick do lote:
//! chama os dois provedores em paralelo, calcula latência e nível de risco,
//! monta o [`EnrichedTrade`] e grava no histórico.
//!
//! Nenhuma falha de um tick aborta o ciclo:
//! - provedor que falha ou estoura o prazo → score neutro 0.5
//! - timestamp inválido → `latency_flag = false`

use crate::error::{ConsumerError, ScoringError};
use crate::extract;
use crate::history::TradeHistory;
use crate::risk;
use crate::scheduler::BatchConsumer;
use crate::scoring::ScoringProvider;
use crate::threshold::RiskThreshold;
use crate::types::{EnrichedTrade, RawTick, ScoreResult, TickBatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Score usado quando um provedor falha.
pub const NEUTRAL_SCORE: f64 = 0.5;

pub const DEFAULT_STALENESS: Duration = Duration::from_millis(100);

pub struct ScoringDispatcher {
    manipulation: Arc<dyn ScoringProvider>,
    insider: Arc<dyn ScoringProvider>,
    history: Arc<TradeHistory>,
    threshold: Arc<RiskThreshold>,
    staleness_bound: Duration,
    score_timeout: Option<Duration>,
    journal: Option<mpsc::Sender<EnrichedTrade>>,
}

impl ScoringDispatcher {
    pub fn new(
        manipulation: Arc<dyn ScoringProvider>,
        insider: Arc<dyn ScoringProvider>,
        history: Arc<TradeHistory>,
        threshold: Arc<RiskThreshold>,
    ) -> Self {
        Self {
            manipulation,
            insider,
            history,
            threshold,
            staleness_bound: DEFAULT_STALENESS,
            score_timeout: None,
            journal: None,
        }
    }

    /// Limite de idade a partir do qual o tick é marcado como atrasado.
    pub fn with_staleness_bound(mut self, bound: Duration) -> Self {
        self.staleness_bound = bound;
        self
    }

    /// Prazo por chamada de provedor. Estourado, vale o score neutro.
    pub fn with_score_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.score_timeout = timeout;
        self
    }

    /// Envia cada trade enriquecido também para o journal CSV.
    pub fn with_journal(mut self, tx: mpsc::Sender<EnrichedTrade>) -> Self {
        self.journal = Some(tx);
        self
    }

    /// Processa um lote inteiro. Retorna quantos trades foram gravados.
    pub async fn process(&self, batch: &TickBatch) -> usize {
        let mut written = 0;
        for (symbol, tick) in batch {
            let trade = self.enrich_at(symbol, tick, Utc::now()).await;
            info!(
                symbol = %symbol,
                price = trade.tick.price,
                manipulation = trade.manipulation_score,
                insider = trade.insider_score,
                risk = ?trade.risk_level,
                "trade processado"
            );

            if let Some(ref tx) = self.journal {
                // Ignora erro se o journal foi fechado
                let _ = tx.send(trade.clone());
            }

            self.history.append(trade);
            written += 1;
        }
        written
    }

    /// Enriquece um tick usando `now` como relógio.
    ///
    /// O símbolo do lote prevalece sobre o do tick.
    pub async fn enrich_at(&self, symbol: &str, tick: &RawTick, now: DateTime<Utc>) -> EnrichedTrade {
        let scores = self.score_tick(tick).await;

        let latency_ms = extract::latency_ms(&tick.timestamp, now);
        let latency_flag = match latency_ms {
            Some(ms) => ms > self.staleness_bound.as_secs_f64() * 1000.0,
            None => {
                warn!(symbol, timestamp = %tick.timestamp, "timestamp inválido; latency_flag=false");
                false
            }
        };

        // Limiar lido agora, nunca cacheado
        let threshold = self.threshold.get();
        let risk_level =
            risk::ingestion_level(scores.manipulation_score, scores.insider_score, threshold);

        let mut tick = tick.clone();
        tick.symbol = symbol.to_string();

        EnrichedTrade {
            tick,
            manipulation_score: scores.manipulation_score,
            insider_score: scores.insider_score,
            latency_ms,
            latency_flag,
            risk_level,
        }
    }

    /// Chama os dois provedores em paralelo.
    async fn score_tick(&self, tick: &RawTick) -> ScoreResult {
        let (manipulation, insider) = tokio::join!(
            self.score_or_neutral(&self.manipulation, tick),
            self.score_or_neutral(&self.insider, tick),
        );
        ScoreResult {
            manipulation_score: round4(manipulation),
            insider_score: round4(insider),
        }
    }

    async fn score_or_neutral(&self, provider: &Arc<dyn ScoringProvider>, tick: &RawTick) -> f64 {
        let result = match self.score_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, provider.score(tick)).await {
                Ok(result) => result,
                Err(_) => Err(ScoringError::Timeout {
                    provider: provider.name().to_string(),
                    timeout,
                }),
            },
            None => provider.score(tick).await,
        };

        match result {
            Ok(score) if score.is_finite() => score.clamp(0.0, 1.0),
            Ok(score) => {
                warn!(provider = provider.name(), score, "score não finito; usando neutro");
                NEUTRAL_SCORE
            }
            Err(err) => {
                warn!(%err, symbol = %tick.symbol, "falha no provedor; usando score neutro");
                NEUTRAL_SCORE
            }
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[async_trait]
impl BatchConsumer for ScoringDispatcher {
    fn name(&self) -> &str {
        "scoring-dispatcher"
    }

    async fn consume(&self, batch: &TickBatch) -> Result<(), ConsumerError> {
        self.process(batch).await;
        Ok(())
    }
}
