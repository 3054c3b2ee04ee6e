//! Síntese de Alertas
//!
//! Alertas não são armazenados: a cada consulta, a janela mais recente do
//! histórico é reclassificada com o limiar *atual*. Subir o limiar silencia na
//! hora alertas antigos de fronteira; baixar faz eles aparecerem.

use crate::extract;
use crate::history::TradeHistory;
use crate::risk;
use crate::threshold::RiskThreshold;
use crate::types::{Alert, AlertType, EnrichedTrade, RiskBand};
use std::sync::Arc;

pub const DEFAULT_ALERT_WINDOW: usize = 100;
pub const DEFAULT_ALERT_CAP: usize = 20;

pub struct AlertSynthesizer {
    history: Arc<TradeHistory>,
    threshold: Arc<RiskThreshold>,
}

impl AlertSynthesizer {
    pub fn new(history: Arc<TradeHistory>, threshold: Arc<RiskThreshold>) -> Self {
        Self { history, threshold }
    }

    /// Alertas dos últimos `window` trades, mais novos primeiro, no máximo `cap`.
    pub fn get_alerts(&self, window: usize, cap: usize) -> Vec<Alert> {
        let recent = self.history.snapshot(window);
        synthesize(&recent, self.threshold.get(), cap)
    }
}

/// Classifica `trades` (ordem de chegada) e devolve os alertas `high`/`medium`.
///
/// Ordenado por timestamp decrescente; timestamps inválidos vão para o fim.
/// Em empate, o trade que chegou por último vem primeiro.
pub fn synthesize(trades: &[EnrichedTrade], threshold: f64, cap: usize) -> Vec<Alert> {
    let mut keyed: Vec<(Option<i64>, Alert)> = trades
        .iter()
        .rev()
        .filter_map(|trade| {
            let scores = trade.scores();
            let band = risk::classify(scores.manipulation_score, scores.insider_score, threshold);
            to_alert(trade, band).map(|alert| {
                (extract::parse_timestamp_ms(&trade.tick.timestamp), alert)
            })
        })
        .collect();

    // sort_by é estável: empates mantêm a ordem mais-novo-primeiro
    keyed.sort_by(|a, b| b.0.cmp(&a.0));
    keyed.into_iter().take(cap).map(|(_, alert)| alert).collect()
}

fn to_alert(trade: &EnrichedTrade, band: RiskBand) -> Option<Alert> {
    let alert_type = match band {
        RiskBand::High => AlertType::HighRisk,
        RiskBand::Medium => AlertType::MediumRisk,
        RiskBand::Low => return None,
    };
    Some(Alert {
        alert_type,
        risk_level: band,
        symbol: trade.tick.symbol.clone(),
        price: trade.tick.price,
        volume: trade.tick.volume,
        timestamp: trade.tick.timestamp.clone(),
        trade_id: trade.tick.trade_id.clone(),
        manipulation_score: trade.manipulation_score,
        insider_score: trade.insider_score,
        latency_flag: trade.latency_flag,
    })
}
