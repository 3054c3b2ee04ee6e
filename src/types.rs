//! Tipos e estruturas de dados

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tick bruto entregue pela fonte de dados.
///
/// `timestamp` é mantido como texto: é a noção do produtor de quando o tick
/// foi gerado, e pode vir em formato inválido (ver [`crate::extract`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTick {
    pub symbol: String,
    pub price: f64,
    pub volume: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub timestamp: String,
    pub trade_id: String,
}

/// Lote de um ciclo de ingestão: símbolo → tick.
///
/// `BTreeMap` para que a ordem de processamento dentro de um ciclo seja estável.
pub type TickBatch = BTreeMap<String, RawTick>;

/// Scores dos dois provedores para um único tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub manipulation_score: f64,
    pub insider_score: f64,
}

/// Nível de risco gravado na ingestão (regra simples, sem histerese).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    High,
    Low,
}

/// Faixa de risco calculada no momento do alerta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    High,
    Medium,
    Low,
}

impl RiskBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::High => "high",
            RiskBand::Medium => "medium",
            RiskBand::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HighRisk,
    MediumRisk,
}

/// Tick enriquecido: campos do tick + scores + flags derivadas.
///
/// Criado uma única vez pelo dispatcher e imutável depois disso.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTrade {
    #[serde(flatten)]
    pub tick: RawTick,
    pub manipulation_score: f64,
    pub insider_score: f64,
    /// Latência medida (agora - timestamp do tick), `None` se o timestamp é inválido.
    pub latency_ms: Option<f64>,
    pub latency_flag: bool,
    pub risk_level: RiskLevel,
}

impl EnrichedTrade {
    pub fn scores(&self) -> ScoreResult {
        ScoreResult {
            manipulation_score: self.manipulation_score,
            insider_score: self.insider_score,
        }
    }
}

/// Alerta derivado do histórico. Nunca é armazenado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub risk_level: RiskBand,
    pub symbol: String,
    pub price: f64,
    pub volume: u64,
    pub timestamp: String,
    pub trade_id: String,
    pub manipulation_score: f64,
    pub insider_score: f64,
    pub latency_flag: bool,
}

/// Ordem de retorno de `get_recent_trades`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecentOrder {
    #[default]
    OldestFirst,
    NewestFirst,
}

/// Snapshot do estado do pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub history_size: usize,
    pub history_capacity: usize,
    pub current_threshold: f64,
    pub scheduler_running: bool,
    pub symbols: Vec<String>,
    pub total_processed: u64,
    pub evicted: u64,
    pub last_update: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str) -> RawTick {
        RawTick {
            symbol: symbol.to_string(),
            price: 100.0,
            volume: 10,
            open: 99.0,
            high: 101.0,
            low: 98.0,
            close: 100.0,
            timestamp: "2024-05-01T10:00:00Z".to_string(),
            trade_id: format!("{symbol}_1"),
        }
    }

    #[test]
    fn enriched_trade_serializes_flat_with_uppercase_level() {
        let trade = EnrichedTrade {
            tick: tick("SENSEX"),
            manipulation_score: 0.72,
            insider_score: 0.3,
            latency_ms: None,
            latency_flag: false,
            risk_level: RiskLevel::High,
        };
        let value = serde_json::to_value(&trade).expect("serialize");
        assert_eq!(value["symbol"], "SENSEX");
        assert_eq!(value["trade_id"], "SENSEX_1");
        assert_eq!(value["risk_level"], "HIGH");
        assert!(value.get("tick").is_none());
    }

    #[test]
    fn alert_wire_names() {
        let value = serde_json::to_value(AlertType::MediumRisk).expect("serialize");
        assert_eq!(value, "medium_risk");
        let value = serde_json::to_value(RiskBand::High).expect("serialize");
        assert_eq!(value, "high");
    }
}
