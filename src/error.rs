//! Erros do pipeline

use std::time::Duration;
use thiserror::Error;

/// Único erro visível nas operações de fronteira.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("limiar de risco fora do intervalo [0.0, 1.0]: {0}")]
    ThresholdOutOfRange(f64),
}

/// Falha transitória ao obter um lote da fonte de dados.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("requisição http falhou: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket falhou: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("payload inválido: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("fonte desconectada")]
    Disconnected,
    #[error("fonte indisponível: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScoringError {
    #[error("provedor {provider} falhou: {reason}")]
    Failed { provider: String, reason: String },
    #[error("provedor {provider} excedeu o prazo de {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

#[derive(Debug, Error)]
#[error("consumidor {consumer} falhou: {reason}")]
pub struct ConsumerError {
    pub consumer: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("variável {var} inválida: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("variável {0} obrigatória")]
    Missing(&'static str),
    #[error(transparent)]
    Threshold(#[from] PipelineError),
}
