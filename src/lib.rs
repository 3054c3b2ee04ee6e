//! Pipeline de Risco de Trades em Tempo Real
//!
//! Busca ticks de mercado periodicamente, pontua cada um com dois provedores
//! (manipulação e insider), mede latência, classifica o risco e guarda os
//! trades enriquecidos num histórico limitado em memória.
//!
//! Fluxo:
//! fonte → [`scheduler`] → [`dispatcher`] → [`history`] → consultas ([`pipeline`], [`alerts`])

pub mod alerts;
pub mod binance;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod extract;
pub mod history;
pub mod journal;
pub mod pipeline;
pub mod quote_http;
pub mod risk;
pub mod scheduler;
pub mod scoring;
pub mod source;
pub mod threshold;
pub mod types;

pub use config::{PipelineConfig, SourceKind};
pub use error::{ConfigError, ConsumerError, PipelineError, ScoringError, SourceError};
pub use pipeline::{PipelineBuilder, RiskPipeline};
pub use scheduler::{BatchConsumer, CycleOutcome, StopOutcome};
pub use scoring::ScoringProvider;
pub use source::DataSource;
pub use types::{
    Alert, AlertType, EnrichedTrade, PipelineStatus, RawTick, RecentOrder, RiskBand, RiskLevel,
    TickBatch,
};
