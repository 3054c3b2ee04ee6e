//! Fonte HTTP de Cotações
//!
//! Faz polling de um endpoint JSON no formato `{ "SÍMBOLO": { "price": ..., ... } }`.
//! Campos ausentes recebem defaults razoáveis; status HTTP de erro, falha de
//! transporte ou corpo inválido viram [`SourceError`].

use crate::error::SourceError;
use crate::source::DataSource;
use crate::types::{RawTick, TickBatch};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cotação como vem do serviço. Só `price` é obrigatório.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotePayload {
    pub price: f64,
    #[serde(default)]
    pub volume: u64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub timestamp: Option<String>,
    pub trade_id: Option<String>,
}

pub struct HttpQuoteSource {
    client: Client,
    url: String,
    symbols: Vec<String>,
    seq: AtomicU64,
}

impl HttpQuoteSource {
    pub fn new(url: impl Into<String>, symbols: Vec<String>) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
            symbols,
            seq: AtomicU64::new(0),
        })
    }

    /// Converte o payload em lote, filtrando pelos símbolos configurados.
    pub fn to_batch(&self, quotes: HashMap<String, QuotePayload>) -> TickBatch {
        let now = Utc::now();
        quotes
            .into_iter()
            .filter(|(symbol, _)| self.symbols.is_empty() || self.symbols.contains(symbol))
            .map(|(symbol, quote)| {
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                let tick = RawTick {
                    symbol: symbol.clone(),
                    price: quote.price,
                    volume: quote.volume,
                    open: quote.open.unwrap_or(quote.price),
                    high: quote.high.unwrap_or(quote.price),
                    low: quote.low.unwrap_or(quote.price),
                    close: quote.close.unwrap_or(quote.price),
                    timestamp: quote.timestamp.unwrap_or_else(|| now.to_rfc3339()),
                    trade_id: quote
                        .trade_id
                        .unwrap_or_else(|| format!("{}_{}_{}", symbol, now.timestamp(), seq)),
                };
                (symbol, tick)
            })
            .collect()
    }
}

#[async_trait]
impl DataSource for HttpQuoteSource {
    async fn fetch(&self) -> Result<TickBatch, SourceError> {
        let quotes: HashMap<String, QuotePayload> = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(self.to_batch(quotes))
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols.clone()
    }
}
