//! Fonte WebSocket da Binance
//!
//! Uma task em background fica conectada aos streams `@trade` e agrega cada
//! trade numa barra por símbolo. `fetch()` drena as barras acumuladas desde a
//! chamada anterior. Enquanto o socket está caído, `fetch()` falha com
//! [`SourceError::Disconnected`]: feed morto não se confunde com mercado parado.

use crate::error::SourceError;
use crate::source::DataSource;
use crate::types::{RawTick, TickBatch};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BINANCE_WS: &str = "wss://stream.binance.com:9443/stream?streams=";

/// Evento `trade` dentro do envelope de stream combinado.
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    data: TradeEvent,
}

#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t")]
    trade_id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: i64,
}

/// Barra OHLCV acumulada entre dois `fetch()`.
#[derive(Debug, Clone, PartialEq)]
struct Bar {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    trade_id: u64,
    trade_time: i64,
}

impl Bar {
    fn new(price: f64, quantity: f64, trade_id: u64, trade_time: i64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            volume: quantity,
            trade_id,
            trade_time,
        }
    }

    fn update(&mut self, price: f64, quantity: f64, trade_id: u64, trade_time: i64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += quantity;
        self.trade_id = trade_id;
        self.trade_time = trade_time;
    }

    fn into_tick(self, symbol: String) -> RawTick {
        let timestamp = Utc
            .timestamp_millis_opt(self.trade_time)
            .single()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| self.trade_time.to_string());
        RawTick {
            trade_id: format!("{}_{}", symbol, self.trade_id),
            symbol,
            price: self.close,
            volume: self.volume.round().max(0.0) as u64,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            timestamp,
        }
    }
}

#[derive(Default)]
struct FeedState {
    bars: HashMap<String, Bar>,
}

impl FeedState {
    fn apply(&mut self, event: TradeEvent) -> bool {
        let (Ok(price), Ok(quantity)) = (event.price.parse::<f64>(), event.quantity.parse::<f64>())
        else {
            return false;
        };
        match self.bars.get_mut(&event.symbol) {
            Some(bar) => bar.update(price, quantity, event.trade_id, event.trade_time),
            None => {
                self.bars.insert(
                    event.symbol,
                    Bar::new(price, quantity, event.trade_id, event.trade_time),
                );
            }
        }
        true
    }

    fn drain(&mut self) -> TickBatch {
        self.bars
            .drain()
            .map(|(symbol, bar)| (symbol.clone(), bar.into_tick(symbol)))
            .collect()
    }
}

pub struct BinanceTradeSource {
    symbols: Vec<String>,
    state: Arc<Mutex<FeedState>>,
    connected: Arc<AtomicBool>,
    count: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl BinanceTradeSource {
    /// Inicia a task de coleta. Precisa de um runtime tokio ativo.
    ///
    /// # Argumentos
    /// * `symbols` - pares da Binance, ex. `BTCUSDT`
    /// * `reconnect_backoff` - espera fixa entre reconexões
    pub fn spawn(symbols: Vec<String>, reconnect_backoff: Duration) -> Self {
        let source = Self {
            symbols,
            state: Arc::new(Mutex::new(FeedState::default())),
            connected: Arc::new(AtomicBool::new(false)),
            count: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
        };

        let url = stream_url(&source.symbols);
        let state = Arc::clone(&source.state);
        let connected = Arc::clone(&source.connected);
        let count = Arc::clone(&source.count);
        let cancel = source.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = run_stream(&url, &state, &connected, &count) => {
                        if let Err(err) = result {
                            warn!(%err, "stream da binance falhou; reconectando");
                        }
                    }
                }
                connected.store(false, Ordering::Release);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_backoff) => {}
                }
            }
            connected.store(false, Ordering::Release);
            debug!("task da binance finalizada");
        });

        source
    }

    /// Total de trades recebidos desde o início.
    pub fn trades_received(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Drop for BinanceTradeSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn stream_url(symbols: &[String]) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@trade", s.to_lowercase()))
        .collect();
    format!("{}{}", BINANCE_WS, streams.join("/"))
}

async fn run_stream(
    url: &str,
    state: &Mutex<FeedState>,
    connected: &AtomicBool,
    count: &AtomicU64,
) -> Result<(), SourceError> {
    info!(%url, "conectando à binance");
    let (ws_stream, _) = connect_async(url).await?;
    connected.store(true, Ordering::Release);
    info!("conectado! coletando trades");

    let (_write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => match serde_json::from_str::<StreamEnvelope>(&text) {
                Ok(envelope) => {
                    let applied = state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .apply(envelope.data);
                    if applied {
                        count.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(err) => debug!(%err, "mensagem ignorada"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    Err(SourceError::Disconnected)
}

#[async_trait]
impl DataSource for BinanceTradeSource {
    async fn fetch(&self) -> Result<TickBatch, SourceError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(SourceError::Disconnected);
        }
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain())
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols.clone()
    }
}
