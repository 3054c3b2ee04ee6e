//! Fontes de Dados de Mercado
//!
//! O pipeline só conhece o contrato [`DataSource`]: a cada ciclo, um lote
//! símbolo → tick, ou um erro. Falha e lote vazio são coisas diferentes:
//! um mercado parado devolve `Ok` vazio, uma fonte quebrada devolve `Err`.

use crate::error::SourceError;
use crate::types::{RawTick, TickBatch};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rand_distr::StandardNormal;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Obtém o próximo lote de ticks.
    async fn fetch(&self) -> Result<TickBatch, SourceError>;

    /// Símbolos monitorados, na ordem configurada.
    fn symbols(&self) -> Vec<String>;
}

/// Símbolos padrão (índices indianos).
pub fn default_symbols() -> Vec<String> {
    ["NIFTY 50", "SENSEX", "BANKNIFTY"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn base_price(symbol: &str) -> f64 {
    match symbol {
        "NIFTY 50" => 24_579.0,
        "SENSEX" => 80_157.0,
        "BANKNIFTY" => 53_661.0,
        _ => 1_000.0,
    }
}

fn gaussian<R: Rng>(rng: &mut R, std_dev: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    z * std_dev
}

// ============================================================================
// Fonte Sintética
// ============================================================================

/// Random walk por símbolo com aparência de mercado real.
///
/// O fechamento de cada ciclo vira o preço base do próximo, criando
/// tendências. Nunca falha.
pub struct SyntheticSource {
    symbols: Vec<String>,
    prices: Mutex<HashMap<String, f64>>,
}

impl SyntheticSource {
    pub fn new(symbols: Vec<String>) -> Self {
        let prices = symbols
            .iter()
            .map(|symbol| (symbol.clone(), base_price(symbol)))
            .collect();
        Self {
            symbols,
            prices: Mutex::new(prices),
        }
    }

    fn generate(&self) -> TickBatch {
        let mut rng = rand::thread_rng();
        let mut batch = TickBatch::new();
        let now = Utc::now();

        let mut prices = self
            .prices
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        for symbol in &self.symbols {
            let base = *prices
                .entry(symbol.clone())
                .or_insert_with(|| base_price(symbol));

            let price = base * (1.0 + gaussian(&mut rng, 0.002));
            let open = price * (1.0 + gaussian(&mut rng, 0.001));
            let high = open.max(price) * (1.0 + gaussian(&mut rng, 0.0015).abs());
            let low = open.min(price) * (1.0 - gaussian(&mut rng, 0.0015).abs());
            let volume = rng.gen_range(2_000..15_000);

            prices.insert(symbol.clone(), price);

            let tick = RawTick {
                symbol: symbol.clone(),
                price,
                volume,
                open,
                high,
                low,
                close: price,
                timestamp: now.to_rfc3339(),
                trade_id: format!(
                    "{}_MOCK_{}_{}",
                    symbol.replace(' ', ""),
                    now.timestamp(),
                    rng.gen_range(1_000..10_000)
                ),
            };
            debug!(symbol = %symbol, price, volume, "tick sintético gerado");
            batch.insert(symbol.clone(), tick);
        }

        batch
    }
}

#[async_trait]
impl DataSource for SyntheticSource {
    async fn fetch(&self) -> Result<TickBatch, SourceError> {
        Ok(self.generate())
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols.clone()
    }
}
