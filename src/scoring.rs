//! Provedores de Score
//!
//! [`ScoringProvider`] é o contrato: dado um tick, um score de anomalia em
//! `[0, 1]`. O dispatcher trata qualquer falha como score neutro, então um
//! provedor pode falhar à vontade sem derrubar o ciclo.
//!
//! Os dois provedores daqui são heurísticas determinísticas sobre janelas
//! móveis por símbolo, suficientes para rodar o pipeline sem um modelo real.

use crate::error::ScoringError;
use crate::types::RawTick;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Tamanho da janela móvel por símbolo.
pub const WINDOW_LEN: usize = 20;

#[async_trait]
pub trait ScoringProvider: Send + Sync {
    /// Nome usado nos logs.
    fn name(&self) -> &str;

    async fn score(&self, tick: &RawTick) -> Result<f64, ScoringError>;
}

/// Janela móvel com média e desvio padrão.
#[derive(Debug, Default)]
struct RollingWindow {
    values: VecDeque<f64>,
}

impl RollingWindow {
    fn push(&mut self, value: f64) {
        if self.values.len() == WINDOW_LEN {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    /// z-score de `value` contra a janela atual (antes de inserir).
    fn zscore(&self, value: f64) -> Option<f64> {
        if self.values.len() < 3 {
            return None;
        }
        let n = self.values.len() as f64;
        let mean = self.values.iter().sum::<f64>() / n;
        let var = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        if std < f64::EPSILON {
            return Some(0.0);
        }
        Some((value - mean) / std)
    }
}

/// Mapeia `x >= 0` para `[0, 1)`, saturando suavemente.
fn squash(x: f64, scale: f64) -> f64 {
    1.0 - (-(x.max(0.0)) / scale).exp()
}

// ============================================================================
// Manipulação: ação de preço
// ============================================================================

/// Score de "manipulação": retornos anormais ou range intrabar esticado.
#[derive(Default)]
pub struct PriceActionScorer {
    state: Mutex<HashMap<String, (f64, RollingWindow)>>,
}

impl PriceActionScorer {
    pub fn new() -> Self {
        Self::default()
    }

    fn evaluate(&self, tick: &RawTick) -> Result<f64, ScoringError> {
        if !(tick.close.is_finite() && tick.close > 0.0) {
            return Err(ScoringError::Failed {
                provider: self.name().to_string(),
                reason: format!("preço de fechamento inválido: {}", tick.close),
            });
        }

        let range_term = if tick.low > 0.0 {
            squash((tick.high - tick.low) / tick.low, 0.02)
        } else {
            0.0
        };

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let z_term = match state.get_mut(&tick.symbol) {
            Some((prev_close, window)) => {
                let ret = (tick.close - *prev_close) / *prev_close;
                let z = window.zscore(ret).map(|z| squash(z.abs(), 2.0));
                window.push(ret);
                *prev_close = tick.close;
                z.unwrap_or(0.0)
            }
            None => {
                state.insert(tick.symbol.clone(), (tick.close, RollingWindow::default()));
                0.0
            }
        };

        Ok(z_term.max(range_term))
    }
}

#[async_trait]
impl ScoringProvider for PriceActionScorer {
    fn name(&self) -> &str {
        "manipulation"
    }

    async fn score(&self, tick: &RawTick) -> Result<f64, ScoringError> {
        self.evaluate(tick)
    }
}

// ============================================================================
// Insider: surpresa de volume
// ============================================================================

/// Score de "insider": volume muito acima do normal para o símbolo.
///
/// Neutro (0.5) enquanto a janela tem menos de 3 amostras.
#[derive(Default)]
pub struct VolumeSurpriseScorer {
    windows: Mutex<HashMap<String, RollingWindow>>,
}

impl VolumeSurpriseScorer {
    pub fn new() -> Self {
        Self::default()
    }

    fn evaluate(&self, tick: &RawTick) -> f64 {
        let log_volume = (1.0 + tick.volume as f64).ln();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let window = windows.entry(tick.symbol.clone()).or_default();
        let score = match window.zscore(log_volume) {
            Some(z) => squash(z, 2.0),
            None => 0.5,
        };
        window.push(log_volume);
        score
    }

    /// Amostras acumuladas para o símbolo.
    pub fn samples(&self, symbol: &str) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .map(RollingWindow::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ScoringProvider for VolumeSurpriseScorer {
    fn name(&self) -> &str {
        "insider"
    }

    async fn score(&self, tick: &RawTick) -> Result<f64, ScoringError> {
        Ok(self.evaluate(tick))
    }
}
