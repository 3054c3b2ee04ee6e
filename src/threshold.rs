//! Limiar de risco (único parâmetro mutável em runtime)

use crate::error::PipelineError;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

pub const DEFAULT_RISK_THRESHOLD: f64 = 0.7;

/// Limiar de risco compartilhado.
///
/// Guarda os bits do `f64` num `AtomicU64`: leitores nunca observam um valor
/// escrito pela metade, e não há lock no caminho de leitura.
#[derive(Debug)]
pub struct RiskThreshold {
    bits: AtomicU64,
}

impl RiskThreshold {
    pub fn new(value: f64) -> Result<Self, PipelineError> {
        validate(value)?;
        Ok(Self {
            bits: AtomicU64::new(value.to_bits()),
        })
    }

    /// Valor atual. Lido a cada chamada, nunca cacheado.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Atualiza o limiar; fora de `[0.0, 1.0]` é rejeitado e nada muda.
    pub fn set(&self, value: f64) -> Result<f64, PipelineError> {
        validate(value)?;
        let previous = f64::from_bits(self.bits.swap(value.to_bits(), Ordering::AcqRel));
        info!(previous, current = value, "limiar de risco atualizado");
        Ok(value)
    }
}

impl Default for RiskThreshold {
    fn default() -> Self {
        Self {
            bits: AtomicU64::new(DEFAULT_RISK_THRESHOLD.to_bits()),
        }
    }
}

fn validate(value: f64) -> Result<(), PipelineError> {
    // NaN falha no contains
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::ThresholdOutOfRange(value))
    }
}
