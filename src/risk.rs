//! Classificação de risco
//!
//! Duas regras coexistem e são intencionalmente distintas:
//!
//! - [`ingestion_level`]: regra simples (`max > limiar`), gravada uma vez no
//!   [`EnrichedTrade`](crate::types::EnrichedTrade) e nunca recalculada.
//! - [`classify`]: faixas com histerese (`high` / `medium` / `low`), aplicada
//!   sob demanda com o limiar *atual* na geração de alertas.

use crate::types::{RiskBand, RiskLevel};

/// Fração do limiar que delimita a faixa `medium`.
pub const HYSTERESIS_RATIO: f64 = 0.85;

/// Classifica um par de scores em faixas com histerese.
///
/// Com `m = max(manipulation, insider)`:
/// - `high` se `m >= max(0, limiar)`
/// - `medium` se `m >= max(0, limiar * 0.85)`
/// - `low` caso contrário
pub fn classify(manipulation_score: f64, insider_score: f64, threshold: f64) -> RiskBand {
    let m = manipulation_score.max(insider_score);
    if m >= threshold.max(0.0) {
        RiskBand::High
    } else if m >= (threshold * HYSTERESIS_RATIO).max(0.0) {
        RiskBand::Medium
    } else {
        RiskBand::Low
    }
}

/// Regra usada na ingestão: `HIGH` somente se o maior score excede o limiar.
pub fn ingestion_level(manipulation_score: f64, insider_score: f64, threshold: f64) -> RiskLevel {
    if manipulation_score.max(insider_score) > threshold {
        RiskLevel::High
    } else {
        RiskLevel::Low
    }
}
