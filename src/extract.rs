//! Extração de Timestamp e Latência
//!
//! Os produtores de ticks não concordam sobre o formato do timestamp: RFC 3339
//! com offset, ISO-8601 "ingênuo" (sem offset) ou epoch em milissegundos.
//! Tudo que não se encaixa é tratado como inválido, e o chamador decide o
//! fallback (o dispatcher usa `latency_flag = false`).

use chrono::{DateTime, NaiveDateTime, Utc};

/// Menor valor aceito como epoch em milissegundos (ano 2001).
const MIN_EPOCH_MS: u64 = 1_000_000_000_000;

/// Converte o timestamp de um tick para epoch em milissegundos (UTC).
///
/// # Argumentos
/// * `text` - timestamp como veio da fonte
///
/// # Retorno
/// `Some(ms)` se o formato foi reconhecido, `None` caso contrário
pub fn parse_timestamp_ms(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(ms) = parse_epoch_ms(text) {
        return Some(ms);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }

    // Sem offset: interpretado como UTC
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }

    None
}

/// Lê um epoch em milissegundos composto apenas de dígitos.
fn parse_epoch_ms(text: &str) -> Option<i64> {
    let bytes = text.as_bytes();
    let mut num = 0u64;

    for &b in bytes {
        match b {
            b'0'..=b'9' => {
                num = num.checked_mul(10)?.checked_add((b - b'0') as u64)?;
            }
            _ => return None,
        }
    }

    // Valida que é um timestamp em ms plausível
    if num > MIN_EPOCH_MS {
        i64::try_from(num).ok()
    } else {
        None
    }
}

/// Latência = quando processamos - quando o tick foi gerado.
///
/// # Retorno
/// `None` se o timestamp do tick é inválido
pub fn latency_ms(timestamp: &str, now: DateTime<Utc>) -> Option<f64> {
    let ts = parse_timestamp_ms(timestamp)?;
    Some((now.timestamp_millis() - ts) as f64)
}
