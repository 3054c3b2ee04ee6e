//! Journal CSV dos Trades Enriquecidos
//!
//! Exportação de auditoria, fora do caminho de scoring: o dispatcher envia cada
//! trade por um channel e uma thread dedicada formata e grava em lote.
//! O arquivo nunca é relido pelo pipeline.

use crate::types::{EnrichedTrade, RiskLevel};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{error, info};

const HEADER: &str = "trade_id,symbol,timestamp,price,volume,manipulation_score,insider_score,latency_ms,latency_flag,risk_level";

/// Buffer de 1MB antes do flush forçado.
const BUFFER_BYTES: usize = 1024 * 1024;

/// Flush a cada N trades.
const FLUSH_EVERY: u64 = 1000;

/// Formata uma linha CSV. Campos de texto com vírgula ou aspas são escapados.
pub fn format_line(trade: &EnrichedTrade) -> String {
    format!(
        "{},{},{},{:.2},{},{:.4},{:.4},{},{},{}\n",
        escape(&trade.tick.trade_id),
        escape(&trade.tick.symbol),
        escape(&trade.tick.timestamp),
        trade.tick.price,
        trade.tick.volume,
        trade.manipulation_score,
        trade.insider_score,
        trade
            .latency_ms
            .map(|ms| format!("{ms:.2}"))
            .unwrap_or_default(),
        trade.latency_flag,
        match trade.risk_level {
            RiskLevel::High => "HIGH",
            RiskLevel::Low => "LOW",
        }
    )
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Abre o arquivo e inicia a thread de escrita.
///
/// # Retorno
/// Sender para o dispatcher e handle da thread (retorna o total gravado).
/// A thread termina quando todos os senders são descartados.
pub fn spawn(
    path: impl AsRef<Path>,
) -> io::Result<(mpsc::Sender<EnrichedTrade>, JoinHandle<io::Result<u64>>)> {
    let path = path.as_ref().to_path_buf();
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)?;
    writeln!(file, "{HEADER}")?;

    let (tx, rx) = mpsc::channel();
    let handle = std::thread::Builder::new()
        .name("trade-journal".to_string())
        .spawn(move || {
            let result = write_loop(file, rx);
            match &result {
                Ok(count) => info!(count, path = %path.display(), "journal finalizado"),
                Err(err) => error!(%err, path = %path.display(), "journal falhou"),
            }
            result
        })?;

    Ok((tx, handle))
}

/// Recebe trades do channel e grava até o channel fechar.
pub fn write_loop<W: Write>(mut out: W, rx: mpsc::Receiver<EnrichedTrade>) -> io::Result<u64> {
    let mut count = 0u64;
    let mut buffer = Vec::with_capacity(BUFFER_BYTES);

    while let Ok(trade) = rx.recv() {
        buffer.extend_from_slice(format_line(&trade).as_bytes());
        count += 1;

        if count % FLUSH_EVERY == 0 || buffer.len() >= BUFFER_BYTES {
            out.write_all(&buffer)?;
            out.flush()?;
            buffer.clear();
        }
    }

    // Flush final do buffer restante
    if !buffer.is_empty() {
        out.write_all(&buffer)?;
        out.flush()?;
    }

    Ok(count)
}
