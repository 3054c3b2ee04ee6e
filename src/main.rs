//! Pipeline de Risco - binário
//!
//! Monta o pipeline a partir das variáveis de ambiente, inicia a ingestão e
//! mostra o status em tempo real até Ctrl-C (ou `RUN_SECS`).
//!
//! Uso:
//!   ./target/release/trade-risk-pipeline
//!   SOURCE=binance SYMBOLS=BTCUSDT,ETHUSDT FETCH_INTERVAL_SECS=5 MIN_FETCH_SPACING_SECS=5 ./target/release/trade-risk-pipeline
//!   JOURNAL_FILE=trades.csv RUN_SECS=300 RISK_THRESHOLD=0.6 ./target/release/trade-risk-pipeline

use anyhow::Context;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use trade_risk_pipeline::binance::BinanceTradeSource;
use trade_risk_pipeline::quote_http::HttpQuoteSource;
use trade_risk_pipeline::scoring::{PriceActionScorer, VolumeSurpriseScorer};
use trade_risk_pipeline::source::SyntheticSource;
use trade_risk_pipeline::{
    journal, DataSource, PipelineConfig, RiskPipeline, SourceKind, StopOutcome,
};
use tracing_subscriber::EnvFilter;

const BINANCE_BACKOFF: Duration = Duration::from_secs(1);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trade_risk_pipeline=info,info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_source(config: &PipelineConfig) -> anyhow::Result<Arc<dyn DataSource>> {
    let symbols = config.symbols.clone();
    Ok(match &config.source {
        SourceKind::Synthetic => Arc::new(SyntheticSource::new(symbols)),
        SourceKind::Http { url } => Arc::new(
            HttpQuoteSource::new(url.clone(), symbols).context("Erro ao criar cliente HTTP")?,
        ),
        SourceKind::Binance => Arc::new(BinanceTradeSource::spawn(symbols, BINANCE_BACKOFF)),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // ========================================================================
    // Configuração via Variáveis de Ambiente
    // ========================================================================

    let config = PipelineConfig::from_env().context("Configuração inválida")?;

    eprintln!("Fonte: {:?}", config.source);
    eprintln!("Símbolos: {}", config.symbols.join(", "));
    eprintln!("Limiar de risco: {}", config.risk_threshold);
    if let Some(ref file) = config.journal_file {
        eprintln!("Journal: {}", file);
    }
    if config.realtime {
        eprintln!("Display tempo real: ATIVADO\n");
    } else {
        eprintln!("Display tempo real: DESATIVADO\n");
    }

    // ========================================================================
    // Journal em Thread Separada (se habilitado)
    // ========================================================================

    let (journal_tx, journal_handle) = match config.journal_file {
        Some(ref file) => {
            let (tx, handle) =
                journal::spawn(file).with_context(|| format!("Erro ao criar CSV: {file}"))?;
            (Some(tx), Some(handle))
        }
        None => (None, None),
    };

    // ========================================================================
    // Montagem do Pipeline
    // ========================================================================

    let mut builder = RiskPipeline::builder(
        build_source(&config)?,
        Arc::new(PriceActionScorer::new()),
        Arc::new(VolumeSurpriseScorer::new()),
    )
    .risk_threshold(config.risk_threshold)
    .history_capacity(config.history_capacity)
    .staleness_bound(config.staleness_bound)
    .score_timeout(config.score_timeout)
    .min_fetch_spacing(config.min_fetch_spacing)
    .stop_timeout(config.stop_timeout);
    if let Some(tx) = journal_tx {
        builder = builder.journal(tx);
    }
    let pipeline = Arc::new(builder.build()?);

    pipeline.start(config.fetch_interval);

    // ========================================================================
    // Status em Tempo Real
    // ========================================================================

    let display = if config.realtime {
        let pipeline = Arc::clone(&pipeline);
        let (window, cap) = (config.alert_window, config.alert_cap);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let status = pipeline.get_status();
                if status.total_processed > 0 {
                    let alerts = pipeline.get_alerts(window, cap).len();
                    print!("\r\x1b[K"); // ANSI: volta ao início da linha e limpa
                    print!(
                        "Trades: {} | Histórico: {}/{} | Alertas: {} | Limiar: {:.2}",
                        status.total_processed,
                        status.history_size,
                        status.history_capacity,
                        alerts,
                        status.current_threshold
                    );
                    let _ = std::io::stdout().flush();
                }
            }
        }))
    } else {
        None
    };

    // ========================================================================
    // Espera: Ctrl-C ou RUN_SECS
    // ========================================================================

    match config.run_for {
        Some(duration) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = tokio::time::sleep(duration) => {}
            }
        }
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("Erro ao aguardar Ctrl-C")?;
        }
    }

    // ========================================================================
    // Finalização
    // ========================================================================

    if let Some(task) = display {
        task.abort();
        let _ = task.await;
        print!("\n\n");
    }

    let outcome = pipeline.stop().await;
    let status = pipeline.get_status();
    let alerts = pipeline.get_alerts(config.alert_window, config.alert_cap);

    eprintln!("\n=== Pipeline Finalizado ===");
    eprintln!("Parada: {:?}", outcome);
    eprintln!(
        "Ciclos: {} ({} falhas da fonte)",
        pipeline.scheduler().cycles(),
        pipeline.scheduler().source_failures()
    );
    eprintln!("Total de trades processados: {}", status.total_processed);
    eprintln!(
        "Histórico: {}/{} ({} descartados)",
        status.history_size, status.history_capacity, status.evicted
    );
    eprintln!("Alertas ativos: {}", alerts.len());
    for alert in alerts.iter().take(5) {
        eprintln!(
            "  [{}] {} @ {:.2} ({}) manip={:.4} insider={:.4}",
            alert.risk_level.as_str(),
            alert.symbol,
            alert.price,
            alert.timestamp,
            alert.manipulation_score,
            alert.insider_score
        );
    }

    // Fecha o channel do journal e espera a thread gravar o restante.
    // Loop abandonado ainda segura um sender: não dá para esperar.
    drop(pipeline);
    if outcome == StopOutcome::Abandoned {
        eprintln!("Journal pode estar incompleto (ingestão abandonada)");
    } else if let Some(handle) = journal_handle {
        match handle.join() {
            Ok(Ok(count)) => {
                if let Some(ref file) = config.journal_file {
                    eprintln!("Dados salvos em: {} ({} trades)", file, count);
                }
            }
            Ok(Err(err)) => eprintln!("Erro no journal: {}", err),
            Err(_) => eprintln!("Thread do journal entrou em panic"),
        }
    }

    Ok(())
}
