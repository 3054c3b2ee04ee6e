//! Agendador de Ingestão
//!
//! Loop em background que, a cada intervalo, puxa um lote da fonte e o entrega
//! a todos os consumidores registrados antes de dormir de novo.
//!
//! - Espaçamento mínimo entre chamadas à fonte, mesmo com intervalo menor.
//! - Falha da fonte: ciclo pulado, nova tentativa após o mesmo intervalo.
//! - Falha (ou panic) de um consumidor: logada; os demais seguem.
//! - `stop()` cancela o loop no próximo ponto seguro e espera por ele com prazo.
//! - Loop abandonado por `stop()` bloqueia um novo `start()` até terminar.

use crate::error::ConsumerError;
use crate::source::DataSource;
use crate::types::TickBatch;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MIN_SPACING: Duration = Duration::from_secs(60);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Recebe cada lote produzido pelo agendador.
#[async_trait]
pub trait BatchConsumer: Send + Sync {
    fn name(&self) -> &str;

    async fn consume(&self, batch: &TickBatch) -> Result<(), ConsumerError>;
}

/// Resultado de um ciclo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Lote entregue; `failed` consumidores falharam.
    Delivered { ticks: usize, failed: usize },
    /// Fonte falhou; nenhum consumidor foi chamado.
    SourceFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Loop terminou dentro do prazo.
    Joined,
    /// Prazo estourado; o loop foi abandonado (não abortado).
    Abandoned,
    NotRunning,
}

struct LoopHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct IngestionScheduler {
    inner: Arc<SchedulerInner>,
    handle: Mutex<Option<LoopHandle>>,
    /// Loop que estourou o prazo do `stop()` e ainda pode estar rodando.
    abandoned: Mutex<Option<JoinHandle<()>>>,
    min_spacing: Duration,
    stop_timeout: Duration,
    generations: AtomicU64,
}

struct SchedulerInner {
    source: Arc<dyn DataSource>,
    consumers: RwLock<Vec<Arc<dyn BatchConsumer>>>,
    last_fetch: Mutex<Option<Instant>>,
    /// Geração do loop ativo; 0 = parado.
    active: AtomicU64,
    cycles: AtomicU64,
    source_failures: AtomicU64,
}

impl IngestionScheduler {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                source,
                consumers: RwLock::new(Vec::new()),
                last_fetch: Mutex::new(None),
                active: AtomicU64::new(0),
                cycles: AtomicU64::new(0),
                source_failures: AtomicU64::new(0),
            }),
            handle: Mutex::new(None),
            abandoned: Mutex::new(None),
            min_spacing: DEFAULT_MIN_SPACING,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            generations: AtomicU64::new(0),
        }
    }

    /// Espaçamento mínimo entre chamadas à fonte (protege o upstream).
    pub fn with_min_spacing(mut self, spacing: Duration) -> Self {
        self.min_spacing = spacing;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn register_consumer(&self, consumer: Arc<dyn BatchConsumer>) {
        info!(consumer = consumer.name(), "consumidor registrado");
        self.inner
            .consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(consumer);
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.inner.source
    }

    pub fn is_running(&self) -> bool {
        self.inner.active.load(Ordering::Acquire) != 0
    }

    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::Relaxed)
    }

    pub fn source_failures(&self) -> u64 {
        self.inner.source_failures.load(Ordering::Relaxed)
    }

    /// Executa um único ciclo (rate limit + fetch + fan-out), fora do loop.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.inner.run_cycle(self.min_spacing).await
    }

    /// Inicia o loop em background. Retorna `false` sem fazer nada se um loop
    /// já está rodando ou se o loop abandonado no último `stop()` ainda não
    /// terminou.
    ///
    /// Precisa de um runtime tokio ativo.
    pub fn start(&self, interval: Duration) -> bool {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            warn!("agendador já está rodando");
            return false;
        }

        {
            let mut abandoned = self.abandoned.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(task) = abandoned.as_ref() {
                if !task.is_finished() {
                    warn!("loop anterior abandonado ainda em execução; start ignorado");
                    return false;
                }
            }
            *abandoned = None;
        }

        let interval = interval.max(self.min_spacing);
        info!(
            interval_secs = interval.as_secs_f64(),
            symbols = ?self.inner.source.symbols(),
            "iniciando ingestão"
        );

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        inner.active.store(generation, Ordering::Release);
        let task = tokio::spawn(inner.run_loop(
            generation,
            interval,
            self.min_spacing,
            cancel.clone(),
        ));
        *handle = Some(LoopHandle {
            generation,
            cancel,
            task,
        });
        true
    }

    /// Para o loop e espera o ciclo corrente terminar, com prazo.
    pub async fn stop(&self) -> StopOutcome {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(LoopHandle {
            generation,
            cancel,
            mut task,
        }) = handle
        else {
            return StopOutcome::NotRunning;
        };

        cancel.cancel();
        match tokio::time::timeout(self.stop_timeout, &mut task).await {
            Ok(joined) => {
                if let Err(err) = joined {
                    error!(%err, "loop de ingestão terminou com erro");
                }
                info!("ingestão parada");
                StopOutcome::Joined
            }
            Err(_) => {
                // A task continua solta; sai no próximo ponto seguro
                warn!(
                    timeout_secs = self.stop_timeout.as_secs_f64(),
                    "loop de ingestão não terminou no prazo; abandonado"
                );
                let _ = self.inner.active.compare_exchange(
                    generation,
                    0,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                *self.abandoned.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
                StopOutcome::Abandoned
            }
        }
    }
}

impl SchedulerInner {
    async fn run_loop(
        self: Arc<Self>,
        generation: u64,
        interval: Duration,
        min_spacing: Duration,
        cancel: CancellationToken,
    ) {
        while !cancel.is_cancelled() {
            // O fetch pode ser cancelado: nada foi gravado ainda
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = self.pull(min_spacing) => batch,
            };

            // Consumidores sempre terminam antes de checar o cancelamento
            if let Some(batch) = batch {
                self.deliver(&batch).await;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        // Só limpa a flag se nenhum loop mais novo assumiu
        let _ = self
            .active
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire);
        debug!(generation, "loop de ingestão finalizado");
    }

    async fn run_cycle(&self, min_spacing: Duration) -> CycleOutcome {
        match self.pull(min_spacing).await {
            Some(batch) => {
                let failed = self.deliver(&batch).await;
                CycleOutcome::Delivered {
                    ticks: batch.len(),
                    failed,
                }
            }
            None => CycleOutcome::SourceFailed,
        }
    }

    /// Espera o rate limit e busca um lote. `None` se a fonte falhou.
    async fn pull(&self, min_spacing: Duration) -> Option<TickBatch> {
        self.rate_limit(min_spacing).await;
        self.cycles.fetch_add(1, Ordering::Relaxed);

        match self.source.fetch().await {
            Ok(batch) => {
                debug!(ticks = batch.len(), "lote recebido");
                Some(batch)
            }
            Err(err) => {
                self.source_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%err, "falha ao obter dados; ciclo pulado");
                None
            }
        }
    }

    async fn rate_limit(&self, min_spacing: Duration) {
        let wait = {
            let mut last = self.last_fetch.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let next = match *last {
                Some(prev) if now < prev + min_spacing => prev + min_spacing,
                _ => now,
            };
            *last = Some(next);
            next.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!(sleep_secs = wait.as_secs_f64(), "rate limit: aguardando");
            tokio::time::sleep(wait).await;
        }
    }

    /// Entrega o lote a cada consumidor, isolando falhas. Retorna quantos falharam.
    async fn deliver(&self, batch: &TickBatch) -> usize {
        let consumers: Vec<Arc<dyn BatchConsumer>> = self
            .consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failed = 0;
        for consumer in consumers {
            match AssertUnwindSafe(consumer.consume(batch)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failed += 1;
                    error!(%err, "erro no consumidor de dados");
                }
                Err(_) => {
                    failed += 1;
                    error!(consumer = consumer.name(), "consumidor entrou em panic");
                }
            }
        }
        failed
    }
}
