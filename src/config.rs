//! Configuração via Variáveis de Ambiente

use crate::alerts::{DEFAULT_ALERT_CAP, DEFAULT_ALERT_WINDOW};
use crate::dispatcher::DEFAULT_STALENESS;
use crate::error::ConfigError;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::scheduler::{DEFAULT_INTERVAL, DEFAULT_MIN_SPACING, DEFAULT_STOP_TIMEOUT};
use crate::source::default_symbols;
use crate::threshold::{RiskThreshold, DEFAULT_RISK_THRESHOLD};
use std::str::FromStr;
use std::time::Duration;

/// Qual implementação de fonte de dados usar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Synthetic,
    Http { url: String },
    Binance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub risk_threshold: f64,
    pub fetch_interval: Duration,
    pub min_fetch_spacing: Duration,
    pub history_capacity: usize,
    pub staleness_bound: Duration,
    /// `None` desliga o prazo dos provedores.
    pub score_timeout: Option<Duration>,
    pub stop_timeout: Duration,
    pub symbols: Vec<String>,
    pub source: SourceKind,
    pub journal_file: Option<String>,
    pub realtime: bool,
    /// `None` roda até Ctrl-C.
    pub run_for: Option<Duration>,
    pub alert_window: usize,
    pub alert_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            risk_threshold: DEFAULT_RISK_THRESHOLD,
            fetch_interval: DEFAULT_INTERVAL,
            min_fetch_spacing: DEFAULT_MIN_SPACING,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            staleness_bound: DEFAULT_STALENESS,
            score_timeout: Some(Duration::from_secs(2)),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            symbols: default_symbols(),
            source: SourceKind::Synthetic,
            journal_file: None,
            realtime: true,
            run_for: None,
            alert_window: DEFAULT_ALERT_WINDOW,
            alert_cap: DEFAULT_ALERT_CAP,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Mesmo que [`from_env`](Self::from_env), lendo de uma função qualquer.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let risk_threshold = parse_or(&lookup, "RISK_THRESHOLD", defaults.risk_threshold)?;
        // Mesma validação de set_risk_threshold
        RiskThreshold::new(risk_threshold)?;

        let symbols_var = lookup("SYMBOLS");
        let symbols = match symbols_var.clone() {
            Some(raw) => {
                let list: Vec<String> = raw
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if list.is_empty() {
                    return Err(ConfigError::Invalid { var: "SYMBOLS", value: raw });
                }
                list
            }
            None => defaults.symbols,
        };

        let source = match lookup("SOURCE").as_deref().unwrap_or("synthetic") {
            "synthetic" => SourceKind::Synthetic,
            // Os índices padrão não existem na binance
            "binance" if symbols_var.is_none() => return Err(ConfigError::Missing("SYMBOLS")),
            "binance" => SourceKind::Binance,
            "http" => SourceKind::Http {
                url: lookup("QUOTE_URL").ok_or(ConfigError::Missing("QUOTE_URL"))?,
            },
            other => {
                return Err(ConfigError::Invalid {
                    var: "SOURCE",
                    value: other.to_string(),
                })
            }
        };

        let score_timeout_ms: u64 =
            parse_or(&lookup, "SCORE_TIMEOUT_MS", defaults.score_timeout.map_or(0, millis))?;
        let run_secs: u64 =
            parse_or(&lookup, "RUN_SECS", defaults.run_for.map_or(0, |d| d.as_secs()))?;

        Ok(Self {
            risk_threshold,
            fetch_interval: secs(parse_or(
                &lookup,
                "FETCH_INTERVAL_SECS",
                defaults.fetch_interval.as_secs(),
            )?),
            min_fetch_spacing: secs(parse_or(
                &lookup,
                "MIN_FETCH_SPACING_SECS",
                defaults.min_fetch_spacing.as_secs(),
            )?),
            history_capacity: parse_or(&lookup, "HISTORY_CAPACITY", defaults.history_capacity)?
                .max(1),
            staleness_bound: Duration::from_millis(parse_or(
                &lookup,
                "STALENESS_MS",
                millis(defaults.staleness_bound),
            )?),
            score_timeout: (score_timeout_ms > 0).then(|| Duration::from_millis(score_timeout_ms)),
            stop_timeout: secs(parse_or(
                &lookup,
                "STOP_TIMEOUT_SECS",
                defaults.stop_timeout.as_secs(),
            )?),
            symbols,
            source,
            journal_file: lookup("JOURNAL_FILE").filter(|s| !s.is_empty()),
            realtime: lookup("REALTIME").unwrap_or_else(|| "1".to_string()) == "1",
            run_for: (run_secs > 0).then(|| Duration::from_secs(run_secs)),
            alert_window: defaults.alert_window,
            alert_cap: defaults.alert_cap,
        })
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
        None => Ok(default),
    }
}
