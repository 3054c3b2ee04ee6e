//! Histórico de Trades (buffer limitado + último valor por símbolo)

use crate::types::EnrichedTrade;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// Buffer FIFO de trades enriquecidos com capacidade fixa.
///
/// Buffer e índice `latest` ficam sob o mesmo lock: um leitor nunca vê um
/// append aplicado só pela metade. O lock é segurado apenas para mutar ou
/// copiar, nunca durante o scoring.
pub struct TradeHistory {
    inner: Mutex<HistoryInner>,
    capacity: usize,
}

struct HistoryInner {
    trades: VecDeque<EnrichedTrade>,
    latest: BTreeMap<String, EnrichedTrade>,
    total_appended: u64,
    evicted: u64,
}

/// Contadores do histórico, copiados de uma vez sob o lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStats {
    pub len: usize,
    pub capacity: usize,
    pub total_appended: u64,
    pub evicted: u64,
    /// Timestamp do trade mais recente, se houver.
    pub last_timestamp: Option<String>,
}

impl TradeHistory {
    /// Cria histórico vazio. Capacidade mínima de 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(HistoryInner {
                // Pré-aloca até 1024 posições; o resto cresce sob demanda
                trades: VecDeque::with_capacity(capacity.min(1024)),
                latest: BTreeMap::new(),
                total_appended: 0,
                evicted: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adiciona trade ao final e substitui o `latest` do símbolo.
    ///
    /// Acima da capacidade o mais antigo é descartado sem erro.
    pub fn append(&self, trade: EnrichedTrade) {
        let mut inner = self.lock();
        if inner.trades.len() >= self.capacity {
            inner.trades.pop_front();
            inner.evicted += 1;
        }
        inner
            .latest
            .insert(trade.tick.symbol.clone(), trade.clone());
        inner.trades.push_back(trade);
        inner.total_appended += 1;
    }

    /// Cópia dos últimos `limit` trades, do mais antigo para o mais novo.
    pub fn snapshot(&self, limit: usize) -> Vec<EnrichedTrade> {
        let inner = self.lock();
        let skip = inner.trades.len().saturating_sub(limit);
        inner.trades.iter().skip(skip).cloned().collect()
    }

    /// Cópia do último trade de cada símbolo.
    pub fn latest(&self) -> BTreeMap<String, EnrichedTrade> {
        self.lock().latest.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().trades.is_empty()
    }

    pub fn stats(&self) -> HistoryStats {
        let inner = self.lock();
        HistoryStats {
            len: inner.trades.len(),
            capacity: self.capacity,
            total_appended: inner.total_appended,
            evicted: inner.evicted,
            last_timestamp: inner.trades.back().map(|trade| trade.tick.timestamp.clone()),
        }
    }

    // Cada seção crítica é um único push/pop/insert; um lock envenenado
    // ainda guarda dados consistentes.
    fn lock(&self) -> MutexGuard<'_, HistoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TradeHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{RawTick, RiskLevel};
    use std::sync::Arc;

    pub(crate) fn trade(symbol: &str, seq: u32, score: f64) -> EnrichedTrade {
        EnrichedTrade {
            tick: RawTick {
                symbol: symbol.to_string(),
                price: 100.0 + seq as f64,
                volume: 1_000,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + seq as f64,
                timestamp: format!("2024-05-01T10:{:02}:{:02}Z", seq / 60 % 60, seq % 60),
                trade_id: format!("{symbol}_{seq}"),
            },
            manipulation_score: score,
            insider_score: 0.0,
            latency_ms: Some(5.0),
            latency_flag: false,
            risk_level: RiskLevel::Low,
        }
    }

    #[test]
    fn empty_history_returns_empty_copies() {
        let history = TradeHistory::new(4);
        assert!(history.is_empty());
        assert!(history.snapshot(25).is_empty());
        assert!(history.latest().is_empty());
        assert_eq!(history.stats().last_timestamp, None);
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let capacity = 5;
        let extra = 3;
        let history = TradeHistory::new(capacity);
        for seq in 0..(capacity + extra) as u32 {
            history.append(trade("NIFTY 50", seq, 0.1));
        }

        let snapshot = history.snapshot(capacity);
        assert_eq!(snapshot.len(), capacity);
        let ids: Vec<_> = snapshot.iter().map(|t| t.tick.trade_id.clone()).collect();
        let expected: Vec<_> = (extra as u32..(capacity + extra) as u32)
            .map(|seq| format!("NIFTY 50_{seq}"))
            .collect();
        assert_eq!(ids, expected);

        let stats = history.stats();
        assert_eq!(stats.len, capacity);
        assert_eq!(stats.total_appended, (capacity + extra) as u64);
        assert_eq!(stats.evicted, extra as u64);
        assert_eq!(stats.last_timestamp.as_deref(), Some("2024-05-01T10:00:07Z"));
    }

    #[test]
    fn stats_are_a_single_consistent_copy_under_concurrent_appends() {
        let history = Arc::new(TradeHistory::new(50));
        let writer = {
            let history = Arc::clone(&history);
            std::thread::spawn(move || {
                for seq in 0..2_000 {
                    history.append(trade("SENSEX", seq, 0.1));
                }
            })
        };

        for _ in 0..500 {
            let stats = history.stats();
            match stats.total_appended {
                0 => assert_eq!(stats.last_timestamp, None),
                n => {
                    let newest = trade("SENSEX", (n - 1) as u32, 0.1);
                    assert_eq!(stats.last_timestamp, Some(newest.tick.timestamp));
                    assert_eq!(stats.len as u64, n.min(50));
                    assert_eq!(stats.evicted, n.saturating_sub(50));
                }
            }
        }
        writer.join().expect("writer");
    }

    #[test]
    fn snapshot_limit_returns_tail_in_arrival_order() {
        let history = TradeHistory::new(100);
        for seq in 0..10 {
            history.append(trade("SENSEX", seq, 0.1));
        }
        let tail = history.snapshot(3);
        let ids: Vec<_> = tail.iter().map(|t| t.tick.trade_id.as_str()).collect();
        assert_eq!(ids, ["SENSEX_7", "SENSEX_8", "SENSEX_9"]);
        assert_eq!(history.snapshot(0).len(), 0);
        assert_eq!(history.snapshot(1_000).len(), 10);
    }

    #[test]
    fn latest_overwrites_per_symbol_and_survives_eviction() {
        let history = TradeHistory::new(2);
        history.append(trade("BANKNIFTY", 1, 0.1));
        history.append(trade("SENSEX", 2, 0.1));
        history.append(trade("SENSEX", 3, 0.1));
        history.append(trade("SENSEX", 4, 0.1));

        let latest = history.latest();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["SENSEX"].tick.trade_id, "SENSEX_4");
        // BANKNIFTY já saiu do buffer, mas o latest permanece
        assert_eq!(latest["BANKNIFTY"].tick.trade_id, "BANKNIFTY_1");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let history = TradeHistory::new(0);
        history.append(trade("X", 1, 0.1));
        history.append(trade("X", 2, 0.1));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn concurrent_readers_see_consistent_lengths() {
        let history = Arc::new(TradeHistory::new(50));
        let writer = {
            let history = Arc::clone(&history);
            std::thread::spawn(move || {
                for seq in 0..2_000 {
                    history.append(trade("NIFTY 50", seq, 0.1));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let history = Arc::clone(&history);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = history.snapshot(50);
                        assert!(snap.len() <= 50);
                        // ordem de chegada preservada: sequência contígua
                        for pair in snap.windows(2) {
                            assert!(pair[0].tick.price + 1.0 == pair[1].tick.price);
                        }
                    }
                })
            })
            .collect();

        writer.join().expect("writer");
        for reader in readers {
            reader.join().expect("reader");
        }
        assert_eq!(history.len(), 50);
    }
}
