//! Scanner agent
//!
//! Walks the watchlist on a schedule, computes relative strength against
//! the benchmark, and publishes `SignalDetected` for symbols crossing the
//! configured threshold. Data gaps are transient: logged and skipped, the
//! next tick proceeds.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::agent::{Agent, AgentMetrics};
use crate::core::events::{SignalEvent, Topic};
use crate::core::types::{Direction, Signal, StructureSnapshot};
use crate::data::{BarInterval, DataProvider, Quote};
use crate::error::TradingError;
use crate::indicators;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Minimum |RRS| to emit a signal
    pub signal_threshold: f64,
    /// Liquidity floor on the latest bar
    pub min_volume: u64,
    pub min_price: Decimal,
    /// Per-symbol quiet period after a signal
    pub cooldown_secs: i64,
    /// Strongest N signals per side published per scan
    pub max_signals_per_side: usize,
    pub atr_period: usize,
    /// Daily bars fetched per symbol
    pub lookback: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            signal_threshold: 2.0,
            min_volume: 500_000,
            min_price: dec!(5.0),
            cooldown_secs: 900,
            max_signals_per_side: 5,
            atr_period: indicators::DEFAULT_ATR_PERIOD,
            lookback: 60,
        }
    }
}

pub struct ScannerAgent {
    watchlist: Vec<String>,
    benchmark: String,
    data: Arc<dyn DataProvider>,
    signals: Topic<SignalEvent>,
    cfg: ScannerConfig,
    cooldown: HashMap<String, DateTime<Utc>>,
    metrics: AgentMetrics,
}

impl ScannerAgent {
    pub fn new(
        watchlist: Vec<String>,
        benchmark: String,
        data: Arc<dyn DataProvider>,
        signals: Topic<SignalEvent>,
        cfg: ScannerConfig,
    ) -> Self {
        Self {
            watchlist,
            benchmark,
            data,
            signals,
            cfg,
            cooldown: HashMap::new(),
            metrics: AgentMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    async fn scan_market(&mut self) -> Result<(), TradingError> {
        let benchmark = match self.data.fetch_snapshot(&self.benchmark).await {
            Ok(quote) => quote,
            Err(e) => {
                warn!("scanner: benchmark {} unavailable, skipping scan: {}", self.benchmark, e);
                return Ok(());
            }
        };

        let now = Utc::now();
        let mut longs: Vec<Signal> = Vec::new();
        let mut shorts: Vec<Signal> = Vec::new();

        let watchlist = self.watchlist.clone();
        for symbol in &watchlist {
            if self.in_cooldown(symbol, now) {
                continue;
            }
            match self.scan_symbol(symbol, &benchmark, now).await {
                Some(signal) => match signal.direction {
                    Direction::Long => longs.push(signal),
                    Direction::Short => shorts.push(signal),
                },
                None => continue,
            }
        }

        // Strongest first on each side
        longs.sort_by(|a, b| b.rrs.partial_cmp(&a.rrs).unwrap_or(std::cmp::Ordering::Equal));
        shorts.sort_by(|a, b| a.rrs.partial_cmp(&b.rrs).unwrap_or(std::cmp::Ordering::Equal));

        let mut published = 0u64;
        for signal in longs
            .into_iter()
            .take(self.cfg.max_signals_per_side)
            .chain(shorts.into_iter().take(self.cfg.max_signals_per_side))
        {
            info!(
                "signal: {} {} RRS={:.2} @ ${:.2}",
                signal.symbol, signal.direction, signal.rrs, signal.price
            );
            self.cooldown.insert(signal.symbol.clone(), now);
            self.signals.publish(SignalEvent { signal, published_at: now });
            published += 1;
        }

        self.metrics.record_tick();
        self.metrics.record_published(published);
        Ok(())
    }

    fn in_cooldown(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.cooldown
            .get(symbol)
            .map(|last| now - *last < Duration::seconds(self.cfg.cooldown_secs))
            .unwrap_or(false)
    }

    async fn scan_symbol(
        &self,
        symbol: &str,
        benchmark: &Quote,
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        let bars = match self
            .data
            .fetch_bars(symbol, BarInterval::Daily, self.cfg.lookback)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                debug!("scanner: {} skipped: {}", symbol, e);
                return None;
            }
        };

        if bars.len() < 2 {
            return None;
        }
        let last = bars.last()?;
        let prev = &bars[bars.len() - 2];

        // Liquidity filters
        if last.volume < self.cfg.min_volume || last.close < self.cfg.min_price {
            return None;
        }

        let atr = indicators::atr(&bars, self.cfg.atr_period)?;
        let rrs = indicators::rrs(
            last.close,
            prev.close,
            benchmark.last,
            benchmark.previous_close,
            atr,
        )?;

        if rrs.abs() < self.cfg.signal_threshold {
            return None;
        }

        let scores = indicators::structure_scores(&bars)?;
        let direction = if rrs > 0.0 { Direction::Long } else { Direction::Short };

        Some(Signal {
            symbol: symbol.to_string(),
            time: now,
            rrs,
            direction,
            price: last.close,
            atr,
            structure: StructureSnapshot {
                strength_score: scores.strength,
                weakness_score: scores.weakness,
                ema3: scores.ema3,
                ema8: scores.ema8,
                ema21: scores.ema21,
            },
        })
    }
}

#[async_trait]
impl Agent for ScannerAgent {
    fn name(&self) -> &str {
        "scanner"
    }

    async fn start(&mut self) -> Result<(), TradingError> {
        info!(
            "scanner: {} symbols, threshold |RRS| >= {}",
            self.watchlist.len(),
            self.cfg.signal_threshold
        );
        Ok(())
    }

    async fn tick(&mut self) -> Result<(), TradingError> {
        self.scan_market().await
    }

    async fn stop(&mut self) -> Result<(), TradingError> {
        self.cooldown.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Candle;
    use crate::data::HistoricalData;
    use chrono::TimeZone;

    /// Store where one symbol strongly outperforms a flat benchmark
    fn store_with_outperformer() -> HistoricalData {
        let mut store = HistoricalData::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let spy: Vec<Candle> = (0..40)
            .map(|i| {
                Candle::new(
                    t0 + Duration::days(i),
                    dec!(400),
                    dec!(401),
                    dec!(399),
                    dec!(400),
                    5_000_000,
                )
            })
            .collect();
        store.insert("SPY", spy);

        // Steady uptrend with a final-day pop well beyond 2 ATRs
        let mover: Vec<Candle> = (0..40)
            .map(|i| {
                let base = dec!(100) + Decimal::from(i as u64) * dec!(0.3);
                let close = if i == 39 { base + dec!(6) } else { base };
                Candle::new(
                    t0 + Duration::days(i),
                    base - dec!(0.2),
                    close + dec!(0.5),
                    base - dec!(0.5),
                    close,
                    2_000_000,
                )
            })
            .collect();
        store.insert("NVDA", mover);

        // Illiquid symbol that must be filtered out
        let thin: Vec<Candle> = (0..40)
            .map(|i| {
                Candle::new(
                    t0 + Duration::days(i),
                    dec!(50),
                    dec!(56),
                    dec!(49),
                    if i == 39 { dec!(55) } else { dec!(50) },
                    10_000,
                )
            })
            .collect();
        store.insert("THIN", thin);

        store
    }

    fn scanner_with(store: HistoricalData, topic: Topic<SignalEvent>) -> ScannerAgent {
        ScannerAgent::new(
            vec!["NVDA".to_string(), "THIN".to_string()],
            "SPY".to_string(),
            Arc::new(store),
            topic,
            ScannerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_scan_publishes_threshold_crossers_only() {
        let topic: Topic<SignalEvent> = Topic::new(32);
        let mut rx = topic.subscribe();
        let mut scanner = scanner_with(store_with_outperformer(), topic);

        scanner.scan_market().await.unwrap();

        let event = rx.try_recv().expect("expected one signal");
        assert_eq!(event.signal.symbol, "NVDA");
        assert_eq!(event.signal.direction, Direction::Long);
        assert!(event.signal.rrs >= 2.0);
        // THIN fails the liquidity filter despite its move
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_repeat_signals() {
        let topic: Topic<SignalEvent> = Topic::new(32);
        let mut rx = topic.subscribe();
        let mut scanner = scanner_with(store_with_outperformer(), topic);

        scanner.scan_market().await.unwrap();
        assert!(rx.try_recv().is_ok());

        scanner.scan_market().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_benchmark_skips_scan_without_error() {
        let topic: Topic<SignalEvent> = Topic::new(32);
        let mut rx = topic.subscribe();
        let mut store = HistoricalData::new();
        store.insert("NVDA", Vec::new());
        let mut scanner = scanner_with(store, topic);

        // Transient data gap: tick succeeds, nothing published
        scanner.scan_market().await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
