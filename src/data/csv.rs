//! CSV-backed historical data
//!
//! Expected format: `timestamp,open,high,low,close,volume` with a header
//! row (skipped) and the timestamp in Unix epoch seconds. A directory of
//! `SYMBOL_daily.csv` files becomes an in-memory store that feeds the
//! backtester and doubles as a `DataProvider` for paper sessions.

use async_trait::async_trait;
use chrono::TimeZone;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::core::types::Candle;
use crate::data::{BarInterval, DataError, DataProvider, Quote};

/// Load bars from a CSV file
pub fn load_csv(path: &Path) -> Result<Vec<Candle>, std::io::Error> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut bars = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        if i == 0 {
            continue; // Skip header
        }

        let line = line?;
        let parts: Vec<&str> = line.split(',').collect();

        if parts.len() >= 6 {
            let timestamp: i64 = parts[0].parse().unwrap_or(0);
            let Some(time) = Utc.timestamp_opt(timestamp, 0).single() else {
                continue;
            };

            let open = parts[1].parse::<Decimal>().unwrap_or(Decimal::ZERO);
            let high = parts[2].parse::<Decimal>().unwrap_or(Decimal::ZERO);
            let low = parts[3].parse::<Decimal>().unwrap_or(Decimal::ZERO);
            let close = parts[4].parse::<Decimal>().unwrap_or(Decimal::ZERO);
            let volume: u64 = parts[5].trim().parse().unwrap_or(0);

            bars.push(Candle { time, open, high, low, close, volume });
        }
    }

    Ok(bars)
}

/// In-memory bar store keyed by symbol. BTreeMap keeps symbol iteration
/// deterministic for replay.
#[derive(Debug, Clone, Default)]
pub struct HistoricalData {
    bars: BTreeMap<String, Vec<Candle>>,
}

impl HistoricalData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.csv` in a directory; the symbol is the part of the
    /// file stem before the first underscore, uppercased.
    pub fn load_dir(dir: &Path) -> Result<Self, std::io::Error> {
        let mut store = Self::new();
        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "csv").unwrap_or(false))
            .collect();
        entries.sort();

        for path in entries {
            let symbol = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("UNKNOWN")
                .split('_')
                .next()
                .unwrap_or("UNKNOWN")
                .to_uppercase();
            let bars = load_csv(&path)?;
            if !bars.is_empty() {
                store.insert(symbol, bars);
            }
        }

        Ok(store)
    }

    pub fn insert(&mut self, symbol: impl Into<String>, mut bars: Vec<Candle>) {
        bars.sort_by_key(|b| b.time);
        self.bars.insert(symbol.into(), bars);
    }

    pub fn get(&self, symbol: &str) -> Option<&[Candle]> {
        self.bars.get(symbol).map(|b| b.as_slice())
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.bars.contains_key(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.bars.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

#[async_trait]
impl DataProvider for HistoricalData {
    async fn fetch_bars(
        &self,
        symbol: &str,
        _interval: BarInterval,
        lookback: usize,
    ) -> Result<Vec<Candle>, DataError> {
        let bars = self
            .get(symbol)
            .ok_or_else(|| DataError::unavailable(symbol, "no history loaded"))?;
        let start = bars.len().saturating_sub(lookback);
        Ok(bars[start..].to_vec())
    }

    async fn fetch_snapshot(&self, symbol: &str) -> Result<Quote, DataError> {
        let bars = self
            .get(symbol)
            .ok_or_else(|| DataError::unavailable(symbol, "no history loaded"))?;
        if bars.len() < 2 {
            return Err(DataError::unavailable(symbol, "insufficient history"));
        }
        let last = &bars[bars.len() - 1];
        let prev = &bars[bars.len() - 2];
        Ok(Quote {
            symbol: symbol.to_string(),
            last: last.close,
            previous_close: prev.close,
            time: last.time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn sample_csv() -> String {
        let mut s = String::from("timestamp,open,high,low,close,volume\n");
        for i in 0..5i64 {
            let ts = 1_700_000_000 + i * 86_400;
            s.push_str(&format!("{},100.0,102.0,99.0,{},1000\n", ts, 100 + i));
        }
        s
    }

    #[test]
    fn test_load_csv_skips_header() {
        let dir = std::env::temp_dir();
        let path = dir.join("meridian_test_load.csv");
        let mut f = File::create(&path).unwrap();
        f.write_all(sample_csv().as_bytes()).unwrap();

        let bars = load_csv(&path).unwrap();
        assert_eq!(bars.len(), 5);
        assert_eq!(bars[0].close, dec!(100));
        assert_eq!(bars[4].close, dec!(104));

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_snapshot_from_store() {
        let mut store = HistoricalData::new();
        let dir = std::env::temp_dir();
        let path = dir.join("meridian_test_snapshot.csv");
        let mut f = File::create(&path).unwrap();
        f.write_all(sample_csv().as_bytes()).unwrap();
        store.insert("TEST", load_csv(&path).unwrap());
        std::fs::remove_file(&path).ok();

        let quote = store.fetch_snapshot("TEST").await.unwrap();
        assert_eq!(quote.last, dec!(104));
        assert_eq!(quote.previous_close, dec!(103));

        let err = store.fetch_snapshot("MISSING").await.unwrap_err();
        assert!(matches!(err, DataError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_fetch_bars_respects_lookback() {
        let mut store = HistoricalData::new();
        let dir = std::env::temp_dir();
        let path = dir.join("meridian_test_lookback.csv");
        let mut f = File::create(&path).unwrap();
        f.write_all(sample_csv().as_bytes()).unwrap();
        store.insert("TEST", load_csv(&path).unwrap());
        std::fs::remove_file(&path).ok();

        let bars = store.fetch_bars("TEST", BarInterval::Daily, 3).await.unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[2].close, dec!(104));
    }
}
