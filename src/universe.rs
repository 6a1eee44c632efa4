//! Trading universe
//!
//! The watchlist the scanner walks each tick, plus a static sector
//! classification used by the optional sector-exposure gate.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Default scan watchlist: liquid large caps across sectors
pub const DEFAULT_SYMBOLS: &[&str] = &[
    // Tech
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "TSLA", "AMD", "ADBE", "CRM",
    "NFLX", "AVGO", "INTC", "CSCO", "TXN", "PYPL",
    // Finance
    "JPM", "V", "MA", "GS", "BAC",
    // Healthcare
    "JNJ", "UNH", "MRK", "ABT", "TMO",
    // Consumer
    "HD", "PG", "COST", "DIS", "PEP", "KO",
];

/// Benchmark symbol for relative-strength comparison
pub const BENCHMARK: &str = "SPY";

/// Sector classification for exposure limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sector {
    Technology,
    Finance,
    Healthcare,
    Consumer,
    Industrial,
    Energy,
    Etf,
    Unknown,
}

/// Static symbol-to-sector table. Unknown symbols fall into their own
/// bucket and are never aggregated together by the exposure gate.
pub fn sector_of(symbol: &str) -> Sector {
    match symbol {
        "AAPL" | "MSFT" | "GOOGL" | "AMZN" | "NVDA" | "META" | "TSLA" | "AMD" | "ADBE"
        | "CRM" | "NFLX" | "AVGO" | "INTC" | "CSCO" | "TXN" | "PYPL" | "ORCL" | "QCOM" => {
            Sector::Technology
        }
        "JPM" | "V" | "MA" | "GS" | "BAC" | "WFC" | "C" | "SCHW" | "BLK" | "AXP" => {
            Sector::Finance
        }
        "JNJ" | "UNH" | "MRK" | "ABT" | "TMO" | "PFE" | "ABBV" | "LLY" | "AMGN" => {
            Sector::Healthcare
        }
        "HD" | "PG" | "COST" | "DIS" | "PEP" | "KO" | "NKE" | "SBUX" | "MCD" | "WMT" | "TGT" => {
            Sector::Consumer
        }
        "BA" | "CAT" | "GE" | "HON" | "UPS" | "LMT" | "RTX" | "DE" | "MMM" => Sector::Industrial,
        "XOM" | "CVX" | "COP" | "SLB" | "EOG" | "OXY" => Sector::Energy,
        "SPY" | "QQQ" | "IWM" | "DIA" | "GLD" | "SLV" | "USO" | "TLT" => Sector::Etf,
        _ => Sector::Unknown,
    }
}

/// The set of symbols being scanned
#[derive(Debug, Clone)]
pub struct Universe {
    symbols: HashSet<String>,
}

impl Universe {
    /// Default universe
    pub fn new() -> Self {
        Self {
            symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn from_symbols(symbols: Vec<String>) -> Self {
        Self {
            symbols: symbols.into_iter().map(|s| s.to_uppercase()).collect(),
        }
    }

    /// Load from a file, one symbol per line; `#` comments allowed
    pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
        let content = fs::read_to_string(path)?;
        let symbols: HashSet<String> = content
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|s| s.to_uppercase())
            .collect();

        Ok(Self { symbols })
    }

    pub fn add(&mut self, symbol: &str) {
        self.symbols.insert(symbol.to_uppercase());
    }

    pub fn remove(&mut self, symbol: &str) {
        self.symbols.remove(&symbol.to_uppercase());
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(&symbol.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// All symbols, sorted for deterministic iteration
    pub fn symbols(&self) -> Vec<String> {
        let mut syms: Vec<_> = self.symbols.iter().cloned().collect();
        syms.sort();
        syms
    }
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_sorted_symbols() {
        let universe = Universe::from_symbols(vec!["nvda".to_string(), "aapl".to_string()]);
        assert_eq!(universe.symbols(), vec!["AAPL".to_string(), "NVDA".to_string()]);
        assert!(universe.contains("nvda"));
    }

    #[test]
    fn test_sector_lookup() {
        assert_eq!(sector_of("NVDA"), Sector::Technology);
        assert_eq!(sector_of("JPM"), Sector::Finance);
        assert_eq!(sector_of("SPY"), Sector::Etf);
        assert_eq!(sector_of("ZZZZ"), Sector::Unknown);
    }
}
