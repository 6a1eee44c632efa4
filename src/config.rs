//! Configuration loader
//!
//! TOML in, validated configuration out. Invalid limits (negative risk
//! fractions, zero intervals, inverted stop/target multipliers) are fatal
//! at startup: the process must never begin scheduling with them.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::agents::{AnalyzerConfig, ExecutorConfig, OrchestratorConfig, ScannerConfig};
use crate::error::TradingError;
use crate::risk::exits::ExitConfig;
use crate::risk::RiskLimits;
use crate::universe;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub scanner: ScannerSection,
    #[serde(default)]
    pub analyzer: AnalyzerSection,
    #[serde(default)]
    pub exits: ExitsSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub data: DataConfig,
    /// Symbols to scan; empty means the default universe
    #[serde(default)]
    pub watchlist: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SystemConfig {
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    #[serde(default = "default_starting_cash")]
    pub starting_cash: f64,
}

fn default_starting_cash() -> f64 {
    25_000.0
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self { starting_cash: default_starting_cash() }
    }
}

#[derive(Debug, Deserialize)]
pub struct RiskSection {
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    /// Optional sector notional cap as a fraction of equity
    #[serde(default)]
    pub max_sector_exposure: Option<f64>,
}

fn default_risk_per_trade() -> f64 {
    0.01
}
fn default_max_daily_loss() -> f64 {
    0.03
}
fn default_max_position_size() -> f64 {
    0.10
}
fn default_max_positions() -> usize {
    5
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            risk_per_trade: default_risk_per_trade(),
            max_daily_loss: default_max_daily_loss(),
            max_position_size: default_max_position_size(),
            max_positions: default_max_positions(),
            max_sector_exposure: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScannerSection {
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_signal_threshold")]
    pub signal_threshold: f64,
    #[serde(default = "default_min_volume")]
    pub min_volume: u64,
    #[serde(default = "default_min_price")]
    pub min_price: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: i64,
    #[serde(default = "default_benchmark")]
    pub benchmark: String,
}

fn default_scan_interval() -> u64 {
    60
}
fn default_signal_threshold() -> f64 {
    2.0
}
fn default_min_volume() -> u64 {
    500_000
}
fn default_min_price() -> f64 {
    5.0
}
fn default_cooldown() -> i64 {
    900
}
fn default_benchmark() -> String {
    universe::BENCHMARK.to_string()
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            signal_threshold: default_signal_threshold(),
            min_volume: default_min_volume(),
            min_price: default_min_price(),
            cooldown_secs: default_cooldown(),
            benchmark: default_benchmark(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzerSection {
    #[serde(default = "default_min_structure_score")]
    pub min_structure_score: u8,
    #[serde(default = "default_min_risk_reward")]
    pub min_risk_reward: f64,
    #[serde(default = "default_max_atr_percent")]
    pub max_atr_percent: f64,
    #[serde(default)]
    pub use_kelly: bool,
}

fn default_min_structure_score() -> u8 {
    3
}
fn default_min_risk_reward() -> f64 {
    2.0
}
fn default_max_atr_percent() -> f64 {
    5.0
}

impl Default for AnalyzerSection {
    fn default() -> Self {
        Self {
            min_structure_score: default_min_structure_score(),
            min_risk_reward: default_min_risk_reward(),
            max_atr_percent: default_max_atr_percent(),
            use_kelly: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExitsSection {
    #[serde(default = "default_stop_mult")]
    pub stop_atr_multiplier: f64,
    #[serde(default = "default_target_mult")]
    pub target_atr_multiplier: f64,
    #[serde(default = "default_true")]
    pub use_trailing_stop: bool,
    #[serde(default = "default_true")]
    pub use_scaled_exits: bool,
    #[serde(default = "default_max_holding")]
    pub max_holding_days: i64,
    #[serde(default = "default_stale_days")]
    pub stale_trade_days: i64,
}

fn default_stop_mult() -> f64 {
    0.75
}
fn default_target_mult() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}
fn default_max_holding() -> i64 {
    10
}
fn default_stale_days() -> i64 {
    5
}

impl Default for ExitsSection {
    fn default() -> Self {
        Self {
            stop_atr_multiplier: default_stop_mult(),
            target_atr_multiplier: default_target_mult(),
            use_trailing_stop: true,
            use_scaled_exits: true,
            max_holding_days: default_max_holding(),
            stale_trade_days: default_stale_days(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExecutorSection {
    #[serde(default)]
    pub auto_trade: bool,
    #[serde(default = "default_exit_check")]
    pub exit_check_secs: u64,
}

fn default_exit_check() -> u64 {
    30
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self { auto_trade: false, exit_check_secs: default_exit_check() }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_csv_dir")]
    pub csv_dir: String,
}

fn default_csv_dir() -> String {
    "data".to_string()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { csv_dir: default_csv_dir() }
    }
}

/// Convert a configured fraction, rejecting non-finite or out-of-range
/// values.
fn fraction(value: f64, field: &str) -> Result<Decimal, TradingError> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(TradingError::Configuration(format!(
            "{} must be a fraction in (0, 1], got {}",
            field, value
        )));
    }
    Decimal::from_f64(value)
        .ok_or_else(|| TradingError::Configuration(format!("{} is not representable", field)))
}

fn positive(value: f64, field: &str) -> Result<Decimal, TradingError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(TradingError::Configuration(format!(
            "{} must be positive, got {}",
            field, value
        )));
    }
    Decimal::from_f64(value)
        .ok_or_else(|| TradingError::Configuration(format!("{} is not representable", field)))
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, TradingError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            TradingError::Configuration(format!("read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| TradingError::Configuration(format!("parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the scheduler must never start with
    pub fn validate(&self) -> Result<(), TradingError> {
        fraction(self.risk.risk_per_trade, "risk.risk_per_trade")?;
        fraction(self.risk.max_daily_loss, "risk.max_daily_loss")?;
        fraction(self.risk.max_position_size, "risk.max_position_size")?;
        if let Some(sector) = self.risk.max_sector_exposure {
            fraction(sector, "risk.max_sector_exposure")?;
        }
        if self.risk.max_positions == 0 {
            return Err(TradingError::Configuration(
                "risk.max_positions must be at least 1".to_string(),
            ));
        }
        if self.scanner.scan_interval_secs == 0 {
            return Err(TradingError::Configuration(
                "scanner.scan_interval_secs must be at least 1".to_string(),
            ));
        }
        if !self.scanner.signal_threshold.is_finite() || self.scanner.signal_threshold <= 0.0 {
            return Err(TradingError::Configuration(format!(
                "scanner.signal_threshold must be positive, got {}",
                self.scanner.signal_threshold
            )));
        }
        positive(self.account.starting_cash, "account.starting_cash")?;
        let stop = positive(self.exits.stop_atr_multiplier, "exits.stop_atr_multiplier")?;
        let target = positive(self.exits.target_atr_multiplier, "exits.target_atr_multiplier")?;
        if target <= stop {
            return Err(TradingError::Configuration(format!(
                "exits.target_atr_multiplier ({}) must exceed exits.stop_atr_multiplier ({})",
                target, stop
            )));
        }
        if self.exits.max_holding_days <= 0 || self.exits.stale_trade_days <= 0 {
            return Err(TradingError::Configuration(
                "exit holding periods must be positive".to_string(),
            ));
        }
        if self.telegram.enabled && (self.telegram.bot_token.is_empty() || self.telegram.chat_id.is_empty()) {
            return Err(TradingError::Configuration(
                "telegram enabled but bot_token/chat_id missing".to_string(),
            ));
        }
        Ok(())
    }

    /// Watchlist, falling back to the default universe
    pub fn effective_watchlist(&self) -> Vec<String> {
        if self.watchlist.is_empty() {
            universe::Universe::new().symbols()
        } else {
            universe::Universe::from_symbols(self.watchlist.clone()).symbols()
        }
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_risk_per_trade: Decimal::from_f64(self.risk.risk_per_trade)
                .unwrap_or_else(|| RiskLimits::default().max_risk_per_trade),
            max_daily_loss: Decimal::from_f64(self.risk.max_daily_loss)
                .unwrap_or_else(|| RiskLimits::default().max_daily_loss),
            max_position_size: Decimal::from_f64(self.risk.max_position_size)
                .unwrap_or_else(|| RiskLimits::default().max_position_size),
            max_positions: self.risk.max_positions,
            max_sector_exposure: self.risk.max_sector_exposure.and_then(Decimal::from_f64),
            ..RiskLimits::default()
        }
    }

    pub fn exit_config(&self) -> ExitConfig {
        let defaults = ExitConfig::default();
        ExitConfig {
            stop_atr_multiplier: Decimal::from_f64(self.exits.stop_atr_multiplier)
                .unwrap_or(defaults.stop_atr_multiplier),
            target_atr_multiplier: Decimal::from_f64(self.exits.target_atr_multiplier)
                .unwrap_or(defaults.target_atr_multiplier),
            use_trailing_stop: self.exits.use_trailing_stop,
            use_scaled_exits: self.exits.use_scaled_exits,
            max_holding_days: self.exits.max_holding_days,
            stale_trade_days: self.exits.stale_trade_days,
            ..defaults
        }
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        let defaults = ScannerConfig::default();
        ScannerConfig {
            signal_threshold: self.scanner.signal_threshold,
            min_volume: self.scanner.min_volume,
            min_price: Decimal::from_f64(self.scanner.min_price).unwrap_or(defaults.min_price),
            cooldown_secs: self.scanner.cooldown_secs,
            ..defaults
        }
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        let defaults = AnalyzerConfig::default();
        AnalyzerConfig {
            min_structure_score: self.analyzer.min_structure_score,
            min_risk_reward: Decimal::from_f64(self.analyzer.min_risk_reward)
                .unwrap_or(defaults.min_risk_reward),
            max_atr_percent: Decimal::from_f64(self.analyzer.max_atr_percent)
                .unwrap_or(defaults.max_atr_percent),
            use_kelly: self.analyzer.use_kelly,
            ..defaults
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            auto_trade: self.executor.auto_trade,
            exit_check_secs: self.executor.exit_check_secs,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            watchlist: self.effective_watchlist(),
            benchmark: self.scanner.benchmark.clone(),
            starting_cash: Decimal::from_f64(self.account.starting_cash)
                .unwrap_or_else(|| Decimal::from(25_000u64)),
            scan_interval: Duration::from_secs(self.scanner.scan_interval_secs),
            limits: self.risk_limits(),
            exits: self.exit_config(),
            scanner: self.scanner_config(),
            analyzer: self.analyzer_config(),
            executor: self.executor_config(),
            ..OrchestratorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_toml() -> String {
        r#"
            watchlist = ["NVDA", "AAPL"]

            [system]
            name = "Meridian"

            [risk]
            risk_per_trade = 0.01
            max_daily_loss = 0.03

            [scanner]
            signal_threshold = 1.75
        "#
        .to_string()
    }

    #[test]
    fn test_parse_and_convert() {
        let config: Config = toml::from_str(&base_toml()).unwrap();
        config.validate().unwrap();

        let limits = config.risk_limits();
        assert_eq!(limits.max_risk_per_trade, dec!(0.01));
        assert_eq!(limits.max_positions, 5);

        let scanner = config.scanner_config();
        assert!((scanner.signal_threshold - 1.75).abs() < 1e-9);

        assert_eq!(config.effective_watchlist(), vec!["AAPL", "NVDA"]);
    }

    #[test]
    fn test_negative_risk_fraction_is_fatal() {
        let toml_text = base_toml().replace("risk_per_trade = 0.01", "risk_per_trade = -0.01");
        let config: Config = toml::from_str(&toml_text).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, TradingError::Configuration(_)));
    }

    #[test]
    fn test_target_must_exceed_stop() {
        let mut toml_text = base_toml();
        toml_text.push_str(
            "\n[exits]\nstop_atr_multiplier = 2.0\ntarget_atr_multiplier = 1.0\n",
        );
        let config: Config = toml::from_str(&toml_text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_watchlist_falls_back_to_universe() {
        let toml_text = base_toml().replace("watchlist = [\"NVDA\", \"AAPL\"]", "");
        let config: Config = toml::from_str(&toml_text).unwrap();
        assert!(!config.effective_watchlist().is_empty());
    }

    #[test]
    fn test_telegram_requires_credentials_when_enabled() {
        let mut toml_text = base_toml();
        toml_text.push_str("\n[telegram]\nenabled = true\n");
        let config: Config = toml::from_str(&toml_text).unwrap();
        assert!(config.validate().is_err());
    }
}
