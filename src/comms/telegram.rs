//! Telegram notifications
//!
//! Rejections and circuit-breaker trips go through the same channel as
//! fills, with the reason stated explicitly. Sends are spawned
//! fire-and-forget; errors are logged and dropped.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::core::types::{ClosedTrade, TradeSetup};

#[derive(Debug, Clone)]
pub struct Notifier {
    enabled: bool,
    bot_token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(enabled: bool, bot_token: String, chat_id: String) -> Self {
        Self { enabled, bot_token, chat_id, client: reqwest::Client::new() }
    }

    pub fn disabled() -> Self {
        Self::new(false, String::new(), String::new())
    }

    /// Queue a message without blocking the caller
    pub fn notify(&self, message: String) {
        if !self.enabled {
            debug!("notifier disabled, dropping: {}", message);
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.send(&message).await;
        });
    }

    async fn send(&self, message: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let params = [
            ("chat_id", self.chat_id.as_str()),
            ("text", message),
            ("parse_mode", "HTML"),
        ];

        match self.client.post(&url).form(&params).send().await {
            Ok(resp) => {
                if !resp.status().is_success() {
                    warn!("Telegram send failed: {}", resp.status());
                }
            }
            Err(e) => {
                warn!("Telegram error: {}", e);
            }
        }
    }

    pub fn notify_startup(&self, name: &str) {
        self.notify(format!("🚀 <b>{}</b> started\n\nScanning for signals...", name));
    }

    pub fn notify_setup(&self, setup: &TradeSetup) {
        self.notify(format!(
            "🎯 <b>SETUP</b>\n\n\
            {} <b>{}</b>\n\
            RRS: {:.2}\n\
            Entry: {}\n\
            Stop: {}\n\
            Target: {}\n\
            Shares: {}",
            setup.direction(),
            setup.symbol(),
            setup.signal.rrs,
            setup.entry_price,
            setup.stop_price,
            setup.target_price,
            setup.shares,
        ));
    }

    pub fn notify_execution(&self, symbol: &str, direction: &str, shares: Decimal, price: Decimal) {
        self.notify(format!(
            "✅ <b>FILLED</b>\n\n{} {} x{} @ {}",
            direction, symbol, shares, price
        ));
    }

    pub fn notify_rejection(&self, symbol: &str, reason: &str) {
        self.notify(format!("⛔ <b>REJECTED</b>\n\n{}: {}", symbol, reason));
    }

    pub fn notify_close(&self, trade: &ClosedTrade) {
        let emoji = if trade.is_winner() { "🟢" } else { "🔴" };
        self.notify(format!(
            "{} <b>CLOSED</b>\n\n\
            {} {} @ {} -> {}\n\
            Reason: {}\n\
            P&L: ${:.2} ({:+.2}%)",
            emoji,
            trade.direction,
            trade.symbol,
            trade.entry_price,
            trade.exit_price,
            trade.reason,
            trade.pnl,
            trade.pnl_pct,
        ));
    }

    pub fn notify_circuit_breaker(&self, drawdown_pct: Decimal) {
        self.notify(format!(
            "🚨 <b>CIRCUIT BREAKER</b>\n\n\
            Drawdown {:.2}% from peak equity.\n\
            New trade submission halted until manual reset.",
            drawdown_pct * Decimal::from(100u64),
        ));
    }

    pub fn notify_daily_limit(&self, daily_loss: Decimal) {
        self.notify(format!(
            "🛑 <b>DAILY LOSS LIMIT</b>\n\n\
            ${:.2} at risk today. No new trades until tomorrow.",
            daily_loss,
        ));
    }
}
