use std::time::Duration;

use crate::capture::waiter::WaitConfig;

pub const DEFAULT_MARKER: &str = "/api/liqMap/getLiqHeatMap";

#[derive(Clone, Debug)]
pub struct Config {
    pub api_base: String,
    pub page_base: String,
    pub exchange: String,
    pub symbol: String,
    pub interval: String,
    pub marker: String,
    pub api_key: Option<String>,
    pub settle_ms: u64,
    pub deadline_ms: u64,
    pub poll_ms: u64,
    /// Time to keep the page open after a capture, for manual inspection
    pub stay_ms: u64,
    pub lenient: bool,
    pub headless: bool,
    pub chrome_path: String,
    pub chrome_debug_port: u16,
    pub chrome_ws_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            api_base: std::env::var("LIQMAP_API_BASE").unwrap_or_else(|_| "https://api.coinank.com".to_string()),
            page_base: std::env::var("LIQMAP_PAGE_BASE").unwrap_or_else(|_| "https://coinank.com".to_string()),
            exchange: std::env::var("LIQMAP_EXCHANGE").unwrap_or_else(|_| "Binance".to_string()),
            symbol: std::env::var("LIQMAP_SYMBOL").unwrap_or_else(|_| "BTCUSDT".to_string()),
            interval: std::env::var("LIQMAP_INTERVAL").unwrap_or_else(|_| "3d".to_string()),
            marker: std::env::var("LIQMAP_MARKER").unwrap_or_else(|_| DEFAULT_MARKER.to_string()),
            api_key: std::env::var("LIQMAP_APIKEY").ok().filter(|v| !v.is_empty()),
            settle_ms: std::env::var("LIQMAP_SETTLE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(5_000),
            deadline_ms: std::env::var("LIQMAP_DEADLINE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(30_000),
            poll_ms: std::env::var("LIQMAP_POLL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(250),
            stay_ms: std::env::var("LIQMAP_STAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(0),
            lenient: std::env::var("LIQMAP_LENIENT").map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(false),
            headless: std::env::var("LIQMAP_HEADLESS").map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(false),
            chrome_path: std::env::var("CHROME_PATH").unwrap_or_else(|_| "google-chrome".to_string()),
            chrome_debug_port: std::env::var("CHROME_DEBUG_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(9222),
            chrome_ws_url: std::env::var("CHROME_WS_URL").ok().filter(|v| !v.is_empty()),
        }
    }

    pub fn wait_config(&self) -> WaitConfig {
        WaitConfig {
            settle: Duration::from_millis(self.settle_ms),
            deadline: Duration::from_millis(self.deadline_ms),
            poll_interval: Duration::from_millis(self.poll_ms.max(1)),
        }
    }

    /// Chart page whose own scripts request the heatmap endpoint.
    pub fn page_url(&self) -> String {
        format!(
            "{}/liqHeatMapChart/{}/{}",
            self.page_base.trim_end_matches('/'),
            self.symbol.to_lowercase(),
            self.interval
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url_lowercases_symbol() {
        let mut cfg = Config::from_env();
        cfg.page_base = "https://coinank.com/".to_string();
        cfg.symbol = "SUIUSDT".to_string();
        cfg.interval = "1d".to_string();
        assert_eq!(cfg.page_url(), "https://coinank.com/liqHeatMapChart/suiusdt/1d");
    }

    #[test]
    fn test_wait_config_never_zero_interval() {
        let mut cfg = Config::from_env();
        cfg.poll_ms = 0;
        assert_eq!(cfg.wait_config().poll_interval, Duration::from_millis(1));
    }
}
