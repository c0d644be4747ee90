//! Engine configuration: TOML file with env-var overrides

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub detection: DetectionConfig,
    pub alerting: AlertingConfig,
    pub rules: RuleConfig,
    pub channels: ChannelConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Aggregate scores below this never reach the signal store
    pub signal_threshold: f64,
    pub whale_inflow_threshold: f64,
    pub concentrated_buys_threshold: f64,
    /// Evaluation window length in seconds
    pub window_secs: i64,
    /// How many wallet positions the context carries
    pub top_positions: i64,
    pub cadence_secs: u64,
    pub discovery_cadence_secs: u64,
    /// How far back discovery scans transactions for unknown tokens
    pub discovery_lookback_secs: i64,
    pub default_chain: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Only signals at or above this score fan out to users
    pub alert_score_threshold: f64,
    pub dedup_window_minutes: i64,
    /// PENDING alerts become sweep-eligible after this many seconds
    pub redelivery_delay_secs: i64,
    pub sweep_cadence_secs: u64,
    pub sweep_batch_size: i64,
}

/// Tunable thresholds and score bands for the scoring rules.
/// Band values are heuristic constants, not derived from any per-token baseline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Known exchange / venue addresses excluded from buyer counting
    pub exchange_addresses: Vec<String>,
    /// A buyer counts as concentrated above this fraction of the top buyer
    pub concentration_ratio: f64,
    /// Reference magnitude for average top-wallet inflow scaling
    pub inflow_reference: f64,
    /// How many top wallets the inflow rule averages over
    pub inflow_top_k: usize,
    /// Minimum received amount for a wallet to count as a new whale
    pub whale_amount: f64,
    /// Minimum net positive balance delta for the holding-pattern rule
    pub material_delta: f64,
    /// Minimum USD size for a swap to count as large
    pub large_swap_usd: f64,
    /// Reference magnitude for the liquidity-increase rule
    pub liquidity_reference: f64,
    /// Transaction-count bands for the volume-spike rule
    pub spike_tx_bands: [usize; 3],
    /// Window-volume bands for the volume-spike rule
    pub spike_volume_bands: [f64; 2],
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub telegram_bot_token: Option<String>,
    pub email_api_url: Option<String>,
    pub email_api_key: Option<String>,
    pub email_from: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/whalewatch.db".to_string(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            signal_threshold: 60.0,
            whale_inflow_threshold: 80.0,
            concentrated_buys_threshold: 70.0,
            window_secs: 3600,
            top_positions: 50,
            cadence_secs: 300,
            discovery_cadence_secs: 600,
            discovery_lookback_secs: 3600,
            default_chain: "ethereum".to_string(),
        }
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            alert_score_threshold: 75.0,
            dedup_window_minutes: 5,
            redelivery_delay_secs: 60,
            sweep_cadence_secs: 120,
            sweep_batch_size: 100,
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            exchange_addresses: Vec::new(),
            concentration_ratio: 0.10,
            inflow_reference: 50_000.0,
            inflow_top_k: 10,
            whale_amount: 100_000.0,
            material_delta: 10_000.0,
            large_swap_usd: 25_000.0,
            liquidity_reference: 250_000.0,
            spike_tx_bands: [20, 50, 150],
            spike_volume_bands: [500_000.0, 2_000_000.0],
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            email_api_url: None,
            email_api_key: None,
            email_from: "alerts@whalewatch.local".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` if it exists, falling back to defaults, then apply
    /// environment overrides on top.
    pub fn load(path: &str) -> Self {
        let mut config = match Self::load_from_file(path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Config file {} not usable ({}), using defaults", path, e);
                Self::default()
            }
        };
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_f64("SIGNAL_THRESHOLD") {
            self.detection.signal_threshold = v;
        }
        if let Some(v) = env_f64("WHALE_INFLOW_THRESHOLD") {
            self.detection.whale_inflow_threshold = v;
        }
        if let Some(v) = env_f64("CONCENTRATED_BUYS_THRESHOLD") {
            self.detection.concentrated_buys_threshold = v;
        }
        if let Some(v) = env_i64("ALERT_DEDUP_WINDOW_MINUTES") {
            self.alerting.dedup_window_minutes = v;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.channels.telegram_bot_token = Some(token);
        }
        if let Ok(url) = std::env::var("EMAIL_API_URL") {
            self.channels.email_api_url = Some(url);
        }
        if let Ok(key) = std::env::var("EMAIL_API_KEY") {
            self.channels.email_api_key = Some(key);
        }
    }
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_i64(name: &str) -> Option<i64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recognized_options() {
        let config = Config::default();
        assert_eq!(config.detection.signal_threshold, 60.0);
        assert_eq!(config.detection.whale_inflow_threshold, 80.0);
        assert_eq!(config.detection.concentrated_buys_threshold, 70.0);
        assert_eq!(config.alerting.dedup_window_minutes, 5);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [detection]
            whale_inflow_threshold = 85.0
            "#,
        )
        .unwrap();
        assert_eq!(config.detection.whale_inflow_threshold, 85.0);
        assert_eq!(config.detection.signal_threshold, 60.0);
        assert_eq!(config.alerting.alert_score_threshold, 75.0);
    }
}
