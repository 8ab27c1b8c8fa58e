use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Symbols monitored on every run in addition to current holdings.
    #[serde(default)]
    pub watchlist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Expected value of the `X-API-Key` header. Requests are refused with 500
    /// while this is unset.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a writer waits on a locked database before giving up.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_database_url() -> String {
    "sqlite://tradepilot.db?mode=rwc".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

const fn default_busy_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

/// Risk limits applied to every trade proposal.
///
/// Percentages are fractions of total equity (`0.20` = 20%).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_position_size_pct")]
    pub max_position_size_pct: Decimal,
    #[serde(default = "default_max_sector_exposure_pct")]
    pub max_sector_exposure_pct: Decimal,
    /// Maximum ATR as a fraction of price.
    #[serde(default = "default_max_volatility_pct")]
    pub max_volatility_pct: Decimal,
    #[serde(default = "default_risk_per_trade_pct")]
    pub risk_per_trade_pct: Decimal,
    #[serde(default = "default_stop_loss_atr_multiplier")]
    pub stop_loss_atr_multiplier: Decimal,
    /// Stop distance used when neither a proposal stop nor an ATR is available.
    #[serde(default = "default_fallback_stop_pct")]
    pub fallback_stop_pct: Decimal,
    /// Market snapshots older than this are refused.
    #[serde(default = "default_market_data_ttl_hours")]
    pub market_data_ttl_hours: i64,
}

fn default_max_position_size_pct() -> Decimal {
    Decimal::new(20, 2)
}

fn default_max_sector_exposure_pct() -> Decimal {
    Decimal::new(40, 2)
}

fn default_max_volatility_pct() -> Decimal {
    Decimal::new(10, 2)
}

fn default_risk_per_trade_pct() -> Decimal {
    Decimal::new(15, 3)
}

fn default_stop_loss_atr_multiplier() -> Decimal {
    Decimal::new(25, 1)
}

fn default_fallback_stop_pct() -> Decimal {
    Decimal::new(5, 2)
}

const fn default_market_data_ttl_hours() -> i64 {
    24
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size_pct: default_max_position_size_pct(),
            max_sector_exposure_pct: default_max_sector_exposure_pct(),
            max_volatility_pct: default_max_volatility_pct(),
            risk_per_trade_pct: default_risk_per_trade_pct(),
            stop_loss_atr_multiplier: default_stop_loss_atr_multiplier(),
            fallback_stop_pct: default_fallback_stop_pct(),
            market_data_ttl_hours: default_market_data_ttl_hours(),
        }
    }
}

impl RiskConfig {
    #[must_use]
    pub fn market_data_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.market_data_ttl_hours)
    }
}

/// Generative model access and the shared call pacing applied to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_enabled")]
    pub enabled: bool,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_min_call_interval_secs")]
    pub min_call_interval_secs: u64,
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

const fn default_ai_enabled() -> bool {
    true
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

const fn default_min_call_interval_secs() -> u64 {
    4
}

const fn default_retry_base_delay_secs() -> u64 {
    10
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: default_ai_enabled(),
            model: default_model(),
            api_base: default_api_base(),
            api_key: None,
            min_call_interval_secs: default_min_call_interval_secs(),
            retry_base_delay_secs: default_retry_base_delay_secs(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Time-of-day windows (local to `timezone`) and daemon cron expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_premarket_start")]
    pub premarket_start: String,
    #[serde(default = "default_market_start")]
    pub market_start: String,
    #[serde(default = "default_postmarket_start")]
    pub postmarket_start: String,
    #[serde(default = "default_closed_start")]
    pub closed_start: String,
    #[serde(default = "default_premarket_cron")]
    pub premarket_cron: String,
    #[serde(default = "default_market_cron")]
    pub market_cron: String,
    #[serde(default = "default_postmarket_cron")]
    pub postmarket_cron: String,
}

fn default_timezone() -> String {
    "America/Los_Angeles".to_string()
}

fn default_premarket_start() -> String {
    "06:00".to_string()
}

fn default_market_start() -> String {
    "06:30".to_string()
}

fn default_postmarket_start() -> String {
    "13:00".to_string()
}

fn default_closed_start() -> String {
    "14:00".to_string()
}

fn default_premarket_cron() -> String {
    "0 0 6 * * Mon-Fri".to_string()
}

fn default_market_cron() -> String {
    "0 0 7,10,12 * * Mon-Fri".to_string()
}

fn default_postmarket_cron() -> String {
    "0 15 13 * * Mon-Fri".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            premarket_start: default_premarket_start(),
            market_start: default_market_start(),
            postmarket_start: default_postmarket_start(),
            closed_start: default_closed_start(),
            premarket_cron: default_premarket_cron(),
            market_cron: default_market_cron(),
            postmarket_cron: default_postmarket_cron(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// JSON webhook receiving trade alerts and summaries.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_quiet_hours_start")]
    pub quiet_hours_start: String,
    #[serde(default = "default_quiet_hours_end")]
    pub quiet_hours_end: String,
    /// Stored notification content is truncated to this many characters.
    #[serde(default = "default_log_truncation")]
    pub log_truncation: usize,
}

fn default_quiet_hours_start() -> String {
    "21:00".to_string()
}

fn default_quiet_hours_end() -> String {
    "06:00".to_string()
}

const fn default_log_truncation() -> usize {
    500
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            quiet_hours_start: default_quiet_hours_start(),
            quiet_hours_end: default_quiet_hours_end(),
            log_truncation: default_log_truncation(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_min_age_days")]
    pub min_age_days: i64,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_top_n")]
    pub top_n: u32,
}

const fn default_min_age_days() -> i64 {
    3
}

const fn default_max_age_days() -> i64 {
    30
}

const fn default_top_n() -> u32 {
    20
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            min_age_days: default_min_age_days(),
            max_age_days: default_max_age_days(),
            top_n: default_top_n(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_risk_defaults() {
        let risk = RiskConfig::default();
        assert_eq!(risk.max_position_size_pct, dec!(0.20));
        assert_eq!(risk.max_sector_exposure_pct, dec!(0.40));
        assert_eq!(risk.max_volatility_pct, dec!(0.10));
        assert_eq!(risk.risk_per_trade_pct, dec!(0.015));
        assert_eq!(risk.stop_loss_atr_multiplier, dec!(2.5));
        assert_eq!(risk.market_data_ttl(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"server": {"port": 9000}, "watchlist": ["AAPL"]}"#).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.ai.min_call_interval_secs, 4);
        assert_eq!(config.ai.max_retries, 3);
        assert_eq!(config.watchlist, vec!["AAPL".to_string()]);
        assert_eq!(config.schedule.timezone, "America/Los_Angeles");
    }
}
