use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    /// Operators to dispatch for on every scheduler tick
    #[serde(default)]
    pub operators: Vec<String>,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// REST endpoint of the game API
    pub base_url: String,
    /// Session token sent as a bearer credential
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout() -> u64 {
    10_000
}

/// How the dispatch speed is chosen for each departure
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SpeedMode {
    /// Use the speed stored on the route assignment
    RouteDefault,
    /// Use a percentage of the vessel's maximum speed on the route
    PercentOfMax { pct: f64 },
}

impl Default for SpeedMode {
    fn default() -> Self {
        Self::RouteDefault
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Runs abort before touching any vessel when reserve fuel is below this (tons)
    #[serde(default = "default_min_fuel_threshold")]
    pub min_fuel_threshold_t: f64,
    /// Minimum fraction of capacity that must be fillable (e.g., 0.30 = 30%)
    #[serde(default = "default_min_utilization")]
    pub min_utilization: f64,
    /// Vessels processed between progress flushes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Fee above this percentage of income flags the departure as high-fee
    #[serde(default = "default_high_fee_pct")]
    pub high_fee_pct: f64,
    #[serde(default)]
    pub speed_mode: SpeedMode,
    /// Timeout applied to each departure transaction
    #[serde(default = "default_transaction_timeout")]
    pub transaction_timeout_ms: u64,
    /// Evaluate every vessel but never issue a departure
    #[serde(default)]
    pub dry_run: bool,
}

fn default_min_fuel_threshold() -> f64 {
    10.0
}

fn default_min_utilization() -> f64 {
    0.30
}

fn default_chunk_size() -> usize {
    20
}

fn default_high_fee_pct() -> f64 {
    25.0
}

fn default_transaction_timeout() -> u64 {
    15_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_fuel_threshold_t: default_min_fuel_threshold(),
            min_utilization: default_min_utilization(),
            chunk_size: default_chunk_size(),
            high_fee_pct: default_high_fee_pct(),
            speed_mode: SpeedMode::default(),
            transaction_timeout_ms: default_transaction_timeout(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Periodic dispatch is skipped entirely when disabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between timer-triggered passes
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    900
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Chat webhook receiving a summary of each completed run
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Buffered events per subscriber before lagging ones drop messages
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for a daily rotating log file; console only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("api.request_timeout_ms", 10_000)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("PORTPILOT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // PORTPILOT_API__BASE_URL, PORTPILOT_DISPATCH__CHUNK_SIZE, ...
            .add_source(
                Environment::with_prefix("PORTPILOT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.api.base_url.trim().is_empty() {
            errors.push("api.base_url must not be empty".to_string());
        }

        let dispatch = &self.dispatch;
        if dispatch.min_fuel_threshold_t < 0.0 {
            errors.push("dispatch.min_fuel_threshold_t must not be negative".to_string());
        }

        if !(0.0..=1.0).contains(&dispatch.min_utilization) {
            errors.push("dispatch.min_utilization must be between 0 and 1".to_string());
        }

        if dispatch.chunk_size == 0 {
            errors.push("dispatch.chunk_size must be at least 1".to_string());
        }

        if dispatch.high_fee_pct <= 0.0 {
            errors.push("dispatch.high_fee_pct must be positive".to_string());
        }

        if let SpeedMode::PercentOfMax { pct } = dispatch.speed_mode {
            if pct <= 0.0 || pct > 100.0 {
                errors.push(format!(
                    "dispatch.speed_mode pct must be in (0, 100], got {pct}"
                ));
            }
        }

        if self.scheduler.enabled && self.scheduler.interval_secs == 0 {
            errors.push("scheduler.interval_secs must be positive".to_string());
        }

        if self.notify.event_capacity == 0 {
            errors.push("notify.event_capacity must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
