use crate::domain::analysis_config::{AnalysisConfig, ConfigError};
use chrono::Duration;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub influx: Option<InfluxSettings>,
    #[serde(default)]
    pub service: ServiceSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisSettings {
    pub setpoint: f64,
    pub noise_threshold: f64,
    pub retention_hours: i64,
    pub high_frequency_threshold: usize,
    pub growth_threshold: f64,
    pub critical_amplitude_threshold: f64,
    pub min_amplitude: f64,
    pub min_duration_secs: i64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        let defaults = AnalysisConfig::default();
        Self {
            setpoint: defaults.setpoint,
            noise_threshold: defaults.noise_threshold,
            retention_hours: defaults.retention_window.num_hours(),
            high_frequency_threshold: defaults.high_frequency_threshold,
            growth_threshold: defaults.growth_threshold,
            critical_amplitude_threshold: defaults.critical_amplitude_threshold,
            min_amplitude: defaults.min_amplitude,
            min_duration_secs: defaults.min_duration.num_seconds(),
        }
    }
}

impl AnalysisSettings {
    /// Only checks that the durations are representable; the engine validates the rest.
    pub fn to_analysis_config(&self) -> Result<AnalysisConfig, ConfigError> {
        let retention_window =
            Duration::try_hours(self.retention_hours).ok_or(ConfigError::DurationOverflow {
                field: "retention_hours",
                value: self.retention_hours,
            })?;
        let min_duration =
            Duration::try_seconds(self.min_duration_secs).ok_or(ConfigError::DurationOverflow {
                field: "min_duration_secs",
                value: self.min_duration_secs,
            })?;

        Ok(AnalysisConfig {
            setpoint: self.setpoint,
            noise_threshold: self.noise_threshold,
            retention_window,
            high_frequency_threshold: self.high_frequency_threshold,
            growth_threshold: self.growth_threshold,
            critical_amplitude_threshold: self.critical_amplitude_threshold,
            min_amplitude: self.min_amplitude,
            min_duration,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InfluxSettings {
    pub host: String,
    pub token: String,
    pub database: String,
    pub retention_policy: String,
    /// Value substituted for `${source}` in the queries
    pub source: String,
    #[serde(default = "default_latest_query")]
    pub latest_query: String,
    #[serde(default = "default_history_query")]
    pub history_query: String,
}

fn default_latest_query() -> String {
    "SELECT last(value) AS value FROM apex_probe WHERE host = '${source}' AND \"probe_type\"='pH'"
        .to_string()
}

fn default_history_query() -> String {
    "SELECT value FROM apex_probe WHERE host = '${source}' AND \"probe_type\"='pH' AND time >= now() - ${hours}h ORDER BY time ASC"
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceSettings {
    pub listen_addr: String,
    pub poll_interval_secs: u64,
    pub checkpoint_path: String,
    pub checkpoint_interval_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            poll_interval_secs: 300,
            checkpoint_path: "state/ph_monitor.json".to_string(),
            checkpoint_interval_secs: 900,
        }
    }
}

impl ServiceSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("service.poll_interval_secs must be positive");
        }
        if self.checkpoint_interval_secs == 0 {
            anyhow::bail!("service.checkpoint_interval_secs must be positive");
        }
        Ok(())
    }
}

/// Load `config/ph_monitor.toml` with `PH_MONITOR__SECTION__KEY` environment overrides
pub fn load_app_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/ph_monitor").required(false))
        .add_source(
            config::Environment::with_prefix("PH_MONITOR")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = settings.try_deserialize()?;
    app_config.service.validate()?;
    Ok(app_config)
}

/// Replace template variables in a query string
pub fn prepare_query(query: &str, vars: &HashMap<String, String>) -> String {
    let mut result = query.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}
