// Validated analysis parameters shared by the detector, tracker and classifier
use chrono::Duration;
use thiserror::Error;

use super::sample::{PH_MAX, PH_MIN};

/// Longest supported retention window
pub const MAX_RETENTION_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Target pH the controller regulates around
    pub setpoint: f64,
    /// Half-width of the dead band around the setpoint (pH)
    pub noise_threshold: f64,
    pub retention_window: Duration,
    /// Oscillations per window at or above which alkalinity is reported low
    pub high_frequency_threshold: usize,
    /// Amplitude slope (pH per hour) at or above which alkalinity is decreasing
    pub growth_threshold: f64,
    /// Peak-to-trough amplitude at or above which alkalinity is reported low
    pub critical_amplitude_threshold: f64,
    /// Minimum distance of an excursion's extremum from the setpoint
    pub min_amplitude: f64,
    /// Minimum time between the crossings that bound an excursion
    pub min_duration: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            setpoint: 8.2,
            noise_threshold: 0.02,
            retention_window: Duration::hours(24),
            high_frequency_threshold: 24,
            growth_threshold: 0.005,
            critical_amplitude_threshold: 0.5,
            min_amplitude: 0.0,
            min_duration: Duration::zero(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("setpoint {0} is outside the pH scale")]
    SetpointOutOfRange(f64),
    #[error("{field} must be a finite, non-negative number (got {value})")]
    InvalidThreshold { field: &'static str, value: f64 },
    #[error("{field} must be positive (got {value})")]
    NonPositive { field: &'static str, value: f64 },
    #[error("retention window must be positive (got {0})")]
    NonPositiveRetention(Duration),
    #[error("retention window must not exceed {max} days (got {0})", max = MAX_RETENTION_DAYS)]
    RetentionTooLong(Duration),
    #[error("minimum excursion duration must not be negative (got {0})")]
    NegativeDuration(Duration),
    #[error("minimum excursion duration {0} is longer than the retention window")]
    DurationExceedsRetention(Duration),
    #[error("{field} = {value} is not a representable duration")]
    DurationOverflow { field: &'static str, value: i64 },
    #[error("high frequency threshold must be at least 1")]
    ZeroFrequencyThreshold,
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.setpoint.is_finite() || !(PH_MIN..=PH_MAX).contains(&self.setpoint) {
            return Err(ConfigError::SetpointOutOfRange(self.setpoint));
        }

        for (field, value) in [
            ("noise_threshold", self.noise_threshold),
            ("growth_threshold", self.growth_threshold),
            ("min_amplitude", self.min_amplitude),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold { field, value });
            }
        }

        if !self.critical_amplitude_threshold.is_finite() || self.critical_amplitude_threshold <= 0.0
        {
            return Err(ConfigError::NonPositive {
                field: "critical_amplitude_threshold",
                value: self.critical_amplitude_threshold,
            });
        }

        if self.retention_window <= Duration::zero() {
            return Err(ConfigError::NonPositiveRetention(self.retention_window));
        }
        if self.retention_window > Duration::days(MAX_RETENTION_DAYS) {
            return Err(ConfigError::RetentionTooLong(self.retention_window));
        }
        if self.min_duration < Duration::zero() {
            return Err(ConfigError::NegativeDuration(self.min_duration));
        }
        if self.min_duration > self.retention_window {
            return Err(ConfigError::DurationExceedsRetention(self.min_duration));
        }
        if self.high_frequency_threshold == 0 {
            return Err(ConfigError::ZeroFrequencyThreshold);
        }

        Ok(())
    }
}
