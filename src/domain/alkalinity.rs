// Alkalinity status derived from oscillation trend statistics
use serde::Serialize;

use super::analysis_config::AnalysisConfig;
use super::trend::TrendSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlkalinityStatus {
    Normal,
    Decreasing,
    Low,
}

/// Whether the window holds any oscillation at all.
///
/// A quiet window is reported as `Idle` so that "no oscillation" is never
/// confused with "normal, low-amplitude oscillation".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalActivity {
    Idle,
    Oscillating,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlkalinityAssessment {
    pub status: AlkalinityStatus,
    pub trend_score: f64,
    pub activity: SignalActivity,
}

impl AlkalinityAssessment {
    /// Cold-start and quiet-window result
    pub fn idle() -> Self {
        Self {
            status: AlkalinityStatus::Normal,
            trend_score: 0.0,
            activity: SignalActivity::Idle,
        }
    }
}

/// Stateless threshold classifier; every evaluation starts fresh.
#[derive(Debug, Clone)]
pub struct AlkalinityClassifier {
    high_frequency_threshold: usize,
    growth_threshold: f64,
    critical_amplitude_threshold: f64,
}

impl AlkalinityClassifier {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            high_frequency_threshold: config.high_frequency_threshold,
            growth_threshold: config.growth_threshold,
            critical_amplitude_threshold: config.critical_amplitude_threshold,
        }
    }

    pub fn evaluate(&self, snapshot: &TrendSnapshot) -> AlkalinityAssessment {
        if snapshot.oscillation_count == 0 {
            return AlkalinityAssessment::idle();
        }

        let exhausted = snapshot.oscillation_count >= self.high_frequency_threshold
            || snapshot.max_amplitude >= self.critical_amplitude_threshold;
        let widening = snapshot.amplitude_slope >= self.growth_threshold;

        let status = if exhausted {
            AlkalinityStatus::Low
        } else if widening {
            AlkalinityStatus::Decreasing
        } else {
            AlkalinityStatus::Normal
        };

        AlkalinityAssessment {
            status,
            trend_score: snapshot.amplitude_slope,
            activity: SignalActivity::Oscillating,
        }
    }
}
