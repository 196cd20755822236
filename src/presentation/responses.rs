// Mapper from engine snapshots to the JSON bodies served over HTTP
use crate::application::analysis_engine::{EngineState, IngestOutcome};
use crate::domain::alkalinity::{AlkalinityStatus, SignalActivity};
use crate::domain::sample::DropReason;
use crate::domain::trend::AmplitudeTrend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub status: AlkalinityStatus,
    pub trend_score: f64,
    pub oscillation_count_24h: usize,
    pub mean_amplitude: f64,
    pub max_amplitude: f64,
    pub last_amplitude: f64,
    pub last_peak: Option<DateTime<Utc>>,
    pub last_trough: Option<DateTime<Utc>>,
    pub amplitude_trend: AmplitudeTrend,
    pub activity: SignalActivity,
    pub current_ph: Option<f64>,
    pub setpoint: f64,
    pub sample_count: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct FlagsResponse {
    pub high_ph: bool,
    pub low_ph: bool,
    pub current_ph: Option<f64>,
    pub setpoint: f64,
}

#[derive(Debug, Deserialize)]
pub struct ReadingRequest {
    pub value: f64,
    /// Defaults to the time the request is received
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ReadingResponse {
    pub accepted: bool,
    pub new_oscillations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped: Option<DropReason>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn round(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

impl From<&EngineState> for StateResponse {
    fn from(state: &EngineState) -> Self {
        let last = state.last_oscillation.as_ref();
        Self {
            status: state.status,
            trend_score: round(state.trend_score, 4),
            oscillation_count_24h: state.oscillation_count_24h,
            mean_amplitude: round(state.mean_amplitude, 2),
            max_amplitude: round(state.max_amplitude, 2),
            last_amplitude: last.map(|o| round(o.amplitude, 2)).unwrap_or(0.0),
            last_peak: last.map(|o| o.peak_time),
            last_trough: last.map(|o| o.trough_time),
            amplitude_trend: state.amplitude_trend,
            activity: state.activity,
            current_ph: state.current_ph,
            setpoint: state.setpoint,
            sample_count: state.sample_count,
            updated_at: state.updated_at,
        }
    }
}

impl From<&EngineState> for FlagsResponse {
    fn from(state: &EngineState) -> Self {
        Self {
            high_ph: state.deviation.high,
            low_ph: state.deviation.low,
            current_ph: state.current_ph,
            setpoint: state.setpoint,
        }
    }
}

impl From<IngestOutcome> for ReadingResponse {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Accepted { new_oscillations } => Self {
                accepted: true,
                new_oscillations,
                dropped: None,
            },
            IngestOutcome::Dropped(reason) => Self {
                accepted: false,
                new_oscillations: 0,
                dropped: Some(reason),
            },
        }
    }
}
