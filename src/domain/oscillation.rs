// Oscillation detection around the pH setpoint
//
// The detector is a resumable streaming scan. A crossing is only registered
// once the signal leaves the dead band (setpoint +/- noise threshold) on the
// opposite side, an excursion is the run of samples between two crossings,
// and two consecutive excursions on opposite sides make one oscillation.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::analysis_config::AnalysisConfig;
use super::sample::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Rising,
    Falling,
}

impl From<Side> for Direction {
    /// Direction of a crossing into `side`
    fn from(side: Side) -> Self {
        match side {
            Side::Above => Direction::Rising,
            Side::Below => Direction::Falling,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Oscillation {
    pub peak_time: DateTime<Utc>,
    pub peak_value: f64,
    pub trough_time: DateTime<Utc>,
    pub trough_value: f64,
    pub amplitude: f64,
    /// Crossing that opened the first excursion of the cycle
    pub started_at: DateTime<Utc>,
    /// Crossing that closed the cycle
    pub crossing_time: DateTime<Utc>,
    pub direction: Direction,
}

impl Oscillation {
    fn from_excursions(first: &Excursion, second: &Excursion, crossing: &Sample) -> Self {
        let (peak, trough) = match first.side {
            Side::Above => (first.extremum, second.extremum),
            Side::Below => (second.extremum, first.extremum),
        };

        Self {
            peak_time: peak.timestamp,
            peak_value: peak.value,
            trough_time: trough.timestamp,
            trough_value: trough.value,
            amplitude: (peak.value - trough.value).abs(),
            started_at: first.started_at,
            crossing_time: crossing.timestamp,
            direction: Direction::from(first.side),
        }
    }

    pub fn duration(&self) -> Duration {
        self.crossing_time - self.started_at
    }
}

/// Signal between two setpoint crossings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Excursion {
    side: Side,
    started_at: DateTime<Utc>,
    extremum: Sample,
    ended_at: Option<DateTime<Utc>>,
}

impl Excursion {
    fn begin(side: Side, sample: &Sample) -> Self {
        Self {
            side,
            started_at: sample.timestamp,
            extremum: *sample,
            ended_at: None,
        }
    }

    fn observe(&mut self, sample: &Sample) {
        let further = match self.side {
            Side::Above => sample.value > self.extremum.value,
            Side::Below => sample.value < self.extremum.value,
        };
        if further {
            self.extremum = *sample;
        }
    }

    fn close(mut self, at: DateTime<Utc>) -> Self {
        self.ended_at = Some(at);
        self
    }

    fn duration(&self) -> Duration {
        self.ended_at.unwrap_or(self.started_at) - self.started_at
    }
}

/// Everything the detector needs to resume a scan where it stopped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorState {
    /// Timestamp of the last sample scanned
    cursor: Option<DateTime<Utc>>,
    side: Option<Side>,
    open: Option<Excursion>,
    /// Completed excursion waiting for its opposite half
    pending: Option<Excursion>,
}

impl DetectorState {
    /// True while a cycle has started but not yet completed
    pub fn has_partial_cycle(&self) -> bool {
        self.open.is_some() || self.pending.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct OscillationDetector {
    setpoint: f64,
    noise_threshold: f64,
    min_amplitude: f64,
    min_duration: Duration,
    retention: Duration,
    state: DetectorState,
}

impl OscillationDetector {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self::with_state(config, DetectorState::default())
    }

    pub fn with_state(config: &AnalysisConfig, state: DetectorState) -> Self {
        Self {
            setpoint: config.setpoint,
            noise_threshold: config.noise_threshold,
            min_amplitude: config.min_amplitude,
            min_duration: config.min_duration,
            retention: config.retention_window,
            state,
        }
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    /// Scan the samples newer than the cursor and return the cycles they complete.
    pub fn rescan<'a, I>(&mut self, samples: I) -> Vec<Oscillation>
    where
        I: IntoIterator<Item = &'a Sample>,
    {
        let mut found = Vec::new();

        for sample in samples {
            if self.state.cursor.is_some_and(|cursor| sample.timestamp <= cursor) {
                continue;
            }
            self.state.cursor = Some(sample.timestamp);

            if let Some(reason) = sample.implausibility() {
                tracing::warn!(
                    "Skipping implausible pH sample at {}: {:?}",
                    sample.timestamp,
                    reason
                );
                continue;
            }

            self.expire(sample.timestamp);
            if let Some(oscillation) = self.observe(sample) {
                found.push(oscillation);
            }
        }

        found
    }

    /// Forget half-cycles that started before the window ending at `now`.
    fn expire(&mut self, now: DateTime<Utc>) {
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            return;
        };

        if self.state.pending.is_some_and(|p| p.started_at < cutoff) {
            self.state.pending = None;
        }
        if let Some(open) = self.state.open.filter(|o| o.started_at < cutoff) {
            tracing::debug!(
                "Expiring {:?} excursion started at {}, outside the retention window",
                open.side,
                open.started_at
            );
            self.state.open = None;
        }
    }

    fn classify(&self, value: f64) -> Option<Side> {
        if value > self.setpoint + self.noise_threshold {
            Some(Side::Above)
        } else if value < self.setpoint - self.noise_threshold {
            Some(Side::Below)
        } else {
            None
        }
    }

    fn observe(&mut self, sample: &Sample) -> Option<Oscillation> {
        match (self.state.side, self.classify(sample.value)) {
            (Some(current), Some(observed)) if current != observed => {
                return self.cross(sample, observed);
            }
            (None, Some(observed)) => {
                // First confirmed side. Nothing crossed into it, so no excursion yet.
                self.state.side = Some(observed);
            }
            _ => {}
        }

        if let Some(open) = self.state.open.as_mut() {
            open.observe(sample);
        }
        None
    }

    fn cross(&mut self, sample: &Sample, into: Side) -> Option<Oscillation> {
        let mut completed_cycle = None;

        if let Some(open) = self.state.open.take() {
            let closed = open.close(sample.timestamp);

            if !self.is_significant(&closed) {
                tracing::debug!(
                    "Discarding insignificant {:?} excursion ending at {}",
                    closed.side,
                    sample.timestamp
                );
                self.state.pending = None;
            } else {
                match self.state.pending.take() {
                    Some(first) if first.side != closed.side => {
                        completed_cycle = Some(Oscillation::from_excursions(&first, &closed, sample));
                    }
                    _ => self.state.pending = Some(closed),
                }
            }
        }

        self.state.side = Some(into);
        self.state.open = Some(Excursion::begin(into, sample));
        completed_cycle
    }

    fn is_significant(&self, excursion: &Excursion) -> bool {
        (excursion.extremum.value - self.setpoint).abs() > self.min_amplitude
            && excursion.duration() >= self.min_duration
    }
}
