// Rolling oscillation history and its amplitude statistics
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use super::oscillation::Oscillation;

/// Percent-change label of second-half vs first-half mean amplitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmplitudeTrend {
    Unknown,
    Decreasing,
    Stable,
    Increasing,
    RapidlyIncreasing,
}

impl AmplitudeTrend {
    fn from_percent_change(percent: f64) -> Self {
        if percent > 15.0 {
            AmplitudeTrend::RapidlyIncreasing
        } else if percent > 5.0 {
            AmplitudeTrend::Increasing
        } else if percent < -5.0 {
            AmplitudeTrend::Decreasing
        } else {
            AmplitudeTrend::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendSnapshot {
    pub oscillation_count: usize,
    pub mean_amplitude: f64,
    pub max_amplitude: f64,
    /// pH per hour of retention window
    pub amplitude_slope: f64,
    pub amplitude_trend: AmplitudeTrend,
    pub last_oscillation: Option<Oscillation>,
}

impl TrendSnapshot {
    pub fn empty() -> Self {
        Self {
            oscillation_count: 0,
            mean_amplitude: 0.0,
            max_amplitude: 0.0,
            amplitude_slope: 0.0,
            amplitude_trend: AmplitudeTrend::Unknown,
            last_oscillation: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrendTracker {
    retention: Duration,
    history: VecDeque<Oscillation>,
}

impl TrendTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            history: VecDeque::new(),
        }
    }

    /// Append newly completed oscillations and drop those that left the window ending at `now`.
    pub fn update(&mut self, new_oscillations: impl IntoIterator<Item = Oscillation>, now: DateTime<Utc>) {
        self.history.extend(new_oscillations);

        if let Some(cutoff) = now.checked_sub_signed(self.retention) {
            while self.history.front().is_some_and(|o| o.crossing_time < cutoff) {
                self.history.pop_front();
            }
        }
    }

    pub fn history(&self) -> impl ExactSizeIterator<Item = &Oscillation> + '_ {
        self.history.iter()
    }

    pub fn snapshot(&self) -> TrendSnapshot {
        let count = self.history.len();
        if count == 0 {
            return TrendSnapshot::empty();
        }

        let amplitudes: Vec<f64> = self.history.iter().map(|o| o.amplitude).collect();
        let mean_amplitude = mean(&amplitudes);
        let max_amplitude = amplitudes.iter().copied().fold(f64::MIN, f64::max);

        let (amplitude_slope, amplitude_trend) = if count > 1 {
            let (first_half, second_half) = amplitudes.split_at(count / 2);
            let first_avg = mean(first_half);
            let second_avg = mean(second_half);

            let window_hours = self.retention.num_milliseconds() as f64 / 3_600_000.0;
            let slope = (second_avg - first_avg) / window_hours;

            let trend = if first_avg > 0.0 {
                AmplitudeTrend::from_percent_change((second_avg - first_avg) / first_avg * 100.0)
            } else {
                AmplitudeTrend::Unknown
            };
            (slope, trend)
        } else {
            (0.0, AmplitudeTrend::Unknown)
        };

        TrendSnapshot {
            oscillation_count: count,
            mean_amplitude,
            max_amplitude,
            amplitude_slope,
            amplitude_trend,
            last_oscillation: self.history.back().copied(),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::oscillation::Direction;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn oscillation(completed_hours: i64, amplitude: f64) -> Oscillation {
        let crossing_time = start() + Duration::hours(completed_hours);
        Oscillation {
            peak_time: crossing_time - Duration::minutes(90),
            peak_value: 8.2 + amplitude / 2.0,
            trough_time: crossing_time - Duration::minutes(30),
            trough_value: 8.2 - amplitude / 2.0,
            amplitude,
            started_at: crossing_time - Duration::hours(2),
            crossing_time,
            direction: Direction::Rising,
        }
    }

    #[test]
    fn test_empty_history() {
        let tracker = TrendTracker::new(Duration::hours(24));
        assert_eq!(tracker.snapshot(), TrendSnapshot::empty());
    }

    #[test]
    fn test_growing_amplitudes_give_positive_slope() {
        let mut tracker = TrendTracker::new(Duration::hours(24));
        let amplitudes = [0.1, 0.1, 0.2, 0.3, 0.4, 0.5];
        let spread = amplitudes
            .iter()
            .enumerate()
            .map(|(i, a)| oscillation(i as i64 * 4, *a));
        tracker.update(spread, start() + Duration::hours(20));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.oscillation_count, 6);
        assert!((snapshot.mean_amplitude - 0.2666).abs() < 1e-3);
        assert_eq!(snapshot.max_amplitude, 0.5);
        // (0.4 - 0.1333) / 24h
        assert!((snapshot.amplitude_slope - 0.011_111).abs() < 1e-5);
        assert_eq!(snapshot.amplitude_trend, AmplitudeTrend::RapidlyIncreasing);
        assert_eq!(snapshot.last_oscillation.map(|o| o.amplitude), Some(0.5));
    }

    #[test]
    fn test_odd_count_puts_extra_in_second_half() {
        let mut tracker = TrendTracker::new(Duration::hours(10));
        tracker.update(
            [oscillation(1, 0.2), oscillation(2, 0.2), oscillation(3, 0.2)],
            start() + Duration::hours(3),
        );
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.amplitude_slope, 0.0);
        assert_eq!(snapshot.amplitude_trend, AmplitudeTrend::Stable);

        tracker.update([oscillation(4, 0.1)], start() + Duration::hours(4));
        // [0.2, 0.2] vs [0.2, 0.1]
        let snapshot = tracker.snapshot();
        assert!((snapshot.amplitude_slope + 0.005).abs() < 1e-9);
        assert_eq!(snapshot.amplitude_trend, AmplitudeTrend::Decreasing);
    }

    #[test]
    fn test_single_oscillation_has_no_trend() {
        let mut tracker = TrendTracker::new(Duration::hours(24));
        tracker.update([oscillation(1, 0.3)], start() + Duration::hours(1));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.oscillation_count, 1);
        assert_eq!(snapshot.amplitude_slope, 0.0);
        assert_eq!(snapshot.amplitude_trend, AmplitudeTrend::Unknown);
    }

    #[test]
    fn test_window_reaching_before_representable_time_keeps_history() {
        let mut tracker = TrendTracker::new(Duration::hours(3_000_000_000));
        tracker.update([oscillation(1, 0.2), oscillation(2, 0.3)], start() + Duration::hours(2));
        assert_eq!(tracker.history().len(), 2);
    }

    #[test]
    fn test_evicts_by_completion_time() {
        let mut tracker = TrendTracker::new(Duration::hours(24));
        tracker.update(
            [oscillation(0, 0.9), oscillation(10, 0.2), oscillation(20, 0.2)],
            start() + Duration::hours(20),
        );
        assert_eq!(tracker.history().len(), 3);

        tracker.update(std::iter::empty(), start() + Duration::hours(25));
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.oscillation_count, 2);
        assert_eq!(snapshot.max_amplitude, 0.2);

        tracker.update(std::iter::empty(), start() + Duration::hours(48));
        assert_eq!(tracker.snapshot(), TrendSnapshot::empty());
    }
}
