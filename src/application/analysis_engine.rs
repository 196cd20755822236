// Analysis engine - Wires buffer, detector, tracker and classifier together
use crate::domain::alkalinity::{AlkalinityClassifier, AlkalinityStatus, SignalActivity};
use crate::domain::analysis_config::{AnalysisConfig, ConfigError};
use crate::domain::deviation::PhDeviation;
use crate::domain::oscillation::{DetectorState, Oscillation, OscillationDetector};
use crate::domain::sample::{DropReason, Sample, SampleBuffer, SampleError};
use crate::domain::trend::{AmplitudeTrend, TrendTracker};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub const CHECKPOINT_VERSION: u32 = 2;

/// Immutable view of the engine after the last completed ingest
#[derive(Debug, Clone, PartialEq)]
pub struct EngineState {
    pub status: AlkalinityStatus,
    pub trend_score: f64,
    pub oscillation_count_24h: usize,
    pub mean_amplitude: f64,
    pub max_amplitude: f64,
    pub activity: SignalActivity,
    pub amplitude_trend: AmplitudeTrend,
    pub last_oscillation: Option<Oscillation>,
    pub current_ph: Option<f64>,
    pub setpoint: f64,
    pub deviation: PhDeviation,
    pub sample_count: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    Accepted { new_oscillations: usize },
    Dropped(DropReason),
}

/// Everything needed to resume the rolling window after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCheckpoint {
    pub version: u32,
    /// Dead band the detector state was built under
    pub setpoint: f64,
    pub noise_threshold: f64,
    pub samples: Vec<Sample>,
    pub detector: DetectorState,
    pub oscillations: Vec<Oscillation>,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("unsupported checkpoint version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("checkpoint samples are not strictly ordered: {0}")]
    Unordered(#[from] SampleError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub struct AnalysisEngine {
    config: AnalysisConfig,
    buffer: SampleBuffer,
    detector: OscillationDetector,
    tracker: TrendTracker,
    classifier: AlkalinityClassifier,
    state: Arc<EngineState>,
    dropped_samples: u64,
}

impl AnalysisEngine {
    pub fn new(config: AnalysisConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut engine = Self {
            buffer: SampleBuffer::new(config.retention_window),
            detector: OscillationDetector::new(&config),
            tracker: TrendTracker::new(config.retention_window),
            classifier: AlkalinityClassifier::new(&config),
            state: Arc::new(Self::cold_state(&config)),
            dropped_samples: 0,
            config,
        };
        engine.publish();
        Ok(engine)
    }

    /// Rebuild an engine from a checkpoint, re-applying the current retention window.
    ///
    /// When the dead band changed since the checkpoint was taken, the detector state
    /// and oscillation history are discarded and re-detected from the buffered samples.
    pub fn restore(config: AnalysisConfig, checkpoint: EngineCheckpoint) -> Result<Self, CheckpointError> {
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: checkpoint.version,
                expected: CHECKPOINT_VERSION,
            });
        }

        let mut engine = Self::new(config)?;
        for sample in checkpoint.samples {
            engine.buffer.append(sample)?;
        }

        let same_band = checkpoint.setpoint == engine.config.setpoint
            && checkpoint.noise_threshold == engine.config.noise_threshold;
        let oscillations = if same_band {
            engine.detector = OscillationDetector::with_state(&engine.config, checkpoint.detector);
            checkpoint.oscillations
        } else {
            tracing::warn!(
                "Dead band changed from {} +/- {} to {} +/- {}, re-detecting oscillations from {} buffered samples",
                checkpoint.setpoint,
                checkpoint.noise_threshold,
                engine.config.setpoint,
                engine.config.noise_threshold,
                engine.buffer.len()
            );
            engine.detector.rescan(engine.buffer.as_sequence())
        };
        if let Some(now) = engine.latest_timestamp() {
            engine.tracker.update(oscillations, now);
        }
        engine.publish();

        tracing::info!(
            "Restored analysis state: {} samples, {} oscillations, partial cycle: {}",
            engine.buffer.len(),
            engine.state.oscillation_count_24h,
            engine.detector.state().has_partial_cycle()
        );
        Ok(engine)
    }

    pub fn ingest(&mut self, sample: Sample) -> Result<IngestOutcome, SampleError> {
        if let Some(reason) = sample.implausibility() {
            self.dropped_samples += 1;
            tracing::warn!("Dropping pH reading at {}: {:?}", sample.timestamp, reason);
            return Ok(IngestOutcome::Dropped(reason));
        }

        self.buffer.append(sample)?;

        let found = self.detector.rescan(self.buffer.as_sequence());
        let new_oscillations = found.len();
        for oscillation in &found {
            tracing::debug!(
                "Oscillation completed at {} after {} min: peak {:.2} trough {:.2} amplitude {:.3}",
                oscillation.crossing_time,
                oscillation.duration().num_minutes(),
                oscillation.peak_value,
                oscillation.trough_value,
                oscillation.amplitude
            );
        }
        self.tracker.update(found, sample.timestamp);

        let previous = self.state.status;
        self.publish();
        if self.state.status != previous {
            tracing::info!(
                "Alkalinity status changed from {:?} to {:?} (trend score {:.4})",
                previous,
                self.state.status,
                self.state.trend_score
            );
        }

        Ok(IngestOutcome::Accepted { new_oscillations })
    }

    pub fn current_state(&self) -> Arc<EngineState> {
        Arc::clone(&self.state)
    }

    pub fn checkpoint(&self) -> EngineCheckpoint {
        EngineCheckpoint {
            version: CHECKPOINT_VERSION,
            setpoint: self.config.setpoint,
            noise_threshold: self.config.noise_threshold,
            samples: self.buffer.as_sequence().copied().collect(),
            detector: self.detector.state().clone(),
            oscillations: self.tracker.history().copied().collect(),
        }
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.buffer.latest().map(|s| s.timestamp)
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn cold_state(config: &AnalysisConfig) -> EngineState {
        EngineState {
            status: AlkalinityStatus::Normal,
            trend_score: 0.0,
            oscillation_count_24h: 0,
            mean_amplitude: 0.0,
            max_amplitude: 0.0,
            activity: SignalActivity::Idle,
            amplitude_trend: AmplitudeTrend::Unknown,
            last_oscillation: None,
            current_ph: None,
            setpoint: config.setpoint,
            deviation: PhDeviation::default(),
            sample_count: 0,
            updated_at: None,
        }
    }

    fn publish(&mut self) {
        let snapshot = self.tracker.snapshot();
        let assessment = self.classifier.evaluate(&snapshot);
        let latest = self.buffer.latest().copied();
        let current_ph = latest.map(|s| s.value);

        self.state = Arc::new(EngineState {
            status: assessment.status,
            trend_score: assessment.trend_score,
            oscillation_count_24h: snapshot.oscillation_count,
            mean_amplitude: snapshot.mean_amplitude,
            max_amplitude: snapshot.max_amplitude,
            activity: assessment.activity,
            amplitude_trend: snapshot.amplitude_trend,
            last_oscillation: snapshot.last_oscillation,
            current_ph,
            setpoint: self.config.setpoint,
            deviation: PhDeviation::evaluate(current_ph, self.config.setpoint, self.config.noise_threshold),
            sample_count: self.buffer.len(),
            updated_at: latest.map(|s| s.timestamp),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::f64::consts::PI;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    /// Five-minute samples of a sine around 8.2 whose peak-to-peak amplitude
    /// is given as a function of elapsed minutes.
    fn wave(total_minutes: i64, period_minutes: f64, amplitude: impl Fn(f64) -> f64) -> Vec<Sample> {
        (0..=total_minutes / 5)
            .map(|i| {
                let minutes = (i * 5) as f64;
                let phase = 2.0 * PI * minutes / period_minutes;
                Sample::new(
                    start() + Duration::minutes(i * 5),
                    8.2 + amplitude(minutes) / 2.0 * phase.sin(),
                )
            })
            .collect()
    }

    fn run(config: AnalysisConfig, samples: &[Sample]) -> AnalysisEngine {
        let mut engine = AnalysisEngine::new(config).unwrap();
        for sample in samples {
            engine.ingest(*sample).unwrap();
        }
        engine
    }

    #[test]
    fn test_cold_start_is_normal_with_zero_score() {
        let engine = AnalysisEngine::new(AnalysisConfig::default()).unwrap();
        let state = engine.current_state();
        assert_eq!(state.status, AlkalinityStatus::Normal);
        assert_eq!(state.activity, SignalActivity::Idle);
        assert_eq!(state.trend_score, 0.0);
        assert_eq!(state.current_ph, None);
        assert_eq!(state.updated_at, None);
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let config = AnalysisConfig {
            retention_window: Duration::hours(-1),
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            AnalysisEngine::new(config),
            Err(ConfigError::NonPositiveRetention(_))
        ));
    }

    #[test]
    fn test_monotonic_signal_stays_idle() {
        let drift: Vec<Sample> = (0..200)
            .map(|i| Sample::new(start() + Duration::minutes(i * 7), 7.6 + i as f64 * 0.002))
            .collect();
        let engine = run(AnalysisConfig::default(), &drift);

        let state = engine.current_state();
        assert_eq!(state.oscillation_count_24h, 0);
        assert_eq!(state.status, AlkalinityStatus::Normal);
        assert_eq!(state.activity, SignalActivity::Idle);
        assert_eq!(state.trend_score, 0.0);
        assert_eq!(state.deviation, PhDeviation { high: false, low: true });
    }

    #[test]
    fn test_widening_oscillation_reports_decreasing() {
        let samples = wave(24 * 60, 120.0, |minutes| 0.1 + 0.35 * minutes / 1440.0);
        let engine = run(AnalysisConfig::default(), &samples);

        let state = engine.current_state();
        assert_eq!(state.activity, SignalActivity::Oscillating);
        assert!(state.max_amplitude < 0.5);
        assert!(state.trend_score >= 0.005, "trend score {}", state.trend_score);
        assert_eq!(state.status, AlkalinityStatus::Decreasing);
        assert_eq!(state.amplitude_trend, AmplitudeTrend::RapidlyIncreasing);
    }

    #[test]
    fn test_frequency_threshold_boundary_is_inclusive() {
        let samples = wave(24 * 60, 120.0, |_| 0.3);
        let count = run(AnalysisConfig::default(), &samples)
            .current_state()
            .oscillation_count_24h;
        assert!(count > 0);

        let at_boundary = AnalysisConfig {
            high_frequency_threshold: count,
            ..AnalysisConfig::default()
        };
        assert_eq!(run(at_boundary, &samples).current_state().status, AlkalinityStatus::Low);

        let above = AnalysisConfig {
            high_frequency_threshold: count + 1,
            ..AnalysisConfig::default()
        };
        assert_eq!(run(above, &samples).current_state().status, AlkalinityStatus::Normal);
    }

    #[test]
    fn test_current_state_is_idempotent() {
        let engine = run(AnalysisConfig::default(), &wave(6 * 60, 60.0, |_| 0.3));
        let first = engine.current_state();
        let second = engine.current_state();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_rejected_samples_leave_state_untouched() {
        let mut engine = run(AnalysisConfig::default(), &wave(60, 30.0, |_| 0.3));
        let before = engine.current_state();
        let latest = engine.latest_timestamp().unwrap();

        let err = engine.ingest(Sample::new(latest, 8.0)).unwrap_err();
        assert!(matches!(err, SampleError::OutOfOrder { .. }));

        let outcome = engine
            .ingest(Sample::new(latest + Duration::minutes(5), 15.2))
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Dropped(DropReason::OutOfRange { value: 15.2 }));
        assert_eq!(engine.dropped_samples(), 1);
        assert!(Arc::ptr_eq(&before, &engine.current_state()));
    }

    #[test]
    fn test_long_gap_expires_history() {
        let samples = wave(12 * 60, 60.0, |_| 0.3);
        let mut engine = run(AnalysisConfig::default(), &samples);
        assert!(engine.current_state().oscillation_count_24h > 0);

        let later = engine.latest_timestamp().unwrap() + Duration::hours(30);
        engine.ingest(Sample::new(later, 8.2)).unwrap();

        let state = engine.current_state();
        assert_eq!(state.oscillation_count_24h, 0);
        assert_eq!(state.activity, SignalActivity::Idle);
        assert_eq!(state.sample_count, 1);
    }

    #[test]
    fn test_gap_straddling_a_half_cycle_does_not_complete_it() {
        let at = |hours: i64, value: f64| Sample::new(start() + Duration::hours(hours), value);
        let engine = run(
            AnalysisConfig::default(),
            &[at(0, 8.0), at(1, 8.9), at(2, 7.9), at(42, 8.5)],
        );

        let state = engine.current_state();
        assert_eq!(state.sample_count, 1);
        assert_eq!(state.oscillation_count_24h, 0);
        assert_eq!(state.last_oscillation, None);
        assert_eq!(state.max_amplitude, 0.0);
        assert_eq!(state.status, AlkalinityStatus::Normal);
        assert_eq!(state.activity, SignalActivity::Idle);
    }

    #[test]
    fn test_oversized_window_is_rejected_at_construction() {
        let config = AnalysisConfig {
            retention_window: Duration::hours(3_000_000_000),
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            AnalysisEngine::new(config),
            Err(ConfigError::RetentionTooLong(_))
        ));
    }

    #[test]
    fn test_restore_with_changed_dead_band_redetects_from_samples() {
        let samples = wave(6 * 60, 60.0, |_| 0.3);
        let before_restart = run(AnalysisConfig::default(), &samples);
        assert!(before_restart.current_state().oscillation_count_24h > 0);

        let moved = AnalysisConfig {
            setpoint: 8.25,
            noise_threshold: 0.05,
            ..AnalysisConfig::default()
        };
        let resumed = AnalysisEngine::restore(moved.clone(), before_restart.checkpoint()).unwrap();
        let fresh = run(moved, &samples);

        assert_eq!(resumed.current_state(), fresh.current_state());
        assert_eq!(resumed.checkpoint(), fresh.checkpoint());
        assert_eq!(resumed.checkpoint().setpoint, 8.25);
    }

    #[test]
    fn test_restore_resumes_like_uninterrupted_run() {
        let samples = wave(30 * 60, 100.0, |minutes| 0.15 + 0.2 * minutes / 1800.0);
        let config = AnalysisConfig::default();
        let uninterrupted = run(config.clone(), &samples);

        for split in [37, 150, 301] {
            let (head, tail) = samples.split_at(split);
            let before_restart = run(config.clone(), head);

            let json = serde_json::to_string(&before_restart.checkpoint()).unwrap();
            let checkpoint: EngineCheckpoint = serde_json::from_str(&json).unwrap();
            assert_eq!(checkpoint, before_restart.checkpoint());

            let mut resumed = AnalysisEngine::restore(config.clone(), checkpoint).unwrap();
            assert_eq!(resumed.current_state(), before_restart.current_state());
            for sample in tail {
                resumed.ingest(*sample).unwrap();
            }

            assert_eq!(resumed.current_state(), uninterrupted.current_state());
            assert_eq!(resumed.checkpoint(), uninterrupted.checkpoint());
        }
    }

    #[test]
    fn test_restore_rejects_unknown_version() {
        let mut checkpoint = AnalysisEngine::new(AnalysisConfig::default()).unwrap().checkpoint();
        checkpoint.version = 99;

        let err = AnalysisEngine::restore(AnalysisConfig::default(), checkpoint).err().unwrap();
        assert!(matches!(
            err,
            CheckpointError::UnsupportedVersion { found: 99, expected: CHECKPOINT_VERSION }
        ));
    }
}
