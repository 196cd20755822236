// pH sample domain model and the rolling sample buffer
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

pub const PH_MIN: f64 = 0.0;
pub const PH_MAX: f64 = 14.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Why a reading was refused before reaching the buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum DropReason {
    NonFinite,
    OutOfRange { value: f64 },
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Returns the reason this sample cannot be a pH reading, if any.
    pub fn implausibility(&self) -> Option<DropReason> {
        if !self.value.is_finite() {
            Some(DropReason::NonFinite)
        } else if !(PH_MIN..=PH_MAX).contains(&self.value) {
            Some(DropReason::OutOfRange { value: self.value })
        } else {
            None
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SampleError {
    #[error("sample at {timestamp} is not after the latest buffered sample at {latest}")]
    OutOfOrder {
        timestamp: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
}

/// Time-ordered samples covering the retention window, evicted by age.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    retention: Duration,
    samples: VecDeque<Sample>,
}

impl SampleBuffer {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            samples: VecDeque::new(),
        }
    }

    pub fn append(&mut self, sample: Sample) -> Result<(), SampleError> {
        if let Some(latest) = self.latest() {
            if sample.timestamp <= latest.timestamp {
                return Err(SampleError::OutOfOrder {
                    timestamp: sample.timestamp,
                    latest: latest.timestamp,
                });
            }
        }

        self.samples.push_back(sample);

        if let Some(cutoff) = sample.timestamp.checked_sub_signed(self.retention) {
            while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
                self.samples.pop_front();
            }
        }

        Ok(())
    }

    pub fn as_sequence(&self) -> impl DoubleEndedIterator<Item = &Sample> + '_ {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
}
