// Monitor service - Drives the analysis engine from polled and pushed readings
use crate::application::analysis_engine::{AnalysisEngine, EngineState, IngestOutcome};
use crate::application::checkpoint_store::CheckpointStore;
use crate::application::reading_source::ReadingSource;
use crate::domain::analysis_config::AnalysisConfig;
use crate::domain::sample::{Sample, SampleError};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

#[derive(Clone)]
pub struct MonitorService {
    engine: Arc<Mutex<AnalysisEngine>>,
    snapshots: Arc<watch::Sender<Arc<EngineState>>>,
    source: Option<Arc<dyn ReadingSource>>,
    store: Arc<dyn CheckpointStore>,
}

impl MonitorService {
    pub fn new(
        engine: AnalysisEngine,
        source: Option<Arc<dyn ReadingSource>>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let (snapshots, _) = watch::channel(engine.current_state());
        Self {
            engine: Arc::new(Mutex::new(engine)),
            snapshots: Arc::new(snapshots),
            source,
            store,
        }
    }

    /// Build the service from the last checkpoint, or from scratch when there is
    /// none or it cannot be used. Configuration errors are fatal.
    pub async fn restore_or_new(
        config: AnalysisConfig,
        source: Option<Arc<dyn ReadingSource>>,
        store: Arc<dyn CheckpointStore>,
    ) -> anyhow::Result<Self> {
        config.validate().context("Invalid analysis configuration")?;

        let checkpoint = match store.load().await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!("Could not load analysis checkpoint, starting fresh: {:#}", e);
                None
            }
        };

        let engine = match checkpoint {
            Some(checkpoint) => match AnalysisEngine::restore(config.clone(), checkpoint) {
                Ok(engine) => engine,
                Err(e) => {
                    tracing::warn!("Discarding analysis checkpoint: {}", e);
                    AnalysisEngine::new(config)?
                }
            },
            None => {
                tracing::info!("No analysis checkpoint found, starting with an empty window");
                AnalysisEngine::new(config)?
            }
        };

        Ok(Self::new(engine, source, store))
    }

    pub async fn ingest(&self, sample: Sample) -> Result<IngestOutcome, SampleError> {
        let mut engine = self.engine.lock().await;
        let outcome = engine.ingest(sample)?;
        if let IngestOutcome::Accepted { .. } = outcome {
            self.snapshots.send_replace(engine.current_state());
        }
        Ok(outcome)
    }

    /// Load the retention window from the reading source and ingest everything
    /// newer than the engine's latest sample. Returns the number of accepted readings.
    pub async fn backfill(&self) -> anyhow::Result<usize> {
        let Some(source) = &self.source else {
            return Ok(0);
        };

        let (minutes, latest) = {
            let engine = self.engine.lock().await;
            (engine.config().retention_window.num_minutes(), engine.latest_timestamp())
        };
        let hours = u32::try_from(((minutes + 59) / 60).max(1))
            .context("Retention window is too long to backfill")?;

        let mut readings = source
            .readings_since(hours)
            .await
            .context("Failed to load pH history")?;
        readings.retain(|r| latest.is_none_or(|latest| r.timestamp > latest));
        readings.sort_by_key(|r| r.timestamp);
        readings.dedup_by_key(|r| r.timestamp);

        let mut accepted = 0;
        for reading in readings {
            match self.ingest(reading).await {
                Ok(IngestOutcome::Accepted { .. }) => accepted += 1,
                Ok(IngestOutcome::Dropped(_)) => {}
                Err(e) => tracing::debug!("Skipping history reading: {}", e),
            }
        }

        tracing::info!("Backfilled {} pH readings from the last {}h", accepted, hours);
        Ok(accepted)
    }

    /// Fetch the latest reading and ingest it if it is new.
    pub async fn poll_once(&self) -> anyhow::Result<Option<IngestOutcome>> {
        let Some(source) = &self.source else {
            return Ok(None);
        };

        let Some(reading) = source
            .latest_reading()
            .await
            .context("Failed to fetch latest pH reading")?
        else {
            tracing::debug!("Reading source returned no pH value");
            return Ok(None);
        };

        let latest = self.engine.lock().await.latest_timestamp();
        if latest.is_some_and(|latest| reading.timestamp <= latest) {
            tracing::debug!("No new pH reading since {}", reading.timestamp);
            return Ok(None);
        }

        Ok(Some(self.ingest(reading).await?))
    }

    pub async fn checkpoint(&self) -> anyhow::Result<()> {
        let (checkpoint, dropped) = {
            let engine = self.engine.lock().await;
            (engine.checkpoint(), engine.dropped_samples())
        };
        self.store
            .save(&checkpoint)
            .await
            .context("Failed to save analysis checkpoint")?;
        tracing::debug!(
            "Saved analysis checkpoint with {} samples ({} implausible readings dropped so far)",
            checkpoint.samples.len(),
            dropped
        );
        Ok(())
    }

    /// Snapshot of the last completed ingest; never waits on the writer.
    pub fn current_state(&self) -> Arc<EngineState> {
        self.snapshots.borrow().clone()
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }
}
