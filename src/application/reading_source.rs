// Source trait for pH readings from the telemetry store
use crate::domain::sample::Sample;
use async_trait::async_trait;

#[async_trait]
pub trait ReadingSource: Send + Sync {
    /// Most recent pH reading, if the store has one
    async fn latest_reading(&self) -> anyhow::Result<Option<Sample>>;

    /// All readings of the last `hours`, oldest first
    async fn readings_since(&self, hours: u32) -> anyhow::Result<Vec<Sample>>;
}
