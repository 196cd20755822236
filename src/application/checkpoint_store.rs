// Persistence trait for analysis checkpoints
use crate::application::analysis_engine::EngineCheckpoint;
use async_trait::async_trait;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the last saved checkpoint; `None` when nothing was saved yet
    async fn load(&self) -> anyhow::Result<Option<EngineCheckpoint>>;

    async fn save(&self, checkpoint: &EngineCheckpoint) -> anyhow::Result<()>;
}
