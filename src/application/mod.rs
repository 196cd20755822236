// Application layer - Engine orchestration and the ports it drives
pub mod analysis_engine;
pub mod checkpoint_store;
pub mod monitor_service;
pub mod reading_source;
