// Domain layer - pH analysis models and algorithms
pub mod alkalinity;
pub mod analysis_config;
pub mod deviation;
pub mod oscillation;
pub mod sample;
pub mod trend;
