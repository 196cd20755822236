// Infrastructure layer - External dependencies and adapters
pub mod checkpoint_file;
pub mod config;
pub mod influx_source;
