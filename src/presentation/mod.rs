// Presentation layer - HTTP surface over the monitor service
pub mod app_state;
pub mod handlers;
pub mod responses;
