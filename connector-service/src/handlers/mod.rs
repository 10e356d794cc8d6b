pub mod app;
pub mod connector;
pub mod metrics;
