pub mod app;
pub mod connector;
