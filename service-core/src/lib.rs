//! service-core: Shared infrastructure for the shop connector services.
pub mod clock;
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod store;
pub mod utils;

pub use async_trait;
pub use axum;
pub use secrecy;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tower;
pub use tower_http;
pub use tracing;
