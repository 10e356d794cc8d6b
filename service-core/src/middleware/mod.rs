pub mod metrics;
pub mod origin;
pub mod rate_limit;
pub mod security_headers;
pub mod signature;
pub mod tracing;
