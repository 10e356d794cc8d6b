pub mod config;
pub mod handlers;
pub mod middleware;
pub mod services;
pub mod startup;

use services::{ConnectorClient, SessionTokenVerifier};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub connector: Arc<ConnectorClient>,
    pub session_tokens: Arc<SessionTokenVerifier>,
}

impl AppState {
    pub fn new(connector: Arc<ConnectorClient>, session_tokens: Arc<SessionTokenVerifier>) -> Self {
        Self {
            connector,
            session_tokens,
        }
    }
}
