pub mod connector_client;
pub mod session_token;

pub use connector_client::{ConnectorClient, ConnectorError, SignedPayload};
pub use session_token::{SessionTokenError, SessionTokenVerifier, ShopSession};
