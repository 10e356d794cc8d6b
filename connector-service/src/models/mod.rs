pub mod account;
pub mod auth_token;
pub mod session;

pub use account::{Account, AccountId, AccountRole, NewAccount};
pub use auth_token::{AuthToken, DecodedToken, TokenPayload, TokenState};
pub use session::SessionAccount;
