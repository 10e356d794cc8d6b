pub mod directory;
pub mod error;
pub mod postgres_directory;
pub mod provisioning;
pub mod token;

pub use directory::{DirectoryError, InMemoryDirectory, UserDirectory};
pub use error::ServiceError;
pub use postgres_directory::PgDirectory;
pub use provisioning::{ProvisionOutcome, ProvisioningService};
pub use token::{RedemptionError, TokenService};
