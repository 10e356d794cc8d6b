pub mod redemption;

pub use redemption::redemption_middleware;
