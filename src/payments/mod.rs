pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod token_cache;
pub mod types;
pub mod utils;

pub use error::{GatewayError, GatewayResult};
pub use provider::PaymentGateway;
