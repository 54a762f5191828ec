pub mod epay;
pub mod mock;

pub use epay::{EpayConfig, EpayGateway};
pub use mock::MockGateway;
