pub mod account_status;
pub mod error;
pub mod gateway;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{GatewayError, GatewayResult};
pub use gateway::PayoutGateway;
