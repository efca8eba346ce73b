//! Queue consumers and background workers.

pub mod box_registration;
pub mod box_verification;
pub mod bulk_transaction_processor;
pub mod consumer;
pub mod payout_reconciler;
pub mod server_registration;
pub mod transaction_processor;

pub use consumer::{JobProcessor, QueueConsumer};
