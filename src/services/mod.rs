//! Services module for business logic and integrations

pub mod accounts;
pub mod backend_client;
pub mod balance;
pub mod reconciliation;
pub mod webhook_processor;

pub use backend_client::{BackendApi, BackendClientError, BoxCredentials, HttpBackendClient};
pub use balance::{BalanceCheck, BalanceService};
pub use reconciliation::{LedgerReconciler, ReconcileError, ReconcileOutcome};
pub use webhook_processor::{WebhookError, WebhookProcessor};
