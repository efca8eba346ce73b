//! Periodically re-reads in-flight payouts from the gateway and applies
//! their status with the same rules as the webhook. Covers webhooks that
//! were lost or arrived before the payout id was recorded.

use crate::database::repository::TransactionLedger;
use crate::payments::gateway::PayoutGateway;
use crate::services::reconciliation::{LedgerReconciler, ReconcileOutcome};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    /// How often the worker wakes up.
    pub interval: Duration,
    /// Rows untouched for less than this are left to the webhook.
    pub stale_after: Duration,
    pub batch_size: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(900),
            batch_size: 100,
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.enabled = std::env::var("RECONCILE_ENABLED")
            .map(|v| v != "false")
            .unwrap_or(cfg.enabled);
        cfg.interval = Duration::from_secs(
            std::env::var("RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg.stale_after = Duration::from_secs(
            std::env::var("RECONCILE_STALE_AFTER_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.stale_after.as_secs()),
        );
        cfg.batch_size = std::env::var("RECONCILE_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub examined: usize,
    pub updated: usize,
    pub errors: usize,
}

pub struct PayoutReconcilerWorker {
    transactions: Arc<dyn TransactionLedger>,
    gateway: Arc<dyn PayoutGateway>,
    reconciler: Arc<LedgerReconciler>,
    config: ReconcilerConfig,
}

impl PayoutReconcilerWorker {
    pub fn new(
        transactions: Arc<dyn TransactionLedger>,
        gateway: Arc<dyn PayoutGateway>,
        reconciler: Arc<LedgerReconciler>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            transactions,
            gateway,
            reconciler,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            batch_size = self.config.batch_size,
            "payout reconciler worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payout reconciler worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.run_cycle().await {
                        Ok(report) if report.examined > 0 => info!(
                            examined = report.examined,
                            updated = report.updated,
                            errors = report.errors,
                            "payout reconciliation cycle finished"
                        ),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "payout reconciliation cycle failed"),
                    }
                }
            }
        }

        info!("payout reconciler worker stopped");
    }

    pub async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)?;
        let in_flight = self
            .transactions
            .find_in_flight(Utc::now() - stale_after, self.config.batch_size)
            .await?;

        let mut report = CycleReport {
            examined: in_flight.len(),
            ..Default::default()
        };
        for record in in_flight {
            let Some(payout_id) = record.payout_id.clone() else {
                continue;
            };
            let payout = match self.gateway.fetch_payout(&payout_id).await {
                Ok(payout) => payout,
                Err(e) => {
                    warn!(transaction_id = %record.id, payout_id = %payout_id, error = %e, "payout fetch failed");
                    report.errors += 1;
                    continue;
                }
            };
            match self.reconciler.apply_to(record, &payout).await {
                Ok(ReconcileOutcome::Updated { .. }) => report.updated += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(payout_id = %payout_id, error = %e, "payout reconciliation failed");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }
}
