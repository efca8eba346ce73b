use anyhow::{anyhow, Context};
use gigpay_backend::api::{
    self, AdminState, BoxApiState, BoxSyncState, WebhookState,
};
use gigpay_backend::config::{
    AppConfig, LedgerBackendKind, NodeRole, QueueBackendKind, QueueConfig,
};
use gigpay_backend::database::{
    init_pool_from_config, memory::MemoryLedger, run_migrations, Ledgers,
};
use gigpay_backend::health::{self, HealthChecker};
use gigpay_backend::logging::init_tracing;
use gigpay_backend::payments::providers::razorpayx::{RazorpayXConfig, RazorpayXProvider};
use gigpay_backend::payments::PayoutGateway;
use gigpay_backend::queue::bulk_transaction::BulkTransactionQueue;
use gigpay_backend::queue::memory::MemoryQueueBackend;
use gigpay_backend::queue::redis_backend::{init_queue_pool, RedisQueueBackend};
use gigpay_backend::queue::registration::RegistrationQueue;
use gigpay_backend::queue::server_registration::ServerRegistrationQueue;
use gigpay_backend::queue::transaction::TransactionQueue;
use gigpay_backend::queue::verify_account::VerifyAccountQueue;
use gigpay_backend::queue::{names, start_queue, NamedQueue, QueueBackend};
use gigpay_backend::services::{
    BackendApi, BalanceService, BoxCredentials, HttpBackendClient, LedgerReconciler,
    WebhookProcessor,
};
use gigpay_backend::workers::box_registration::BoxRegistrationProcessor;
use gigpay_backend::workers::box_verification::BoxVerificationProcessor;
use gigpay_backend::workers::bulk_transaction_processor::BulkTransactionProcessor;
use gigpay_backend::workers::payout_reconciler::{PayoutReconcilerWorker, ReconcilerConfig};
use gigpay_backend::workers::server_registration::ServerRegistrationProcessor;
use gigpay_backend::workers::transaction_processor::TransactionProcessor;
use gigpay_backend::workers::{JobProcessor, QueueConsumer};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

fn spawn_consumer<P: JobProcessor>(
    queue: NamedQueue,
    processor: P,
    config: &QueueConfig,
    shutdown_rx: &watch::Receiver<bool>,
) -> JoinHandle<()> {
    let consumer = QueueConsumer::new(queue, Arc::new(processor), config);
    tokio::spawn(consumer.run(shutdown_rx.clone()))
}

/// Box role: worker-facing API plus the two consumers that forward accounts
/// and confirmations to the backend.
async fn start_box(
    config: &AppConfig,
    ledgers: &Ledgers,
    queue_backend: Arc<dyn QueueBackend>,
    shutdown_rx: &watch::Receiver<bool>,
    workers: &mut Vec<JoinHandle<()>>,
) -> anyhow::Result<Router> {
    let box_node = config
        .box_node
        .as_ref()
        .ok_or_else(|| anyhow!("box configuration missing"))?;
    let credentials = BoxCredentials::from(box_node);
    let backend: Arc<dyn BackendApi> = Arc::new(HttpBackendClient::from_config(box_node)?);

    let registration_queue =
        NamedQueue::initialize(queue_backend.clone(), names::BOX_ACCOUNT_REGISTRATION).await?;
    let registration = Arc::new(RegistrationQueue::new(
        registration_queue.clone(),
        ledgers.accounts.clone(),
        &box_node.box_id,
    ));
    start_queue(registration.as_ref(), &config.queue).await?;

    let verify_queue =
        NamedQueue::initialize(queue_backend, names::BOX_VERIFY_ACCOUNT).await?;
    let verification = Arc::new(VerifyAccountQueue::new(
        verify_queue.clone(),
        ledgers.accounts.clone(),
    ));
    start_queue(verification.as_ref(), &config.queue).await?;

    workers.push(spawn_consumer(
        registration_queue,
        BoxRegistrationProcessor::new(ledgers.accounts.clone(), backend.clone(), credentials.clone()),
        &config.queue,
        shutdown_rx,
    ));
    workers.push(spawn_consumer(
        verify_queue,
        BoxVerificationProcessor::new(ledgers.accounts.clone(), backend.clone(), credentials.clone()),
        &config.queue,
        shutdown_rx,
    ));

    info!(box_id = %box_node.box_id, "box consumers started");
    Ok(api::box_routes(Arc::new(BoxApiState {
        accounts: ledgers.accounts.clone(),
        registration,
        verification,
        backend,
        credentials,
    })))
}

/// Backend role: box sync, admin and webhook routes, the gateway-facing
/// consumers and the payout reconciler.
async fn start_backend(
    config: &AppConfig,
    ledgers: &Ledgers,
    queue_backend: Arc<dyn QueueBackend>,
    shutdown_rx: &watch::Receiver<bool>,
    workers: &mut Vec<JoinHandle<()>>,
) -> anyhow::Result<Router> {
    let gateway_config = RazorpayXConfig::from_env().context("gateway configuration")?;
    let signature_header = gateway_config.signature_header.clone();
    let webhook_secret = gateway_config.webhook_secret.clone();
    let gateway: Arc<dyn PayoutGateway> = Arc::new(RazorpayXProvider::new(gateway_config)?);

    let server_queue =
        NamedQueue::initialize(queue_backend.clone(), names::SERVER_ACCOUNT_REGISTRATION).await?;
    let server_registration = Arc::new(ServerRegistrationQueue::new(
        server_queue.clone(),
        ledgers.accounts.clone(),
    ));
    start_queue(server_registration.as_ref(), &config.queue).await?;

    let transaction_queue =
        NamedQueue::initialize(queue_backend.clone(), names::TRANSACTION).await?;
    let transactions = Arc::new(TransactionQueue::new(
        transaction_queue.clone(),
        ledgers.transactions.clone(),
    ));
    start_queue(transactions.as_ref(), &config.queue).await?;

    let bulk_queue = NamedQueue::initialize(queue_backend, names::BULK_TRANSACTION).await?;
    let bulk = Arc::new(BulkTransactionQueue::new(
        bulk_queue.clone(),
        ledgers.bulk_transactions.clone(),
    ));
    start_queue(bulk.as_ref(), &config.queue).await?;

    let balance = Arc::new(BalanceService::new(
        ledgers.transactions.clone(),
        ledgers.earnings.clone(),
        config.payouts.balance_lock_mode,
    ));

    workers.push(spawn_consumer(
        server_queue,
        ServerRegistrationProcessor::new(
            ledgers.accounts.clone(),
            gateway.clone(),
            transactions.clone(),
            config.payouts.clone(),
        ),
        &config.queue,
        shutdown_rx,
    ));
    workers.push(spawn_consumer(
        transaction_queue,
        TransactionProcessor::new(
            ledgers.accounts.clone(),
            ledgers.transactions.clone(),
            gateway.clone(),
            balance,
        ),
        &config.queue,
        shutdown_rx,
    ));
    workers.push(spawn_consumer(
        bulk_queue,
        BulkTransactionProcessor::new(
            ledgers.accounts.clone(),
            ledgers.bulk_transactions.clone(),
            transactions,
            config.payouts.clone(),
        ),
        &config.queue,
        shutdown_rx,
    ));

    let reconciler = Arc::new(LedgerReconciler::new(
        ledgers.accounts.clone(),
        ledgers.transactions.clone(),
    ));
    let reconciler_config = ReconcilerConfig::from_env();
    if reconciler_config.enabled {
        let worker = PayoutReconcilerWorker::new(
            ledgers.transactions.clone(),
            gateway,
            reconciler.clone(),
            reconciler_config,
        );
        workers.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    } else {
        info!("payout reconciler disabled by configuration");
    }

    info!("backend consumers started");
    Ok(api::backend_routes(
        Arc::new(BoxSyncState {
            accounts: ledgers.accounts.clone(),
            registration: server_registration,
            boxes: config.box_registry.clone(),
        }),
        Arc::new(AdminState {
            accounts: ledgers.accounts.clone(),
            transactions: ledgers.transactions.clone(),
            bulk_transactions: ledgers.bulk_transactions.clone(),
            earnings: ledgers.earnings.clone(),
            bulk,
        }),
        Arc::new(WebhookState {
            processor: Arc::new(WebhookProcessor::new(reconciler, webhook_secret)),
            signature_header,
        }),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        role = config.role.as_str(),
        "Starting gigpay node"
    );

    let db_pool = match config.storage.ledger {
        LedgerBackendKind::Postgres => {
            let database = config
                .database
                .as_ref()
                .ok_or_else(|| anyhow!("DATABASE_URL not set"))?;
            let pool = init_pool_from_config(database).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
            run_migrations(&pool).await?;
            Some(pool)
        }
        LedgerBackendKind::Memory => {
            warn!("Using in-memory ledger; nothing survives a restart");
            None
        }
    };
    let ledgers = match &db_pool {
        Some(pool) => Ledgers::postgres(pool.clone()),
        None => Ledgers::memory(Arc::new(MemoryLedger::new())),
    };

    let (queue_backend, queue_pool) = match config.storage.queue {
        QueueBackendKind::Redis => {
            let pool = init_queue_pool(&config.queue).await?;
            let backend: Arc<dyn QueueBackend> = Arc::new(RedisQueueBackend::new(
                pool.clone(),
                config.queue.prefix.clone(),
            ));
            (backend, Some(pool))
        }
        QueueBackendKind::Memory => {
            warn!("Using in-memory queues; queued jobs are lost on restart");
            let backend: Arc<dyn QueueBackend> = Arc::new(MemoryQueueBackend::new());
            (backend, None)
        }
    };

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();
    let routes = match config.role {
        NodeRole::Box => {
            start_box(
                &config,
                &ledgers,
                queue_backend.clone(),
                &worker_shutdown_rx,
                &mut workers,
            )
            .await?
        }
        NodeRole::Backend => {
            start_backend(
                &config,
                &ledgers,
                queue_backend.clone(),
                &worker_shutdown_rx,
                &mut workers,
            )
            .await?
        }
    };

    let health_checker = Arc::new(HealthChecker::new(db_pool.clone(), queue_pool));
    let app = api::with_common_layers(routes.merge(health::routes(health_checker)));
    info!("Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;
    info!(address = %addr, role = config.role.as_str(), "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, join_all(workers))
        .await
        .is_err()
    {
        error!("Timed out waiting for worker shutdown");
    }
    if let Err(e) = queue_backend.close().await {
        warn!(error = %e, "queue backend did not close cleanly");
    }
    if let Some(pool) = db_pool {
        pool.close().await;
    }

    info!("Server shutdown complete");

    Ok(())
}
