use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use payflow_ledger::config::{AppConfig, LedgerConfig, StorageBackend};
use payflow_ledger::db::{Database, schema};
use payflow_ledger::gateway;
use payflow_ledger::ledger::{
    ExpirySweeper, IdempotencyRegistry, IdempotencyStore, LedgerStore, MemoryLedgerStore,
    PgLedgerStore, TransferEngine, TtlBalanceCache,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

type Stores = (Arc<dyn LedgerStore>, Arc<dyn IdempotencyStore>);

async fn build_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match config.ledger.storage {
        StorageBackend::Postgres => {
            let db = Database::connect(&config.postgres)
                .await
                .context("Failed to connect to PostgreSQL")?;
            schema::init_schema(db.pool()).await?;
            let store = Arc::new(PgLedgerStore::with_lock_timeout(
                db.pool().clone(),
                config.postgres.lock_timeout_ms,
            ));
            Ok((store.clone(), store))
        }
        StorageBackend::Memory => {
            let store = Arc::new(memory_store(&config.ledger));
            tracing::warn!(
                accounts = config.ledger.seed_accounts.len(),
                "Using in-memory storage, state is lost on exit"
            );
            Ok((store.clone(), store))
        }
    }
}

fn memory_store(ledger: &LedgerConfig) -> MemoryLedgerStore {
    MemoryLedgerStore::new().with_accounts(
        ledger
            .seed_accounts
            .iter()
            .map(|a| (a.id, a.balance)),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut config =
        AppConfig::load(&env).with_context(|| format!("Loading config for env {}", env))?;
    if let Some(port) = get_port_override() {
        config.gateway.port = port;
    }
    let _log_guard = payflow_ledger::logging::init_logging(&config);

    tracing::info!(
        env = %env,
        storage = ?config.ledger.storage,
        build = env!("GIT_HASH"),
        "Starting ledger service"
    );

    let (store, idempotency_store) = build_stores(&config).await?;

    let ttl = config
        .ledger
        .idempotency_ttl()
        .context("ledger.idempotency_ttl_secs out of range")?;
    let registry = IdempotencyRegistry::new(idempotency_store.clone(), ttl);
    let cache = Arc::new(TtlBalanceCache::new(config.ledger.balance_cache_ttl_secs));
    let engine = Arc::new(TransferEngine::new(store, registry, cache));

    if config.ledger.sweep_interval_secs > 0 {
        let sweeper = ExpirySweeper::new(
            idempotency_store,
            Duration::from_secs(config.ledger.sweep_interval_secs),
        );
        tokio::spawn(async move {
            sweeper.run().await;
        });
    }

    gateway::run_server(&config.gateway.host, config.gateway.port, engine).await
}
