use anyhow::{Context, Result};
use common::{Identity, LedgerEvent};
use ledger_server::clock::SystemClock;
use ledger_server::config::LedgerCfg;
use ledger_server::connection_manager::{handle_listen_server, LedgerHandle};
use ledger_server::database::DatabaseConnection;
use ledger_server::database_manager::{flush, DatabaseManager};
use ledger_server::notify::{EventSink, Journal};
use ledger_server::{BetLedger, PoolRegistry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "ledger.yml".into());
    let cfg = LedgerCfg::load(&path)?;

    let span = info_span!("ledger", version = env!("CARGO_PKG_VERSION"));
    match cfg.database.address.clone() {
        Some(address) => {
            let db = DatabaseConnection::connect(
                &address,
                &cfg.database.namespace,
                &cfg.database.name,
                &cfg.database.username,
                &cfg.database.password,
            )
            .await?;
            run(cfg, db).instrument(span).await
        }
        None => {
            let db = DatabaseConnection::in_memory(&cfg.database.namespace, &cfg.database.name).await?;
            run(cfg, db).instrument(span).await
        }
    }
}

async fn run<C: surrealdb::Connection>(cfg: LedgerCfg, db: DatabaseConnection<C>) -> Result<()> {
    let snapshot = db.load_snapshot().await.context("loading ledger snapshot")?;
    let (db_tx, db_rx) = mpsc::unbounded_channel();
    let mut db_manager = DatabaseManager::new(db, db_rx);
    let db_task = tokio::spawn(async move {
        db_manager.manage().await;
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<LedgerEvent>();
    let event_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            info!(pool_id = event.pool_id(), ?event, "ledger event");
        }
    });

    let events: Arc<dyn EventSink> = Arc::new(event_tx);
    let journal: Arc<dyn Journal> = Arc::new(db_tx.clone());
    let registry = Arc::new(PoolRegistry::restore(
        Identity::new(cfg.ledger.owner.clone()),
        cfg.ledger.default_pool_active,
        snapshot.pools,
        snapshot.statuses,
        events.clone(),
        journal.clone(),
    ));
    let bets = Arc::new(BetLedger::restore(registry, snapshot.bets, events, journal));

    let listener = TcpListener::bind(&cfg.server.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.server.listen_addr))?;
    let listen_task = tokio::spawn(handle_listen_server(
        listener,
        LedgerHandle::new(bets, Arc::new(SystemClock)),
    ));

    tokio::select! {
        res = listen_task => {
            res??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    if let Err(e) = flush(&db_tx).await {
        error!("ledger state not fully persisted: {:#}", e);
    }
    event_task.abort();
    db_task.abort();
    Ok(())
}
