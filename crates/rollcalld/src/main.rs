use anyhow::{bail, Context, Result};
use rollcall_core::{AttendanceLedger, EmbeddingStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod preview;

use config::{BusKind, Config};
use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};
use engine::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load().context("invalid configuration")?;
    let kind = config.model_kind()?;

    let store = EmbeddingStore::load(&config.store_path).with_context(|| {
        format!(
            "cannot load embedding store {} (run `rollcall enroll` first)",
            config.store_path.display()
        )
    })?;
    if !store.model().eq_ignore_ascii_case(kind.name()) {
        bail!(
            "embedding store was built with MODEL {} but the daemon is configured for {}",
            store.model(),
            kind
        );
    }
    if !store.is_empty() && store.dimensions() != kind.dimensions() {
        bail!(
            "embedding store has {}-dimensional embeddings, {} produces {}",
            store.dimensions(),
            kind,
            kind.dimensions()
        );
    }
    if store.is_empty() {
        tracing::warn!("embedding store is empty; every face will be Unknown");
    }
    tracing::info!(identities = store.len(), model = store.model(), "embedding store loaded");

    let ledger = AttendanceLedger::open(&config.ledger_path)
        .with_context(|| format!("cannot open ledger {}", config.ledger_path.display()))?;
    tracing::info!(
        path = %config.ledger_path.display(),
        recorded_today = ledger.count_today()?,
        "ledger opened"
    );

    let (detector, embedder) = rollcall_vision::load_models(&config.model_dir, kind)
        .with_context(|| format!("cannot load models from {}", config.model_dir.display()))?;
    tracing::info!(model = %kind, "models loaded");

    let store = Arc::new(store);
    let ledger = Arc::new(ledger);
    let (publisher, reader) = preview::channel();

    let engine = Engine::new(
        detector,
        embedder,
        Arc::clone(&store),
        config.threshold,
        Arc::clone(&ledger),
    )
    .with_preview(publisher);
    let handle = engine::spawn_engine(engine, config.queue_depth)?;

    let service = AttendanceService::new(handle, ledger, store, reader, config.threshold);
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, threshold = config.threshold, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
