//! Exercise a storage engine from the command line.
//!
//! Uses an LMDB store under `LARDER_DATA_DIR` when set, otherwise runs
//! cache-only. `user` is durable, `session` is volatile.

use std::sync::Arc;

use larder_core::{LarderConfig, LarderResult, Value};
use larder_storage::{
    init_tracing, BackingStore, LmdbBackingStore, StorageEngine, TelemetryConfig,
};
use serde_json::json;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = init_tracing(&TelemetryConfig::from_env()) {
        eprintln!("{e}");
    }

    if let Err(e) = run(LarderConfig::from_env()).await {
        error!(error = %e, "Demo failed");
        std::process::exit(1);
    }
}

async fn run(config: LarderConfig) -> LarderResult<()> {
    let store: Option<Arc<dyn BackingStore>> = LmdbBackingStore::from_config(&config)
        .map(|store| Arc::new(store) as Arc<dyn BackingStore>);
    let engine = StorageEngine::new(config, store)?;
    engine.mark_durable(["user"])?;

    engine.subscribe("user", |n| {
        info!(key = %n.key, action = ?n.action, value = ?n.value, "user changed");
    })?;

    info!(durable_store = engine.is_store_available(), "Engine ready");

    engine.write("user.profile.name", json!("Ann")).await?;
    engine.add("session", json!("opened")).await?;
    engine
        .update("user.visits", |visits| {
            json!(visits.as_ref().and_then(Value::as_i64).unwrap_or(0) + 1)
        })
        .await?;

    let user = engine.read("user").await?;
    let session = engine.read("session").await?;
    info!(user = ?user, session = ?session, "Current values");

    let stats = engine.cache_stats()?;
    info!(
        hits = stats.hits,
        misses = stats.misses,
        entries = stats.entry_count,
        hit_rate = stats.hit_rate(),
        "Cache stats"
    );
    Ok(())
}
