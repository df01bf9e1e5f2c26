//! The axum HTTP surface over the diff store, transaction coordinator, and
//! reconstruction/watch engine (`spec.md` §6). Kept as a library, with
//! `main.rs` a thin wrapper, so `tests/` can drive the router directly with
//! `tower::ServiceExt::oneshot` instead of binding a real socket.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod wire;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::any;
use axum::Router;
use logd_engine::{Engine, SnapshotPolicy};
use logd_storage::Storage;
use logd_transaction::Coordinator;
use logd_wire::{JsonTreeCodec, TreeCodec};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use state::AppState;

/// Opens the store and builds the shared request state (`spec.md` §4's
/// store, §4.4's coordinator, §4.5's engine), but does not bind a socket.
pub fn build_state(config: Config) -> Result<AppState, logd_storage::Error> {
    let config = Arc::new(config);
    let storage = Arc::new(Storage::open(&config.root)?);
    let codec: Arc<dyn TreeCodec> = Arc::new(JsonTreeCodec);
    let coordinator = Coordinator::new(storage.clone());
    let snapshot_policy = if config.snapshot_every > 0 {
        SnapshotPolicy::new(Some(config.snapshot_every))
    } else {
        SnapshotPolicy::disabled()
    };
    let engine = Arc::new(Engine::new(
        storage.clone(),
        codec.clone(),
        config.reconstruction_cache,
        snapshot_policy,
        Duration::from_millis(config.poll_interval_ms),
    ));

    Ok(AppState { storage, coordinator, engine, codec, config })
}

/// Mounts `{api_prefix}/data` and `{api_prefix}/transactions` (`spec.md` §6)
/// on `state`'s configured prefix.
pub fn build_router(state: AppState) -> Router {
    let data_path = format!("{}/data", state.config.api_prefix);
    let transactions_path = format!("{}/transactions", state.config.api_prefix);

    Router::new()
        .route(&data_path, any(routes::data::dispatch))
        .route(&transactions_path, any(routes::transactions::dispatch))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
