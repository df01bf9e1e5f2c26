use std::sync::Arc;

use logd_engine::Engine;
use logd_storage::Storage;
use logd_transaction::Coordinator;
use logd_wire::TreeCodec;

use crate::config::Config;

/// Everything a request handler needs, built once in `main` and shared
/// across connections behind `Arc` (`spec.md` §6's HTTP surface sits on top
/// of the store/coordinator/engine triple; nothing here is per-request).
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub coordinator: Coordinator,
    pub engine: Arc<Engine>,
    pub codec: Arc<dyn TreeCodec>,
    pub config: Arc<Config>,
}

pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}
