use std::net::SocketAddr;
use std::path::PathBuf;

/// The server's peripheral settings (`spec.md` §6: "Environment variables
/// and CLI flags governing the server... are peripheral; they are not part
/// of the core spec"). Every flag is overridable by a `LOGD_*`-prefixed
/// environment variable via `clap`'s `env` attribute, the same derive
/// style the teacher's own load-test/cli binaries use for their configs.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "logd-server", about = "LogD diff-log storage server")]
pub struct Config {
    /// Root directory for the on-disk store.
    #[arg(long, env = "LOGD_ROOT", default_value = "./data")]
    pub root: PathBuf,

    /// Address to listen on.
    #[arg(long, env = "LOGD_LISTEN", default_value = "127.0.0.1:4321")]
    pub listen: SocketAddr,

    /// Octal umask applied to newly created store directories/files.
    #[arg(long, env = "LOGD_UMASK", default_value = "022")]
    pub umask: String,

    /// Watch live-phase poll interval, in milliseconds (`spec.md` §4.5:
    /// "target: ~100ms").
    #[arg(long, env = "LOGD_POLL_INTERVAL_MS", default_value_t = 100)]
    pub poll_interval_ms: u64,

    /// Commits between out-of-band snapshots for a given path. `0` disables
    /// snapshotting.
    #[arg(long, env = "LOGD_SNAPSHOT_EVERY", default_value_t = 0)]
    pub snapshot_every: u64,

    /// Reconstruction cache capacity (entries), shared across all paths.
    #[arg(long, env = "LOGD_RECONSTRUCTION_CACHE", default_value_t = 256)]
    pub reconstruction_cache: usize,

    /// Endpoint prefix (`spec.md` §6: "on the endpoint `/api/data`
    /// (configurable prefix)").
    #[arg(long, env = "LOGD_API_PREFIX", default_value = "/api")]
    pub api_prefix: String,
}

impl Config {
    pub fn umask_value(&self) -> Option<u32> {
        u32::from_str_radix(self.umask.trim_start_matches("0o"), 8).ok()
    }
}
