//! `logd-server`: the axum HTTP surface over the diff store, transaction
//! coordinator, and reconstruction/watch engine (`spec.md` §6). The actual
//! wiring lives in `lib.rs`; this binary just parses config, sets up
//! tracing/umask, and serves.

use clap::Parser;
use logd_server::Config;

fn main() {
    let config = Config::parse();
    init_tracing();
    apply_umask(&config);

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().expect("failed to build tokio runtime");
    if let Err(err) = rt.block_on(run(config)) {
        tracing::error!(%err, "logd-server exited with an error");
        std::process::exit(1);
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("LOGD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(unix)]
fn apply_umask(config: &Config) {
    if let Some(mask) = config.umask_value() {
        // SAFETY: umask(2) only mutates process-wide file-creation-mask
        // state; no pointers are involved.
        unsafe {
            libc::umask(mask as libc::mode_t);
        }
    } else {
        tracing::warn!(umask = %config.umask, "ignoring malformed --umask value");
    }
}

#[cfg(not(unix))]
fn apply_umask(_config: &Config) {}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let listen = config.listen;
    let root = config.root.clone();

    let state = logd_server::build_state(config)?;
    let app = logd_server::build_router(state);

    tracing::info!(%listen, root = %root.display(), "logd-server starting");
    let listener = tokio::net::TcpListener::bind(listen).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
