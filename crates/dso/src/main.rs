//! Process entry point: parse args, init logging, load configuration, build
//! the shared process-wide components (port pool, sandbox runtime), and
//! hand them to a `DebugService`.
//!
//! Mirrors the teacher's own startup shape (parse args -> init logging ->
//! build config -> run) and its `main() -> anyhow::Result<()>` convention.
//! HTTP routing/auth/CORS are out of scope per spec.md's Non-goals: this
//! binary constructs the service and leaves wiring it to a transport (an
//! axum/tonic router, a CLI REPL, ...) to the embedder.

mod config;
mod service;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dso_port_pool::PortPool;
use dso_sandbox::DockerSandboxRuntime;
use tracing_subscriber::EnvFilter;

use crate::config::DsoConfig;
use crate::service::DebugService;

#[derive(Parser, Debug)]
#[command(name = "dso", about = "Debug Session Orchestrator")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "dso.toml")]
    config: PathBuf,

    /// Log level filter, e.g. "info", "dso=debug,tower=info".
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = Arc::new(DsoConfig::load(&args.config)?);
    let port_pool = Arc::new(PortPool::new(config.port_range_start, config.port_range_end));
    let sandbox_runtime = Arc::new(DockerSandboxRuntime::connect()?);

    let _service = DebugService::new(config, port_pool, sandbox_runtime);

    tracing::info!("debug session orchestrator initialized; awaiting a transport to drive DebugService");
    std::future::pending::<()>().await;
    Ok(())
}
