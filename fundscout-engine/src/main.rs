//! fundscout-engine - Discovery Workflow Engine
//!
//! Client-resident orchestration service driving the funding-opportunity
//! discovery workflow against a remote job gateway. Exposes an HTTP control
//! surface for UI intents and relays engine events over SSE.

use anyhow::Result;
use clap::Parser;
use fundscout_common::events::EventBus;
use fundscout_engine::gateway::{HttpJobGateway, JobGateway, Scripted, SimulatedGateway};
use fundscout_engine::stream::{
    FrameSource, HttpFrameSource, ScriptedFrameSource, StreamConfig,
};
use fundscout_engine::{AppState, WorkflowEngine};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fundscout-engine", about = "Funding discovery workflow engine")]
struct Args {
    /// Remote job gateway base URL
    #[arg(long)]
    gateway_url: Option<String>,

    /// Listen port for the control surface
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for the SQLite store
    #[arg(long)]
    data_dir: Option<String>,

    /// Use the simulated gateway instead of a live one
    #[arg(long, default_value_t = false)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting fundscout-engine (Discovery Workflow Engine)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve configuration (CLI > env > TOML > default)
    let file_config = fundscout_common::config::load_config_file()?;
    let gateway_url =
        fundscout_common::config::resolve_gateway_url(args.gateway_url.as_deref(), &file_config);
    let port = fundscout_common::config::resolve_listen_port(args.port, &file_config);
    let data_dir =
        fundscout_common::config::resolve_data_dir(args.data_dir.as_deref(), &file_config);

    // Step 2: Ensure the data directory and database exist
    fundscout_common::config::ensure_data_dir(&data_dir)?;
    let db_path = data_dir.join("fundscout.db");
    info!("Database: {}", db_path.display());

    let db_pool = fundscout_engine::db::init_database_pool(&db_path).await?;

    // Step 3: Merge the previous session snapshot into completion history
    let history = fundscout_engine::db::snapshots::merge_last_session(&db_pool).await?;
    info!(sessions = history.len(), "Completion history loaded");

    // Step 4: Event bus for SSE relay and analytics mirroring
    let event_bus = EventBus::new(256);

    // Step 5: Gateway and progress stream wiring
    let (gateway, frame_source): (Arc<dyn JobGateway>, Arc<dyn FrameSource>) = if args.simulate {
        info!("Simulated gateway enabled; no remote calls will be made");
        let simulated = SimulatedGateway::with_fallback(Scripted::Complete { result_count: 5 });
        (
            Arc::new(simulated),
            Arc::new(ScriptedFrameSource::new(Vec::new())),
        )
    } else {
        info!(gateway_url = %gateway_url, "Using HTTP job gateway");
        (
            Arc::new(HttpJobGateway::new(&gateway_url)?),
            Arc::new(HttpFrameSource::new(&gateway_url)?),
        )
    };

    let stream_config = StreamConfig {
        initial_delay: Duration::from_millis(file_config.reconnect_initial_ms.unwrap_or(1_000)),
        max_delay: Duration::from_millis(file_config.reconnect_max_ms.unwrap_or(15_000)),
    };

    // Step 6: Engine and session
    let engine = Arc::new(WorkflowEngine::new(
        gateway,
        frame_source,
        stream_config,
        event_bus,
        db_pool.clone(),
    ));

    let state = AppState::new(engine, db_pool);
    let app = fundscout_engine::build_router(state);

    // Step 7: Serve
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Listening on http://127.0.0.1:{port}");
    info!("Health check: http://127.0.0.1:{port}/health");

    axum::serve(listener, app).await?;

    Ok(())
}
