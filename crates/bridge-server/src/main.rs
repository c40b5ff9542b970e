mod routes;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use bridge_core::config::AppConfig;
use clap::Parser;
use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "bridge-server", about = "Agent Bridge HTTP server")]
struct Args {
    #[arg(long, default_value = "8000")]
    port: u16,

    #[arg(long)]
    app_root: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load(),
    };

    let app_root = args.app_root.unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
    let state_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("bridge");
    std::fs::create_dir_all(&state_dir)?;

    let state = Arc::new(AppState::new(config, app_root, state_dir));
    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Agent Bridge server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
