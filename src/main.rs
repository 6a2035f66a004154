use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use stride::cli::Cli;
use stride::config::Settings;
use stride::orchestration::Engine;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration: CLI > env vars > config file
    let settings = Settings::new_with_cli(&cli)?;
    let host = settings.server.host.clone();
    let port = settings.server.port;

    info!("Starting Stride orchestration engine on {}:{}", host, port);

    let engine = Arc::new(Engine::from_settings(&settings).await?);
    info!(
        agents = engine.directory.list().await.len(),
        workflows = engine.orchestrator.workflow_count().await,
        compositions = engine.compositions.composition_count().await,
        "Engine ready"
    );

    let app = stride::create_app(engine);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
