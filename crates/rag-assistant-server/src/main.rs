use anyhow::Result;
use std::net::SocketAddr;
use tracing::info;

use rag_assistant_server::config::Settings;
use rag_assistant_server::router::{build_router, build_state};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,rag_assistant_server=debug".to_string()),
        )
        .with_target(true)
        .json()
        .init();

    info!("starting rag-assistant-server");

    let settings = Settings::load()?;
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = build_state(settings).await?;
    let app = build_router(state);

    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
