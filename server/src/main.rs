mod config;
mod logging;
mod services;

use clap::Parser;
use config::Config;
use runlib::{EnvView, Supervisor};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

const CHANNEL_CAPACITY: usize = 32;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    logging::init_logging(config.log_level)?;

    let strategy = config.build_strategy()?;
    info!(strategy = strategy.name(), "execution strategy selected");
    let supervisor = Supervisor::spawn(strategy, EnvView::from_process(), CHANNEL_CAPACITY);

    let addr = SocketAddr::new(config.host, config.port);
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    serve(listener, supervisor).await
}

async fn serve(listener: TcpListener, supervisor: Supervisor) -> anyhow::Result<()> {
    let app = services::runservice::router(supervisor.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // the active job does not outlive the server
    supervisor.stop().await;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use runlib::strategy::{EmbeddedConfig, EmbeddedStrategy};
    use std::{sync::Arc, time::Duration};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    // start the server on an ephemeral port
    async fn start_server() -> SocketAddr {
        let strategy = EmbeddedStrategy::new(EmbeddedConfig {
            eval_budget: Duration::from_millis(500),
        })
        .expect("engine");
        let supervisor = Supervisor::spawn(Arc::new(strategy), EnvView::empty(), 8);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = serve(listener, supervisor).await;
        });
        addr
    }

    async fn raw_request(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(request.as_bytes())
            .await
            .expect("write request");
        let mut response = String::new();
        stream
            .read_to_string(&mut response)
            .await
            .expect("read response");
        response
    }

    #[tokio::test]
    async fn serves_health_over_tcp() {
        let addr = start_server().await;
        let response = raw_request(
            addr,
            "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("Generic Bot Runner is up."), "{response}");
    }

    #[tokio::test]
    async fn stop_without_job_over_tcp() {
        let addr = start_server().await;
        let response = raw_request(
            addr,
            "POST /stop HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("no bot is running"), "{response}");
    }
}
