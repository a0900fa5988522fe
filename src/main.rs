// Copyright (c) 2025 Evan Coleman
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::net::SocketAddr;
use std::process;

use clap::Parser;
use mlflow_policy_gateway::config::{self, GatewayConfig};
use mlflow_policy_gateway::proxy::{self, AppState};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// MLflow policy enforcement gateway.
#[derive(Parser, Debug)]
#[command(name = "mlflow-policy-gateway", version, about)]
struct Cli {
    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    let mut config = match config::load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            process::exit(1);
        }
    };

    if let Some(port) = cli.port {
        config.listen_port = port;
    }

    init_tracing(&config);

    if let Err(err) = run(config).await {
        error!("gateway exited with error: {}", err);
        process::exit(1);
    }
}

fn init_tracing(config: &GatewayConfig) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(app_name = %config.app_name, "starting gateway");

    let addr: SocketAddr = format!("{}:{}", config.listen_host, config.listen_port).parse()?;
    let state = AppState::new(config)?;
    let app = proxy::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
