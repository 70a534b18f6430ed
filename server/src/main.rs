use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use tetrion_engine::MemoryStore;
use tetrion_server::{Api, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "tetrion-server", about = "WebSocket game server for tetrion")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Points a side must win to take a match.
    #[arg(long)]
    winning_score: Option<u32>,

    /// Pre-point countdown duration override.
    #[arg(long)]
    countdown_ms: Option<u64>,

    /// Disconnect grace duration override.
    #[arg(long)]
    disconnect_grace_ms: Option<u64>,

    /// Comma-separated start levels offered to the level picker.
    #[arg(long, value_delimiter = ',')]
    start_levels: Option<Vec<u8>>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn build_config(args: &Args) -> ServerConfig {
    let mut config = ServerConfig::default();
    if let Some(winning_score) = args.winning_score {
        config.winning_score = winning_score;
    }
    if let Some(countdown_ms) = args.countdown_ms {
        config.countdown_ms = countdown_ms;
    }
    if let Some(grace_ms) = args.disconnect_grace_ms {
        config.disconnect_grace_ms = grace_ms;
    }
    if let Some(levels) = &args.start_levels {
        config.valid_start_levels = levels.clone();
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = build_config(&args);
    let server = Arc::new(Server::new(config, Arc::new(MemoryStore::new())));
    let api = Api::new(server.clone());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, api.router())
        .await
        .context("server exited")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_to_the_config() {
        let args = Args::parse_from([
            "tetrion-server",
            "--winning-score",
            "3",
            "--countdown-ms",
            "1000",
            "--start-levels",
            "18,19,29",
        ]);
        let config = build_config(&args);
        assert_eq!(config.winning_score, 3);
        assert_eq!(config.countdown_ms, 1000);
        assert_eq!(config.valid_start_levels, vec![18, 19, 29]);
        // Untouched fields keep their defaults.
        assert_eq!(config.disconnect_grace_ms, ServerConfig::default().disconnect_grace_ms);
    }

    #[test]
    fn defaults_parse_without_flags() {
        let args = Args::parse_from(["tetrion-server"]);
        assert_eq!(args.port, 8080);
        assert_eq!(args.host, "0.0.0.0");
    }
}
