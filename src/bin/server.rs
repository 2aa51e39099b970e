//! TideKV Server Binary
//!
//! Starts the TCP server for TideKV. Every flag falls back to its
//! `TIDEKV_*` environment variable; the API key is required.

use std::sync::Arc;

use clap::Parser;
use tidekv::network::Server;
use tidekv::{Config, Store};
use tracing_subscriber::{fmt, EnvFilter};

/// TideKV Server
#[derive(Parser, Debug)]
#[command(name = "tidekv-server")]
#[command(about = "In-memory authenticated key-value store server")]
#[command(version)]
struct Args {
    /// Shared API key clients must present
    #[arg(long, env = "TIDEKV_API_KEY", hide_env_values = true)]
    api_key: String,

    /// (a,b)-tree lower branching bound (>= 2)
    #[arg(long = "a", env = "TIDEKV_A", default_value = "2")]
    tree_a: usize,

    /// (a,b)-tree upper branching bound (>= 2a - 1)
    #[arg(long = "b", env = "TIDEKV_B", default_value = "3")]
    tree_b: usize,

    /// Listening port
    #[arg(short, long, env = "TIDEKV_PORT", default_value = "3000")]
    port: u16,

    /// Maximum concurrent connections
    #[arg(long, default_value = "1024")]
    max_connections: usize,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tidekv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .api_key(args.api_key)
        .tree_a(args.tree_a)
        .tree_b(args.tree_b)
        .port(args.port)
        .max_connections(args.max_connections)
        .build();

    if let Err(e) = config.validate() {
        tracing::error!("invalid configuration: {}", e);
        std::process::exit(1);
    }

    tracing::info!("TideKV Server v{}", tidekv::VERSION);
    tracing::info!(
        "tree order a={}, b={}; listening on port {}",
        config.tree_a,
        config.tree_b,
        config.port
    );

    let store = match Store::new(config.tree_a, config.tree_b) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("failed to create store: {}", e);
            std::process::exit(1);
        }
    };

    let mut server = Server::new(config, store);
    if let Err(e) = server.run() {
        tracing::error!("server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("server stopped");
}
