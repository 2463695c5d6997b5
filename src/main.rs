//! EmberKV - An In-Memory Key-Value Cache Server
//!
//! This is the main entry point for the EmberKV server.
//! It parses the command line, builds the cache, starts the reactors and
//! waits for Ctrl+C.

use emberkv::config::{help_text, parse_args, Invocation, ServerConfig};
use emberkv::server::Server;
use emberkv::storage::StorageEngine;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
  ███████╗███╗   ███╗██████╗ ███████╗██████╗ ██╗  ██╗██╗   ██╗
  ██╔════╝████╗ ████║██╔══██╗██╔════╝██╔══██╗██║ ██╔╝██║   ██║
  █████╗  ██╔████╔██║██████╔╝█████╗  ██████╔╝█████╔╝ ██║   ██║
  ██╔══╝  ██║╚██╔╝██║██╔══██╗██╔══╝  ██╔══██╗██╔═██╗ ╚██╗ ██╔╝
  ███████╗██║ ╚═╝ ██║██████╔╝███████╗██║  ██║██║  ██╗ ╚████╔╝
  ╚══════╝╚═╝     ╚═╝╚═════╝ ╚══════╝╚═╝  ╚═╝╚═╝  ╚═╝  ╚═══╝

EmberKV v{} - In-Memory Key-Value Cache Server
──────────────────────────────────────────────────────────────
Listening on {} ({} worker(s), {} mode, {} byte cache)

Use Ctrl+C to shutdown gracefully.
"#,
        emberkv::VERSION,
        config.bind_address(),
        config.workers,
        config.mode,
        config.capacity,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = match parse_args(std::env::args().skip(1)) {
        Ok(Invocation::Run(config)) => config,
        Ok(Invocation::Help) => {
            println!("{}", help_text());
            return Ok(());
        }
        Ok(Invocation::Version) => {
            println!("EmberKV version {}", emberkv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", help_text());
            std::process::exit(1);
        }
    };

    // Set up logging (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_names(true)
        .init();

    print_banner(&config);

    // Create the cache (shared across all reactors)
    let storage = Arc::new(StorageEngine::with_capacity(config.capacity));
    info!(capacity = config.capacity, "Storage engine initialized");

    let handle = Server::bind(config, storage)?.start()?;
    info!(addr = %handle.local_addr(), "Ready to accept connections");

    signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping server...");

    handle.stop();
    tokio::task::spawn_blocking(move || handle.join()).await??;

    info!("Server shutdown complete");
    Ok(())
}
