//! Main entry point for the Rust Blocklist Proxy

use clap::Parser;
use rust_blocklist_proxy::{
    init_logger_with_level,
    log_error,
    log_info,
    runtime::run_with_runtime,
    ProxyConfig,
    ProxyServer,
};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rust-blocklist-proxy")]
#[command(about = "A forward proxy for HTTP and CONNECT tunnels with a host block list")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// YAML configuration file (defaults to ./config.yml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Proxy listening address
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Additional host to block (repeatable)
    #[arg(long = "block", value_name = "HOST")]
    block: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Layer command-line flags over the loaded configuration
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if self.verbose {
            config.log_level = "debug".to_string();
        }
        config.blocked_hosts.extend(self.block.iter().cloned());
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ProxyConfig::load_config(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {:#}", e);
        std::process::exit(1);
    });
    cli.apply(&mut config);

    init_logger_with_level(&config.log_level);

    if let Err(e) = config.validate() {
        log_error!("Invalid configuration: {:#}", e);
        std::process::exit(1);
    }

    log_info!("🚀 Starting Rust Blocklist Proxy");
    log_info!("📋 Version: {}", env!("CARGO_PKG_VERSION"));
    log_info!("Test with: curl -x http://{} http://httpbin.org/get", config.listen_addr);

    let runtime_config = config.runtime.clone();
    run_with_runtime(&runtime_config, async move {
        let server = ProxyServer::with_config(&config);
        server.start().await
    })
}
