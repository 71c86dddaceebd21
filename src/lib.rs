//! Rust Blocklist Proxy - a forward proxy that refuses blocked hosts
//!
//! Plain HTTP requests are relayed to the origin, CONNECT requests become
//! opaque tunnels, and requests for hosts on the block list are answered
//! with a fixed 403 page.

pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod utils;

// Re-export commonly used items
pub use error::{Error, Result};
pub use filter::BlockList;
pub use logging::{init_logger_with_env, init_logger_with_level, log_info, log_error, log_debug, log_warning, log_trace};
pub use models::{ConnectionLog, Outcome};
pub use proxy::{Dispatcher, ProxyServer};
pub use config::settings::ProxyConfig;

/// Runtime utilities for creating single-threaded vs multi-threaded Tokio runtimes
pub mod runtime {
    use crate::config::settings::RuntimeConfig;
    use tokio::runtime::{Builder, Runtime};
    use anyhow::{Result, Context};

    /// Create a Tokio runtime based on the configuration
    pub fn create_runtime(config: &RuntimeConfig) -> Result<Runtime> {
        match config.mode.as_str() {
            "single_threaded" => {
                tracing::info!("🧵 Initializing single-threaded runtime");
                Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context("Failed to create single-threaded runtime")
            }
            "multi_threaded" => {
                let mut builder = Builder::new_multi_thread();
                builder.enable_all();

                match config.worker_threads {
                    Some(threads) if threads > 0 => {
                        tracing::info!("🧵 Initializing multi-threaded runtime with {} worker threads", threads);
                        builder.worker_threads(threads);
                    }
                    _ => {
                        tracing::info!("🧵 Initializing multi-threaded runtime with auto-detected CPU cores");
                    }
                }

                builder.build()
                    .context("Failed to create multi-threaded runtime")
            }
            _ => {
                tracing::warn!("⚠️  Unknown runtime mode '{}', defaulting to multi-threaded", config.mode);
                Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .context("Failed to create default multi-threaded runtime")
            }
        }
    }

    /// Execute an async function with the configured runtime
    pub fn run_with_runtime<F, T>(config: &RuntimeConfig, future: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let runtime = create_runtime(config)?;
        runtime.block_on(future)
    }

}
