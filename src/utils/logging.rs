//! Logging utility functions for proxy operations

use crate::log_debug;
use crate::models::ConnectionLog;
use crate::log_connection;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Log incoming request information
pub fn log_incoming_request(method: &str, target: &str, remote_addr: &SocketAddr) {
    if method == "CONNECT" {
        // CONNECT requests at DEBUG level
        log_debug!("🔐 {} {} from {}", method, target, remote_addr.ip());
    } else {
        info!("📥 {} {} from {}", method, target, remote_addr.ip());
    }
}

/// Log a request refused by the block list
pub fn log_blocked(host: &str, remote_addr: &SocketAddr) {
    info!("⛔ Blocked {} for {}", host, remote_addr.ip());
}

/// Log a request line the proxy refuses to interpret
pub fn log_dropped(reason: &str, remote_addr: &SocketAddr) {
    log_debug!("🗑️  Dropping connection from {}: {}", remote_addr, reason);
}

/// Log a successful outbound connection
pub fn log_connect_success(host: &str, port: u16, connect_time: u64) {
    log_debug!("✅ Connected to {}:{} ({}ms)", host, port, connect_time);
}

/// Log failed outbound connection attempt
pub fn log_connect_failure(host: &str, port: u16, connect_time: u64, error: &str) {
    warn!("❌ Connection to {}:{} failed ({}ms): {}", host, port, connect_time, error);
}

/// Log the end of a connection and emit its record
pub fn log_connection_closed(record: &ConnectionLog) {
    info!(
        "🔌 {} {} → {} ({} bytes up, {} bytes down, {}ms)",
        record.client_addr.ip(),
        record.target.as_deref().unwrap_or("-"),
        record.outcome,
        record.bytes_from_client,
        record.bytes_from_upstream,
        record.duration_ms
    );
    log_connection!(record);
}
