use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;
use crate::utils::duration_to_ms;

/// How a client connection ended up being handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Host was on the block list; the 403 page was served
    Blocked,
    /// CONNECT tunnel ran to completion
    Tunneled,
    /// Plain HTTP exchange relayed to the origin
    Relayed,
    /// Client sent nothing, or something we refuse to interpret
    Dropped,
    /// Outbound connection could not be opened
    UpstreamFailed,
    /// Transport error after routing
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::Blocked => "blocked",
            Outcome::Tunneled => "tunneled",
            Outcome::Relayed => "relayed",
            Outcome::Dropped => "dropped",
            Outcome::UpstreamFailed => "upstream_failed",
            Outcome::Failed => "failed",
        };
        f.write_str(label)
    }
}

// One record per accepted client connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionLog {
    pub client_addr: SocketAddr,
    pub method: Option<String>,
    pub target: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub outcome: Outcome,

    // Traffic counters
    pub bytes_from_client: u64,
    pub bytes_from_upstream: u64,

    // Timing
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,

    pub error: Option<String>,
}

impl ConnectionLog {
    pub fn new(client_addr: SocketAddr) -> Self {
        Self {
            client_addr,
            method: None,
            target: None,
            host: None,
            port: None,
            outcome: Outcome::Dropped,
            bytes_from_client: 0,
            bytes_from_upstream: 0,
            started_at: Utc::now(),
            duration_ms: 0,
            error: None,
        }
    }

    /// Stamp the elapsed time since `start`
    pub fn finish(&mut self, start: Instant) {
        self.duration_ms = duration_to_ms(start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults_to_dropped() {
        let record = ConnectionLog::new("127.0.0.1:50000".parse().unwrap());
        assert_eq!(record.outcome, Outcome::Dropped);
        assert_eq!(record.bytes_from_client, 0);
        assert!(record.method.is_none());
    }

    #[test]
    fn test_record_serializes_outcome_as_snake_case() {
        let mut record = ConnectionLog::new("127.0.0.1:50000".parse().unwrap());
        record.outcome = Outcome::UpstreamFailed;
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["outcome"], "upstream_failed");
        assert_eq!(json["client_addr"], "127.0.0.1:50000");
    }
}
