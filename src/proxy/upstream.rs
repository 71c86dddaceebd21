//! Outbound connections to destination servers

use crate::error::{Error, Result};
use crate::proxy::target::TargetAuthority;
use crate::utils::{duration_to_ms, log_connect_failure, log_connect_success};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Open a TCP connection to `authority`, bounded by `connect_timeout` when set
pub async fn connect(authority: &TargetAuthority, connect_timeout: Option<Duration>) -> Result<TcpStream> {
    let start = Instant::now();
    let attempt = TcpStream::connect((authority.host.as_str(), authority.port));

    let result = match connect_timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed = duration_to_ms(start.elapsed());
                log_connect_failure(&authority.host, authority.port, elapsed, "timed out");
                return Err(Error::ConnectTimeout(authority.address()));
            }
        },
        None => attempt.await,
    };

    let elapsed = duration_to_ms(start.elapsed());
    match result {
        Ok(stream) => {
            log_connect_success(&authority.host, authority.port, elapsed);
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Failed to set TCP_NODELAY on upstream socket: {}", e);
            }
            Ok(stream)
        }
        Err(source) => {
            log_connect_failure(&authority.host, authority.port, elapsed, &source.to_string());
            Err(Error::UpstreamConnection {
                target: authority.address(),
                source,
            })
        }
    }
}
