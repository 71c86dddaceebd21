//! Per-connection request dispatch
//!
//! Reads the client's request line, consults the block list and hands the
//! connection to the CONNECT tunnel or the plain HTTP relay.

use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::filter::BlockList;
use crate::models::{ConnectionLog, Outcome};
use crate::proxy::connect::handle_connect;
use crate::proxy::http_relay::relay_http;
use crate::proxy::target::{RequestLine, TargetAuthority};
use crate::utils::{
    log_blocked, log_connection_closed, log_dropped, log_incoming_request, read_header_block, read_line_limited,
    trim_line_ending, write_response, LineRead, BAD_GATEWAY_RESPONSE, BLOCKED_RESPONSE,
};
use crate::log_debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::warn;

/// How long a blocked client gets to finish sending its request head
const BLOCKED_HEAD_DRAIN: Duration = Duration::from_secs(1);

/// Per-connection limits and timeouts, resolved once from [`ProxyConfig`]
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub connect_timeout: Option<Duration>,
    pub respond_on_upstream_failure: bool,
    pub chunk_size: usize,
    pub idle_timeout: Option<Duration>,
    pub max_request_line_bytes: usize,
    pub max_header_bytes: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&ProxyConfig::default())
    }
}

impl From<&ProxyConfig> for DispatchSettings {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            connect_timeout: config.upstream.connect_timeout(),
            respond_on_upstream_failure: config.upstream.respond_on_failure,
            chunk_size: config.tunnel.chunk_size,
            idle_timeout: config.tunnel.idle_timeout(),
            max_request_line_bytes: config.limits.max_request_line_bytes,
            max_header_bytes: config.limits.max_header_bytes,
        }
    }
}

/// Routes accepted client connections. Shared by every connection task.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    block_list: Arc<BlockList>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(block_list: Arc<BlockList>, settings: DispatchSettings) -> Self {
        Self { block_list, settings }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(Arc::new(config.block_list()), DispatchSettings::from(config))
    }

    pub fn block_list(&self) -> &BlockList {
        &self.block_list
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Serve one client connection to completion.
    ///
    /// Never fails: every error is logged and folded into the returned
    /// record. The stream is closed before this returns.
    pub async fn dispatch<S>(&self, stream: S, client_addr: SocketAddr) -> ConnectionLog
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let start = Instant::now();
        let mut record = ConnectionLog::new(client_addr);

        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        match self.route(&mut reader, &mut writer, &mut record).await {
            Ok(outcome) => record.outcome = outcome,
            Err(e) => {
                record.outcome = self.handle_error(&e, &mut writer, &client_addr).await;
                record.error = Some(e.to_string());
            }
        }

        if let Err(e) = writer.shutdown().await {
            log_debug!("Closing connection from {}: {}", client_addr, e);
        }

        record.finish(start);
        log_connection_closed(&record);
        record
    }

    async fn route<R, W>(&self, reader: &mut R, writer: &mut W, record: &mut ConnectionLog) -> Result<Outcome>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut raw_line = Vec::new();
        let line_state = read_line_limited(reader, &mut raw_line, self.settings.max_request_line_bytes).await?;
        match line_state {
            // Connected and left without sending anything
            LineRead::Eof => return Ok(Outcome::Dropped),
            LineRead::TooLong => {
                return Err(Error::LimitExceeded(format!(
                    "request line over {} bytes",
                    self.settings.max_request_line_bytes
                )));
            }
            LineRead::Complete | LineRead::Truncated => {}
        }

        let line = std::str::from_utf8(trim_line_ending(&raw_line))
            .map_err(|_| Error::MalformedRequest("request line is not UTF-8".to_string()))?;
        let request = RequestLine::parse(line)?;
        record.method = Some(request.method.clone());
        record.target = Some(request.target.clone());
        log_incoming_request(&request.method, &request.target, &record.client_addr);

        let authority = TargetAuthority::for_request(&request)?;
        record.host = Some(authority.host.clone());
        record.port = Some(authority.port);

        if self.block_list.is_blocked(&authority.host) {
            log_blocked(&authority.host, &record.client_addr);
            if line_state == LineRead::Complete {
                self.drain_request_head(reader).await;
            }
            write_response(writer, BLOCKED_RESPONSE).await?;
            return Ok(Outcome::Blocked);
        }

        if request.is_connect() {
            handle_connect(&authority, reader, writer, &self.settings, record).await?;
            Ok(Outcome::Tunneled)
        } else {
            relay_http(&raw_line, &authority, reader, writer, &self.settings, record).await?;
            Ok(Outcome::Relayed)
        }
    }

    /// Consume the rest of a refused request's head so closing the socket
    /// does not discard the 403 with unread input.
    async fn drain_request_head<R>(&self, reader: &mut R)
    where
        R: AsyncBufRead + Unpin,
    {
        match timeout(BLOCKED_HEAD_DRAIN, read_header_block(reader, self.settings.max_header_bytes)).await {
            Ok(Ok(head)) => log_debug!("Discarded {} header bytes of blocked request", head.len()),
            Ok(Err(e)) => log_debug!("Blocked request head not drained: {}", e),
            Err(_) => log_debug!("Blocked request head unfinished after {:?}", BLOCKED_HEAD_DRAIN),
        }
    }

    async fn handle_error<W>(&self, error: &Error, writer: &mut W, client_addr: &SocketAddr) -> Outcome
    where
        W: AsyncWrite + Unpin,
    {
        if error.is_malformed() {
            log_dropped(&error.to_string(), client_addr);
            return Outcome::Dropped;
        }

        if error.is_upstream_failure() {
            if self.settings.respond_on_upstream_failure {
                if let Err(e) = write_response(writer, BAD_GATEWAY_RESPONSE).await {
                    log_debug!("Failed to send 502 to {}: {}", client_addr, e);
                }
            }
            return Outcome::UpstreamFailed;
        }

        warn!("Connection from {} failed: {}", client_addr, error);
        Outcome::Failed
    }
}
