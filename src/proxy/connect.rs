//! CONNECT tunnels: opaque byte relays between the client and the destination

use crate::error::Result;
use crate::models::ConnectionLog;
use crate::proxy::dispatcher::DispatchSettings;
use crate::proxy::relay::ByteRelay;
use crate::proxy::target::TargetAuthority;
use crate::proxy::upstream;
use crate::utils::{read_header_block, write_response, CONNECTION_ESTABLISHED};
use crate::log_debug;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, AsyncWrite};

/// Run a CONNECT tunnel to `authority` until both directions have finished
/// or either one fails.
///
/// The remainder of the CONNECT request head is consumed before the
/// destination is dialled, and `200 Connection Established` is flushed
/// before any payload is relayed. Traffic is never inspected.
pub async fn handle_connect<R, W>(
    authority: &TargetAuthority,
    client_reader: &mut R,
    client_writer: &mut W,
    settings: &DispatchSettings,
    record: &mut ConnectionLog,
) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let head = read_header_block(client_reader, settings.max_header_bytes).await?;
    log_debug!("🔐 CONNECT {} ({} header bytes discarded)", authority, head.len());

    let mut remote = upstream::connect(authority, settings.connect_timeout).await?;

    write_response(client_writer, CONNECTION_ESTABLISHED).await?;

    let (mut remote_reader, mut remote_writer) = remote.split();
    let relay = ByteRelay::new(settings.chunk_size, settings.idle_timeout);
    let from_client = AtomicU64::new(0);
    let from_remote = AtomicU64::new(0);

    let upstream = relay.copy(client_reader, &mut remote_writer, &from_client);
    let downstream = relay.copy(&mut remote_reader, client_writer, &from_remote);
    tokio::pin!(upstream, downstream);

    // A clean end-of-stream is only a half-close: keep relaying the other
    // direction. A failed direction means a dead peer and ends the session.
    let mut upstream_done = false;
    let mut downstream_done = false;
    while !(upstream_done && downstream_done) {
        tokio::select! {
            res = &mut upstream, if !upstream_done => {
                upstream_done = true;
                if let Err(e) = res {
                    log_debug!("Tunnel {} client → remote failed: {}", authority, e);
                    break;
                }
            }
            res = &mut downstream, if !downstream_done => {
                downstream_done = true;
                if let Err(e) = res {
                    log_debug!("Tunnel {} remote → client failed: {}", authority, e);
                    break;
                }
            }
        }
    }

    record.bytes_from_client = from_client.load(Ordering::Relaxed);
    record.bytes_from_upstream = from_remote.load(Ordering::Relaxed);
    log_debug!(
        "🔌 Tunnel {} closed ({} bytes up, {} bytes down)",
        authority,
        record.bytes_from_client,
        record.bytes_from_upstream
    );

    Ok(())
}
