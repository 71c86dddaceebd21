//! Plain HTTP forwarding for absolute-form requests

use crate::error::{Error, Result};
use crate::models::ConnectionLog;
use crate::proxy::dispatcher::DispatchSettings;
use crate::proxy::relay::ByteRelay;
use crate::proxy::target::TargetAuthority;
use crate::proxy::upstream;
use crate::utils::{
    is_blank_line, parse_chunk_size, read_header_block, read_line_limited, request_body_framing, BodyFraming,
    LineRead,
};
use crate::log_debug;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

/// Forward one request to `authority` and stream the response back.
///
/// The request line and header lines reach the origin byte-for-byte, in
/// order, followed by the empty line. Only the body the head declares is
/// read from the client after that; any further bytes (a pipelined request)
/// are never forwarded. The response is copied back until the origin closes
/// its side.
pub async fn relay_http<R, W>(
    request_line: &[u8],
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
    let headers = read_header_block(client_reader, settings.max_header_bytes).await?;
    let framing = request_body_framing(&headers)?;

    let mut origin = upstream::connect(authority, settings.connect_timeout).await?;

    let mut request_head = Vec::with_capacity(request_line.len() + headers.len() + 2);
    request_head.extend_from_slice(request_line);
    if !request_line.ends_with(b"\n") {
        request_head.extend_from_slice(b"\r\n");
    }
    request_head.extend_from_slice(&headers);

    origin.write_all(&request_head).await?;
    origin.flush().await?;
    log_debug!("🔄 Forwarded {} byte request head to {} ({:?})", request_head.len(), authority, framing);

    let (mut origin_reader, mut origin_writer) = origin.split();
    let relay = ByteRelay::new(settings.chunk_size, settings.idle_timeout);
    let from_client = AtomicU64::new(request_head.len() as u64);
    let from_origin = AtomicU64::new(0);

    let upload = forward_body(framing, &relay, client_reader, &mut origin_writer, settings, &from_client);
    let download = relay.copy(&mut origin_reader, client_writer, &from_origin);
    tokio::pin!(upload, download);

    // The exchange is over once the response side finishes; an unfinished
    // body upload is abandoned at that point.
    let mut upload_done = false;
    let result = loop {
        tokio::select! {
            res = &mut upload, if !upload_done => {
                upload_done = true;
                if let Err(e) = res {
                    log_debug!("Request body relay to {} ended: {}", authority, e);
                }
            }
            res = &mut download => break res,
        }
    };

    record.bytes_from_client = from_client.load(Ordering::Relaxed);
    record.bytes_from_upstream = from_origin.load(Ordering::Relaxed);
    result?;

    info!(
        "✅ Relayed {} → {} ({} bytes of response)",
        record.method.as_deref().unwrap_or("-"),
        authority,
        record.bytes_from_upstream
    );
    Ok(())
}

/// Copy the request body described by `framing` from the client to the origin
async fn forward_body<R, W>(
    framing: BodyFraming,
    relay: &ByteRelay,
    client_reader: &mut R,
    origin_writer: &mut W,
    settings: &DispatchSettings,
    transferred: &AtomicU64,
) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    match framing {
        BodyFraming::Empty => Ok(()),
        BodyFraming::Length(length) => forward_exact(relay, client_reader, origin_writer, length, transferred).await,
        BodyFraming::Chunked => forward_chunked(relay, client_reader, origin_writer, settings, transferred).await,
    }
}

async fn forward_exact<R, W>(
    relay: &ByteRelay,
    reader: &mut R,
    writer: &mut W,
    length: u64,
    transferred: &AtomicU64,
) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut body = (&mut *reader).take(length);
    relay.forward(&mut body, writer, transferred).await?;

    if body.limit() > 0 {
        return Err(Error::PrematureEof("end of request body".to_string()));
    }
    Ok(())
}

/// Forward a chunked body verbatim, size lines and trailers included
async fn forward_chunked<R, W>(
    relay: &ByteRelay,
    reader: &mut R,
    writer: &mut W,
    settings: &DispatchSettings,
    transferred: &AtomicU64,
) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let line = read_body_line(reader, settings.max_request_line_bytes).await?;
        let size = parse_chunk_size(&line)?;
        write_counted(writer, &line, transferred).await?;

        if size == 0 {
            let trailers = read_header_block(reader, settings.max_header_bytes).await?;
            write_counted(writer, &trailers, transferred).await?;
            return Ok(());
        }

        forward_exact(relay, reader, writer, size, transferred).await?;

        let terminator = read_body_line(reader, settings.max_request_line_bytes).await?;
        if !is_blank_line(&terminator) {
            return Err(Error::MalformedRequest("chunk data overruns its size".to_string()));
        }
        write_counted(writer, &terminator, transferred).await?;
    }
}

async fn read_body_line<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    match read_line_limited(reader, &mut line, limit).await? {
        LineRead::Complete => Ok(line),
        LineRead::TooLong => Err(Error::LimitExceeded(format!("chunk line over {} bytes", limit))),
        LineRead::Eof | LineRead::Truncated => Err(Error::PrematureEof("end of chunked body".to_string())),
    }
}

async fn write_counted<W>(writer: &mut W, bytes: &[u8], transferred: &AtomicU64) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await?;
    transferred.fetch_add(bytes.len() as u64, Ordering::Relaxed);
    Ok(())
}
