//! HTTP/1.x wire helpers shared by the dispatcher and the relay handlers

use crate::error::{Error, Result};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed denial page for hosts on the block list
pub const BLOCKED_RESPONSE: &[u8] = b"HTTP/1.1 403 Forbidden\r\n\
Content-Type: text/html\r\n\
\r\n\
<html><body><h1>403 Forbidden</h1><p>This URL is blocked.</p></body></html>";

/// Acknowledgement written before a CONNECT tunnel starts relaying
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Sent when the outbound connection cannot be opened
pub const BAD_GATEWAY_RESPONSE: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\n\r\n";

/// How a call to [`read_line_limited`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRead {
    /// A full line including its `\n` terminator
    Complete,
    /// Stream ended without any bytes
    Eof,
    /// Stream ended in the middle of a line
    Truncated,
    /// `limit` bytes were read without finding a terminator
    TooLong,
}

/// Append one `\n`-terminated line to `buf`, reading at most `limit` bytes.
///
/// The terminator (and any `\r` before it) is kept so callers can forward
/// the line verbatim.
pub async fn read_line_limited<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let start = buf.len();
    let n = reader.take(limit as u64).read_until(b'\n', buf).await?;

    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if buf[start..].ends_with(b"\n") {
        return Ok(LineRead::Complete);
    }
    if n >= limit {
        Ok(LineRead::TooLong)
    } else {
        Ok(LineRead::Truncated)
    }
}

/// Read header lines up to and including the empty line that ends the head.
///
/// Lines are returned verbatim, terminators included. Hitting end-of-stream
/// first is an error, as is a head larger than `limit` bytes.
pub async fn read_header_block<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::new();

    loop {
        let line_start = head.len();
        let remaining = limit.saturating_sub(line_start);
        if remaining == 0 {
            return Err(Error::LimitExceeded(format!("header block over {} bytes", limit)));
        }

        match read_line_limited(reader, &mut head, remaining).await? {
            LineRead::Complete if is_blank_line(&head[line_start..]) => return Ok(head),
            LineRead::Complete => {}
            LineRead::Eof | LineRead::Truncated => {
                return Err(Error::PrematureEof("end of request headers".to_string()));
            }
            LineRead::TooLong => {
                return Err(Error::LimitExceeded(format!("header block over {} bytes", limit)));
            }
        }
    }
}

/// How the body after a request head is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// The head is the whole request
    Empty,
    /// Exactly this many bytes follow the head
    Length(u64),
    /// `Transfer-Encoding: chunked`, ending with the zero-size chunk
    Chunked,
}

/// Work out the body framing from a raw header block.
///
/// `Transfer-Encoding` wins over `Content-Length`. A transfer coding other
/// than a final `chunked`, or disagreeing `Content-Length` values, leave the
/// body length unknowable and are rejected.
pub fn request_body_framing(headers: &[u8]) -> Result<BodyFraming> {
    let mut content_length: Option<u64> = None;
    let mut chunked = None;

    for line in headers.split(|&b| b == b'\n') {
        let line = trim_line_ending(line);
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = &line[..colon];
        let value = std::str::from_utf8(&line[colon + 1..])
            .map_err(|_| Error::MalformedRequest("header value is not UTF-8".to_string()))?
            .trim();

        if name.eq_ignore_ascii_case(b"transfer-encoding") {
            let last = value.rsplit(',').next().unwrap_or_default().trim();
            chunked = Some(last.eq_ignore_ascii_case("chunked"));
        } else if name.eq_ignore_ascii_case(b"content-length") {
            let length = value
                .parse::<u64>()
                .map_err(|_| Error::MalformedRequest(format!("invalid Content-Length {:?}", value)))?;
            if content_length.is_some_and(|seen| seen != length) {
                return Err(Error::MalformedRequest("conflicting Content-Length headers".to_string()));
            }
            content_length = Some(length);
        }
    }

    match (chunked, content_length) {
        (Some(true), _) => Ok(BodyFraming::Chunked),
        (Some(false), _) => Err(Error::MalformedRequest(
            "request body with a non-chunked transfer coding".to_string(),
        )),
        (None, Some(0)) | (None, None) => Ok(BodyFraming::Empty),
        (None, Some(length)) => Ok(BodyFraming::Length(length)),
    }
}

/// Size of a chunk from its `size[;ext]` line
pub fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let line = trim_line_ending(line);
    let size = line.split(|&b| b == b';').next().unwrap_or_default();
    std::str::from_utf8(size)
        .ok()
        .and_then(|size| u64::from_str_radix(size.trim(), 16).ok())
        .ok_or_else(|| Error::MalformedRequest(format!("invalid chunk size line {:?}", String::from_utf8_lossy(line))))
}

/// Strip a trailing `\n` or `\r\n`
pub fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// True for the empty line that ends a request or response head
pub fn is_blank_line(line: &[u8]) -> bool {
    trim_line_ending(line).is_empty()
}

/// Write a canned response and flush it
pub async fn write_response<W>(writer: &mut W, response: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(response).await?;
    writer.flush().await
}
