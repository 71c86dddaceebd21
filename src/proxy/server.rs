//! Proxy server implementation

use crate::config::ProxyConfig;
use crate::proxy::dispatcher::Dispatcher;
use crate::{log_debug, log_info};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

pub struct ProxyServer {
    listen_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
}

impl ProxyServer {
    /// Create a new proxy server with configuration
    pub fn with_config(config: &ProxyConfig) -> Self {
        Self::with_dispatcher(config.listen_addr, Arc::new(Dispatcher::from_config(config)))
    }

    pub fn with_dispatcher(listen_addr: SocketAddr, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            listen_addr,
            dispatcher,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Bind the configured address and serve until the process exits
    pub async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .with_context(|| format!("Failed to bind proxy listener on {}", self.listen_addr))?;

        log_info!("Proxy server listening on {}", listener.local_addr()?);
        info!("🛡️  {} blocked hosts loaded", self.dispatcher.block_list().len());

        self.serve(listener).await
    }

    /// Accept connections on `listener`, one task per client.
    ///
    /// A failing connection never stops the loop.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    // Back off briefly so fd exhaustion does not spin the loop
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            };

            log_debug!("New connection from: {}", remote_addr);
            if let Err(e) = stream.set_nodelay(true) {
                log_debug!("Failed to set TCP_NODELAY for {}: {}", remote_addr, e);
            }

            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                dispatcher.dispatch(stream, remote_addr).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::BlockList;
    use crate::proxy::dispatcher::DispatchSettings;
    use crate::utils::{BLOCKED_RESPONSE, CONNECTION_ESTABLISHED};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// Start a proxy on an ephemeral port and return its address
    async fn spawn_proxy(blocked: &[&str], settings: DispatchSettings) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(BlockList::new(blocked)), settings));
        let server = ProxyServer::with_dispatcher(addr, dispatcher);
        tokio::spawn(server.serve(listener));
        addr
    }

    /// Echo server that copies everything back until the peer closes
    async fn spawn_echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut reader, mut writer) = socket.split();
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                });
            }
        });
        addr
    }

    async fn read_exact_len(stream: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        timeout(WAIT, stream.read_exact(&mut buf)).await.unwrap().unwrap();
        buf
    }

    async fn read_all(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        timeout(WAIT, stream.read_to_end(&mut buf)).await.unwrap().unwrap();
        buf
    }

    /// Read a request head up to and including the empty line
    async fn read_head(reader: &mut BufReader<TcpStream>) -> Vec<u8> {
        let mut head = Vec::new();
        loop {
            let mut line = Vec::new();
            reader.read_until(b'\n', &mut line).await.unwrap();
            head.extend_from_slice(&line);
            if line == b"\r\n" || line.is_empty() {
                return head;
            }
        }
    }

    #[tokio::test]
    async fn test_blocked_host_never_reaches_upstream() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_port = upstream.local_addr().unwrap().port();
        let proxy = spawn_proxy(&["127.0.0.1"], DispatchSettings::default()).await;

        let mut client = TcpStream::connect(proxy).await.unwrap();
        let request = format!("GET http://127.0.0.1:{}/ HTTP/1.1\r\nHost: x\r\n\r\n", upstream_port);
        client.write_all(request.as_bytes()).await.unwrap();

        assert_eq!(read_all(&mut client).await, BLOCKED_RESPONSE);
        assert!(timeout(Duration::from_millis(200), upstream.accept()).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_tunnel_relays_both_ways() {
        let echo = spawn_echo_server().await;
        let proxy = spawn_proxy(&[], DispatchSettings::default()).await;

        let mut client = TcpStream::connect(proxy).await.unwrap();
        let request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n", echo, echo);
        client.write_all(request.as_bytes()).await.unwrap();

        let ack = read_exact_len(&mut client, CONNECTION_ESTABLISHED.len()).await;
        assert_eq!(ack, CONNECTION_ESTABLISHED);

        let payload = b"\x16\x03\x01 opaque bytes";
        client.write_all(payload).await.unwrap();
        assert_eq!(read_exact_len(&mut client, payload.len()).await, payload);

        client.write_all(b"second").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 6).await, b"second");

        // Half-closing our side ends the tunnel once the echo server follows
        client.shutdown().await.unwrap();
        assert!(read_all(&mut client).await.is_empty());
    }

    #[tokio::test]
    async fn test_client_reset_ends_tunnel() {
        let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = remote.local_addr().unwrap();
        let proxy = spawn_proxy(&[], DispatchSettings::default()).await;

        let mut client = TcpStream::connect(proxy).await.unwrap();
        let request = format!("CONNECT {} HTTP/1.1\r\n\r\n", remote_addr);
        client.write_all(request.as_bytes()).await.unwrap();
        let (mut held, _) = timeout(WAIT, remote.accept()).await.unwrap().unwrap();
        let ack = read_exact_len(&mut client, CONNECTION_ESTABLISHED.len()).await;
        assert_eq!(ack, CONNECTION_ESTABLISHED);

        // Zero linger turns the close into a reset
        client.set_linger(Some(Duration::ZERO)).unwrap();
        drop(client);

        // The silent remote is released long before the idle timeout
        let mut rest = Vec::new();
        timeout(WAIT, held.read_to_end(&mut rest)).await.unwrap().unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_idle_tunnel_is_closed() {
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = silent.local_addr().unwrap();
        let mut settings = DispatchSettings::default();
        settings.idle_timeout = Some(Duration::from_millis(200));
        let proxy = spawn_proxy(&[], settings).await;

        let mut client = TcpStream::connect(proxy).await.unwrap();
        let request = format!("CONNECT {} HTTP/1.1\r\n\r\n", silent_addr);
        client.write_all(request.as_bytes()).await.unwrap();
        let (_held, _) = timeout(WAIT, silent.accept()).await.unwrap().unwrap();

        let rest = read_all(&mut client).await;
        assert_eq!(rest, CONNECTION_ESTABLISHED);
    }

    #[tokio::test]
    async fn test_plain_get_forwards_head_verbatim() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_addr = origin.local_addr().unwrap();
        let origin_task = tokio::spawn(async move {
            let (socket, _) = origin.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let head = read_head(&mut reader).await;
            reader
                .get_mut()
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
                .await
                .unwrap();
            head
        });

        let proxy = spawn_proxy(&["www.youtube.com"], DispatchSettings::default()).await;
        let request = format!(
            "GET http://{}/path?q=1 HTTP/1.1\r\nHost: {}\r\nUser-Agent: test\r\nAccept: */*\r\n\r\n",
            origin_addr, origin_addr
        );

        let mut client = TcpStream::connect(proxy).await.unwrap();
        client.write_all(request.as_bytes()).await.unwrap();

        let response = read_all(&mut client).await;
        assert_eq!(response, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");

        let head = timeout(WAIT, origin_task).await.unwrap().unwrap();
        assert_eq!(head, request.as_bytes());
    }

    #[tokio::test]
    async fn test_pipelined_request_never_reaches_origin() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_addr = origin.local_addr().unwrap();
        let origin_task = tokio::spawn(async move {
            let (socket, _) = origin.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let head = read_head(&mut reader).await;
            reader.get_mut().write_all(b"HTTP/1.1 200 OK\r\n\r\nok").await.unwrap();
            reader.get_mut().shutdown().await.unwrap();

            let mut rest = Vec::new();
            reader.read_to_end(&mut rest).await.unwrap();
            (head, rest)
        });

        let proxy = spawn_proxy(&["www.youtube.com"], DispatchSettings::default()).await;
        let first = format!("GET http://{}/ HTTP/1.1\r\nHost: {}\r\n\r\n", origin_addr, origin_addr);
        let second = "GET http://www.youtube.com/ HTTP/1.1\r\nHost: www.youtube.com\r\n\r\n";

        let mut client = TcpStream::connect(proxy).await.unwrap();
        client.write_all(format!("{}{}", first, second).as_bytes()).await.unwrap();

        let (head, rest) = timeout(WAIT, origin_task).await.unwrap().unwrap();
        assert_eq!(head, first.as_bytes());
        assert!(rest.is_empty());

        // The blocked host is still refused on a connection of its own
        let mut client = TcpStream::connect(proxy).await.unwrap();
        client.write_all(second.as_bytes()).await.unwrap();
        assert_eq!(read_all(&mut client).await, BLOCKED_RESPONSE);
    }

    #[tokio::test]
    async fn test_request_body_is_forwarded_by_content_length() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_addr = origin.local_addr().unwrap();
        let origin_task = tokio::spawn(async move {
            let (socket, _) = origin.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            read_head(&mut reader).await;
            let mut body = vec![0u8; 9];
            reader.read_exact(&mut body).await.unwrap();
            reader.get_mut().write_all(b"HTTP/1.1 201 Created\r\n\r\n").await.unwrap();
            body
        });

        let proxy = spawn_proxy(&[], DispatchSettings::default()).await;
        let request = format!(
            "POST http://{}/items HTTP/1.1\r\nContent-Length: 9\r\n\r\nname=test",
            origin_addr
        );

        let mut client = TcpStream::connect(proxy).await.unwrap();
        client.write_all(request.as_bytes()).await.unwrap();

        assert_eq!(read_all(&mut client).await, b"HTTP/1.1 201 Created\r\n\r\n");
        assert_eq!(timeout(WAIT, origin_task).await.unwrap().unwrap(), b"name=test");
    }

    #[tokio::test]
    async fn test_bad_requests_do_not_stop_the_acceptor() {
        let proxy = spawn_proxy(&["blocked.example"], DispatchSettings::default()).await;

        // Connect and leave without sending anything
        drop(TcpStream::connect(proxy).await.unwrap());

        // Single token request: no response at all
        let mut client = TcpStream::connect(proxy).await.unwrap();
        client.write_all(b"GARBAGE\r\n").await.unwrap();
        assert!(read_all(&mut client).await.is_empty());

        // The server still answers new connections
        let mut client = TcpStream::connect(proxy).await.unwrap();
        client
            .write_all(b"GET http://blocked.example/ HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(read_all(&mut client).await, BLOCKED_RESPONSE);
    }
}
