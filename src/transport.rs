//! Connection to an IRC server.
//!
//! A [`Connection`] owns one TCP or TLS stream, split into a [`ReadSide`]
//! holding the receive buffer and a [`WriteSide`] holding the FIFO send
//! queue and its [`Throttle`]. The two sides are borrowed independently so
//! the engine can wait on reads, writes and the throttle timer in a single
//! `select!`.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::{timeout, Instant};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

mod error;
mod throttle;
pub mod tls;

pub use self::error::{ConnectError, TlsConfigError};
pub use self::throttle::Throttle;

use crate::config::{ServerConfig, ThrottleConfig};

/// Bytes requested from the socket per read.
pub const READ_CHUNK: usize = 4096;

/// Longest run of bytes without a newline handed out as a single line.
pub const MAX_IRC_LINE_LEN: usize = 8191;

/// A plain or TLS-wrapped TCP stream.
#[allow(clippy::large_enum_variant)]
pub enum Stream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// An established connection.
pub struct Connection {
    endpoint: String,
    pub reader: ReadSide,
    pub writer: WriteSide,
}

impl Connection {
    /// Open a connection, performing the TLS handshake when configured.
    ///
    /// TLS configuration is built before dialing so configuration mistakes
    /// surface without touching the network.
    pub async fn connect(
        server: &ServerConfig,
        connect_timeout: Duration,
        throttle: &ThrottleConfig,
    ) -> Result<Self, ConnectError> {
        let endpoint = format!("{}:{}", server.host, server.port);
        let tls = server.tls.as_ref().map(tls::client_config).transpose()?;

        let dial = async {
            let tcp = open_tcp(server).await?;
            if let Err(e) = enable_keepalive(&tcp) {
                warn!("failed to enable TCP keepalive: {}", e);
            }
            let stream = match tls {
                Some(config) => {
                    let name = rustls::pki_types::ServerName::try_from(server.host.clone())
                        .map_err(|_| ConnectError::InvalidServerName(server.host.clone()))?;
                    let stream = TlsConnector::from(config)
                        .connect(name, tcp)
                        .await
                        .map_err(ConnectError::from_handshake)?;
                    Stream::Tls(Box::new(stream))
                }
                None => Stream::Tcp(tcp),
            };
            Ok::<_, ConnectError>(stream)
        };

        let stream = timeout(connect_timeout, dial)
            .await
            .map_err(|_| ConnectError::Timeout {
                endpoint: endpoint.clone(),
                timeout: connect_timeout,
            })??;
        debug!(%endpoint, "connected");
        Ok(Self::from_stream(endpoint, stream, Throttle::new(throttle)))
    }

    /// Wrap an already established stream.
    pub fn from_stream(endpoint: String, stream: Stream, throttle: Throttle) -> Self {
        let (read_half, write_half) = split(stream);
        Connection {
            endpoint,
            reader: ReadSide {
                half: read_half,
                buffer: BytesMut::with_capacity(READ_CHUNK),
            },
            writer: WriteSide {
                half: write_half,
                queue: VecDeque::new(),
                offset: 0,
                throttle,
            },
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Write out what the throttle allows, then close the stream.
    pub async fn close(mut self) {
        self.writer.throttle.set_enabled(false);
        if let Err(e) = self.writer.drain().await {
            debug!("failed to flush before close: {}", e);
        }
        if let Err(e) = self.writer.half.shutdown().await {
            debug!("failed to shut down stream: {}", e);
        }
    }
}

async fn open_tcp(server: &ServerConfig) -> Result<TcpStream, ConnectError> {
    let mut last_error = None;
    let addrs = lookup_host((server.host.as_str(), server.port))
        .await
        .map_err(|e| {
            debug!(host = %server.host, "lookup failed: {}", e);
            ConnectError::Resolve(server.host.clone())
        })?;
    for addr in addrs {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Some(source) = server.source_address {
            if source.is_ipv4() != addr.is_ipv4() {
                continue;
            }
            socket.bind(SocketAddr::new(source, 0))?;
        }
        match socket.connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!(%addr, "connect failed: {}", e);
                last_error = Some(e);
            }
        }
    }
    Err(match last_error {
        Some(e) => ConnectError::Io(e),
        None => ConnectError::Resolve(server.host.clone()),
    })
}

fn enable_keepalive(stream: &TcpStream) -> io::Result<()> {
    use socket2::{SockRef, TcpKeepalive};

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(120))
        .with_interval(Duration::from_secs(30));
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// Receiving half: socket plus line buffer.
pub struct ReadSide {
    half: ReadHalf<Stream>,
    buffer: BytesMut,
}

impl ReadSide {
    /// One read of up to [`READ_CHUNK`] bytes. `Ok(0)` means the peer closed.
    ///
    /// Cancel safe.
    pub async fn read_some(&mut self) -> io::Result<usize> {
        self.buffer.reserve(READ_CHUNK);
        let mut chunk = (&mut self.half).take(READ_CHUNK as u64);
        chunk.read_buf(&mut self.buffer).await
    }

    /// Next complete line, terminator included.
    ///
    /// A run longer than [`MAX_IRC_LINE_LEN`] without a newline is handed out
    /// as is, so a misbehaving peer cannot grow the buffer without bound.
    pub fn next_line(&mut self) -> Option<Bytes> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(end) => Some(self.buffer.split_to(end + 1).freeze()),
            None if self.buffer.len() > MAX_IRC_LINE_LEN => {
                Some(self.buffer.split_to(MAX_IRC_LINE_LEN).freeze())
            }
            None => None,
        }
    }
}

/// Sending half: socket, FIFO queue and throttle.
pub struct WriteSide {
    half: WriteHalf<Stream>,
    queue: VecDeque<Bytes>,
    /// Bytes of the front message already written.
    offset: usize,
    throttle: Throttle,
}

impl WriteSide {
    /// Queue an encoded line.
    pub fn enqueue(&mut self, line: Bytes) {
        self.queue.push_back(line);
    }

    /// Messages not yet fully written.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Whether a drain attempt would make progress now.
    pub fn wants_write(&self) -> bool {
        !self.queue.is_empty() && !self.throttle.is_throttling()
    }

    /// When the throttle lets the queue move again.
    pub fn throttle_deadline(&self) -> Option<Instant> {
        self.throttle.deadline()
    }

    /// The throttle timer fired.
    pub fn release_throttle(&mut self) {
        self.throttle.release(Instant::now());
    }

    pub fn set_throttle(&mut self, enabled: bool) {
        self.throttle.set_enabled(enabled);
    }

    /// Write queued messages in order until the queue is empty, the throttle
    /// holds, or a short write leaves the front message partially sent.
    ///
    /// Cancel safe: progress is recorded after every completed write.
    pub async fn drain(&mut self) -> io::Result<()> {
        while let Some(front) = self.queue.front() {
            let now = Instant::now();
            if self.offset == 0 && self.throttle.poll(now).is_some() {
                break;
            }
            let written = self.half.write(&front[self.offset..]).await?;
            if written == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            self.offset += written;
            if self.offset < front.len() {
                break;
            }
            self.queue.pop_front();
            self.offset = 0;
            self.throttle.record(now);
        }
        self.half.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    async fn pair(throttle: ThrottleConfig) -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = ServerConfig {
            port,
            ..ServerConfig::plain("127.0.0.1")
        };
        let (connection, accepted) = tokio::join!(
            Connection::connect(&server, Duration::from_secs(5), &throttle),
            listener.accept()
        );
        (connection.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_lines_are_framed() {
        let (mut connection, mut peer) = pair(ThrottleConfig::default()).await;
        peer.write_all(b"PING :a\r\nPING :b\nPART").await.unwrap();

        let mut lines = Vec::new();
        while lines.len() < 2 {
            assert!(connection.reader.read_some().await.unwrap() > 0);
            while let Some(line) = connection.reader.next_line() {
                lines.push(line);
            }
        }
        assert_eq!(lines, [&b"PING :a\r\n"[..], &b"PING :b\n"[..]]);
        assert!(connection.reader.next_line().is_none());
    }

    #[tokio::test]
    async fn test_peer_close_reads_zero() {
        let (mut connection, peer) = pair(ThrottleConfig::default()).await;
        drop(peer);
        assert_eq!(connection.reader.read_some().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_drains_in_order_until_throttled() {
        let (mut connection, peer) = pair(ThrottleConfig::default()).await;
        for n in 0..5 {
            connection.writer.enqueue(Bytes::from(format!("PRIVMSG #a :{n}\r\n")));
        }

        connection.writer.drain().await.unwrap();
        assert_eq!(connection.writer.pending(), 2);
        assert!(!connection.writer.wants_write());
        assert!(connection.writer.throttle_deadline().is_some());

        let mut peer = tokio::io::BufReader::new(peer);
        for n in 0..3 {
            let mut line = String::new();
            peer.read_line(&mut line).await.unwrap();
            assert_eq!(line, format!("PRIVMSG #a :{n}\r\n"));
        }
    }

    #[tokio::test]
    async fn test_held_lines_follow_in_order_after_window() {
        let delay = Duration::from_millis(200);
        let throttle = ThrottleConfig {
            enabled: true,
            threshold: 3,
            delay,
        };
        let (mut connection, peer) = pair(throttle).await;
        let start = Instant::now();
        for n in 0..5 {
            connection.writer.enqueue(Bytes::from(format!("PRIVMSG #a :{n}\r\n")));
        }

        connection.writer.drain().await.unwrap();
        assert_eq!(connection.writer.pending(), 2);
        let deadline = connection.writer.throttle_deadline().unwrap();
        assert!(deadline >= start + delay);

        tokio::time::sleep_until(deadline).await;
        connection.writer.release_throttle();
        assert!(connection.writer.wants_write());
        connection.writer.drain().await.unwrap();
        assert_eq!(connection.writer.pending(), 0);
        assert!(start.elapsed() >= delay);

        let mut peer = tokio::io::BufReader::new(peer);
        for n in 0..5 {
            let mut line = String::new();
            peer.read_line(&mut line).await.unwrap();
            assert_eq!(line, format!("PRIVMSG #a :{n}\r\n"));
        }
    }

    #[tokio::test]
    async fn test_unthrottled_queue_drains_fully() {
        let throttle = ThrottleConfig {
            enabled: false,
            ..ThrottleConfig::default()
        };
        let (mut connection, _peer) = pair(throttle).await;
        for _ in 0..10 {
            connection.writer.enqueue(Bytes::from_static(b"PING :x\r\n"));
        }
        connection.writer.drain().await.unwrap();
        assert_eq!(connection.writer.pending(), 0);
    }

    #[tokio::test]
    async fn test_connect_refused_is_io() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let server = ServerConfig {
            port,
            ..ServerConfig::plain("127.0.0.1")
        };
        let err = Connection::connect(&server, Duration::from_secs(5), &ThrottleConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::Io(_)));
        assert!(!err.is_fatal());
    }
}
