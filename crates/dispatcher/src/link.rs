//! Link - a reconnecting outbound byte stream
//!
//! States: `Disconnected -> Connected -> Reconnecting { attempt, backoff } ->
//! Connected`. A failed write drops the connection; the next send waits out
//! the backoff, reconnects, replays the handshake and retries the same bytes.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, info, warn};

pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Where a link connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    /// `host:port`
    Tcp(String),
}

impl Endpoint {
    async fn connect(&self) -> std::io::Result<Box<dyn AsyncWrite + Send + Sync + Unpin>> {
        match self {
            Self::Unix(path) => Ok(Box::new(UnixStream::connect(path).await?)),
            Self::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// Exponential backoff, doubling up to a cap
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
    Reconnecting { attempt: u32, backoff: Duration },
}

pub struct Link {
    sink: String,
    endpoint: Endpoint,
    /// Written first on every new connection
    handshake: Option<Bytes>,
    stream: Option<Box<dyn AsyncWrite + Send + Sync + Unpin>>,
    state: LinkState,
    backoff: Backoff,
    reconnects: u64,
}

impl Link {
    pub fn new(sink: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            sink: sink.into(),
            endpoint,
            handshake: None,
            stream: None,
            state: LinkState::Disconnected,
            backoff: Backoff::default(),
            reconnects: 0,
        }
    }

    pub fn with_handshake(mut self, handshake: Bytes) -> Self {
        self.handshake = Some(handshake);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Successful connections after the first
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Write `bytes`, reconnecting until it succeeds
    ///
    /// Only returns once the bytes were handed to a live connection; drop
    /// the future to give up.
    pub async fn send(&mut self, bytes: &[u8]) {
        loop {
            if self.stream.is_none() {
                self.connect().await;
            }
            let Some(stream) = self.stream.as_mut() else {
                continue;
            };

            match stream.write_all(bytes).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(sink = %self.sink, endpoint = %self.endpoint, error = %e, "write failed, reconnecting");
                    self.disconnect(0);
                }
            }
        }
    }

    pub async fn flush(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.flush().await {
                warn!(sink = %self.sink, error = %e, "flush failed, reconnecting");
                self.disconnect(0);
            }
        }
    }

    /// Write `trailer` if connected, then shut the connection down
    pub async fn close(&mut self, trailer: Option<&[u8]>) {
        if let Some(mut stream) = self.stream.take() {
            if let Some(trailer) = trailer {
                if let Err(e) = stream.write_all(trailer).await {
                    debug!(sink = %self.sink, error = %e, "trailer not written");
                }
            }
            if let Err(e) = stream.shutdown().await {
                debug!(sink = %self.sink, error = %e, "shutdown failed");
            }
        }
        self.state = LinkState::Disconnected;
    }

    /// Connect, sleeping out the backoff first when reconnecting
    async fn connect(&mut self) {
        loop {
            if let LinkState::Reconnecting { backoff, .. } = self.state {
                tokio::time::sleep(backoff).await;
            }

            match self.try_connect().await {
                Ok(stream) => {
                    if matches!(self.state, LinkState::Reconnecting { .. }) {
                        self.reconnects += 1;
                        ::metrics::counter!("dnstap_relay_sink_reconnects_total", "sink" => self.sink.clone())
                            .increment(1);
                    }
                    info!(sink = %self.sink, endpoint = %self.endpoint, "connected");
                    self.stream = Some(stream);
                    self.state = LinkState::Connected;
                    self.backoff.reset();
                    return;
                }
                Err(e) => {
                    let attempt = match self.state {
                        LinkState::Reconnecting { attempt, .. } => attempt + 1,
                        _ => 1,
                    };
                    warn!(sink = %self.sink, endpoint = %self.endpoint, attempt, error = %e, "connect failed");
                    self.disconnect(attempt);
                }
            }
        }
    }

    async fn try_connect(&self) -> std::io::Result<Box<dyn AsyncWrite + Send + Sync + Unpin>> {
        let mut stream = self.endpoint.connect().await?;
        if let Some(handshake) = &self.handshake {
            stream.write_all(handshake).await?;
        }
        Ok(stream)
    }

    fn disconnect(&mut self, attempt: u32) {
        self.stream = None;
        self.state = LinkState::Reconnecting {
            attempt,
            backoff: self.backoff.next_delay(),
        };
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("sink", &self.sink)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::default();
        let delays: Vec<_> = (0..9).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays[0], Duration::from_millis(500));
        assert_eq!(delays[1], Duration::from_secs(1));
        assert_eq!(delays[5], Duration::from_secs(16));
        assert_eq!(delays[6], MAX_BACKOFF);
        assert_eq!(delays[8], MAX_BACKOFF);

        backoff.reset();
        assert_eq!(backoff.next_delay(), INITIAL_BACKOFF);
    }

    #[tokio::test]
    async fn test_handshake_precedes_data() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut link = Link::new("OutputTCP[0]", Endpoint::Tcp(addr.to_string()))
            .with_handshake(Bytes::from_static(b"HELLO"));
        assert_eq!(link.state(), LinkState::Disconnected);

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            conn.read_to_end(&mut buf).await.unwrap();
            buf
        });

        link.send(b"data").await;
        assert_eq!(link.state(), LinkState::Connected);
        link.close(Some(b"BYE")).await;

        assert_eq!(server.await.unwrap(), b"HELLOdataBYE");
        assert_eq!(link.reconnects(), 0);
    }

    #[tokio::test]
    async fn test_reconnects_after_refused_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut link = Link::new("OutputTCP[0]", Endpoint::Tcp(addr.to_string())).with_backoff(
            Backoff::new(Duration::from_millis(20), Duration::from_millis(40)),
        );

        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            conn.read_to_end(&mut buf).await.unwrap();
            buf
        });

        link.send(b"late").await;
        assert_eq!(link.reconnects(), 1);
        link.close(None).await;
        assert_eq!(server.await.unwrap(), b"late");
    }

    #[tokio::test]
    async fn test_reconnects_after_peer_drops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut link = Link::new("OutputTCP[0]", Endpoint::Tcp(addr.to_string()))
            .with_handshake(Bytes::from_static(b"HELLO"))
            .with_backoff(Backoff::new(
                Duration::from_millis(20),
                Duration::from_millis(40),
            ));

        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            let mut head = [0u8; 9];
            first.read_exact(&mut head).await.unwrap();
            assert_eq!(&head, b"HELLOtick");
            drop(first);

            let (mut second, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            second.read_to_end(&mut buf).await.unwrap();
            buf
        });

        link.send(b"tick").await;
        // the first writes after the drop may still be accepted by the kernel
        for _ in 0..200 {
            if link.reconnects() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            link.send(b"tick").await;
        }
        assert_eq!(link.reconnects(), 1);
        assert_eq!(link.state(), LinkState::Connected);

        link.send(b"after").await;
        link.close(None).await;

        let buf = server.await.unwrap();
        assert!(buf.starts_with(b"HELLO"));
        assert!(buf.windows(5).any(|w| w == b"after"));
    }
}
