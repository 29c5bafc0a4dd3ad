//! SocketSink - relays framed records over a Unix or TCP stream

use bytes::BytesMut;
use contracts::{
    ContractError, ControlFrame, ControlKind, DataSink, Frame, FrameStreamCodec, OutputTcpConfig,
    OutputUnixConfig, Record,
};
use tokio_util::codec::Encoder;
use tracing::{debug, instrument};

use crate::error::DispatcherError;
use crate::link::{Endpoint, Link};

/// Pass-through sink: payloads are re-framed byte-for-byte
///
/// The START frame is replayed on every (re)connect.
pub struct SocketSink {
    name: String,
    link: Link,
    buf: BytesMut,
}

impl SocketSink {
    pub fn unix(name: &str, config: &OutputUnixConfig) -> Result<Self, DispatcherError> {
        Self::new(name, Endpoint::Unix(config.path.clone().into()))
    }

    pub fn tcp(name: &str, config: &OutputTcpConfig) -> Result<Self, DispatcherError> {
        Self::new(name, Endpoint::Tcp(config.address()))
    }

    pub fn new(name: &str, endpoint: Endpoint) -> Result<Self, DispatcherError> {
        let start = FrameStreamCodec::encode_frame(Frame::Control(ControlFrame::dnstap_start()))
            .map_err(|e| DispatcherError::sink_creation(name, e.to_string()))?;
        debug!(sink = %name, endpoint = %endpoint, "socket sink created");

        Ok(Self {
            name: name.to_string(),
            link: Link::new(name, endpoint).with_handshake(start.freeze()),
            buf: BytesMut::new(),
        })
    }

    pub fn link(&self) -> &Link {
        &self.link
    }
}

impl DataSink for SocketSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, record: &Record) -> Result<(), ContractError> {
        self.buf.clear();
        FrameStreamCodec
            .encode(Frame::Data(record.payload.clone()), &mut self.buf)
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        self.link.send(&self.buf).await;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        self.link.flush().await;
        Ok(())
    }

    #[instrument(name = "socket_sink_close", skip(self), fields(sink = %self.name))]
    async fn close(&mut self) -> Result<(), ContractError> {
        let stop =
            FrameStreamCodec::encode_frame(Frame::Control(ControlFrame::new(ControlKind::Stop))).ok();
        self.link.close(stop.as_deref()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;
    use tokio::net::{TcpListener, UnixListener};
    use tokio_util::codec::FramedRead;

    #[tokio::test]
    async fn test_tcp_sink_frames_payloads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = OutputTcpConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            buffer_size: 0,
        };

        let server = tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            FramedRead::new(conn, FrameStreamCodec)
                .map(|frame| frame.unwrap())
                .collect::<Vec<_>>()
                .await
        });

        let mut sink = SocketSink::tcp("OutputTCP[0]", &config).unwrap();
        sink.write(&Record::new(0, Bytes::from_static(b"\x0a\x01q")))
            .await
            .unwrap();
        sink.close().await.unwrap();

        assert_eq!(
            server.await.unwrap(),
            vec![
                Frame::Control(ControlFrame::dnstap_start()),
                Frame::Data(Bytes::from_static(b"\x0a\x01q")),
                Frame::Control(ControlFrame::new(ControlKind::Stop)),
            ]
        );
    }

    #[tokio::test]
    async fn test_unix_sink_connects_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let config = OutputUnixConfig {
            path: path.to_string_lossy().into_owned(),
            buffer_size: 0,
        };

        // no listener yet: creating the sink must not fail
        let mut sink = SocketSink::unix("OutputUnix[0]", &config).unwrap();
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            FramedRead::new(conn, FrameStreamCodec)
                .filter_map(|frame| async move {
                    match frame.unwrap() {
                        Frame::Data(payload) => Some(payload),
                        Frame::Control(_) => None,
                    }
                })
                .collect::<Vec<_>>()
                .await
        });

        sink.write(&Record::new(0, Bytes::from_static(b"one"))).await.unwrap();
        sink.write(&Record::new(1, Bytes::from_static(b"two"))).await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(
            server.await.unwrap(),
            vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
        );
    }
}
