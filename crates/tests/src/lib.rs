//! # Integration Tests
//!
//! End-to-end flows across crates: configured readers feeding the
//! dispatcher, fanned out to real sinks.

#[cfg(test)]
mod e2e_tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::{Bytes, BytesMut};
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        ContractError, ControlFrame, DataSink, Dnstap, DnstapType, Frame, FrameStreamCodec,
        Message, MessageType, Record, RelayConfig, SocketFamily,
    };
    use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig, DispatcherReport};
    use ingestion::IngestionPipeline;
    use prost::Message as _;
    use serde::Deserialize;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::Semaphore;
    use tokio_util::codec::{Decoder, Encoder};

    fn write_framed(path: &Path, payloads: &[Bytes]) {
        let mut buf = BytesMut::new();
        FrameStreamCodec
            .encode(Frame::Control(ControlFrame::dnstap_start()), &mut buf)
            .unwrap();
        for p in payloads {
            FrameStreamCodec
                .encode(Frame::Data(p.clone()), &mut buf)
                .unwrap();
        }
        std::fs::write(path, &buf).unwrap();
    }

    fn read_data_frames(path: &Path) -> Vec<Bytes> {
        let mut buf = BytesMut::from(&std::fs::read(path).unwrap()[..]);
        let mut frames = Vec::new();
        while let Some(frame) = FrameStreamCodec.decode(&mut buf).unwrap() {
            if let Frame::Data(payload) = frame {
                frames.push(payload);
            }
        }
        assert!(buf.is_empty(), "trailing partial frame");
        frames
    }

    fn client_query(src: [u8; 4], sec: u64) -> Bytes {
        let frame = Dnstap {
            r#type: DnstapType::Message as i32,
            identity: Some(b"resolver-1".to_vec()),
            message: Some(Message {
                r#type: MessageType::ClientQuery as i32,
                socket_family: Some(SocketFamily::Inet as i32),
                query_address: Some(src.to_vec()),
                query_port: Some(53000),
                query_time_sec: Some(sec),
                query_message: Some(vec![0xab, 0xcd]),
                ..Default::default()
            }),
            ..Default::default()
        };
        Bytes::from(frame.encode_to_vec())
    }

    /// Run every configured input to completion through the dispatcher
    async fn relay_once(config: &RelayConfig) -> DispatcherReport {
        let mut dispatcher = DispatcherBuilder::new(DispatcherConfig::from_relay(config))
            .grace_period(Duration::from_secs(2))
            .build();
        let tx = dispatcher.start().unwrap();

        let (_, sink_failures) = dispatcher.register_outputs(&config.outputs()).await;
        assert!(sink_failures.is_empty(), "{sink_failures:?}");

        let mut ingestion = IngestionPipeline::new();
        assert!(ingestion.open_all(&config.inputs()).await.is_empty());
        ingestion.start_all(&tx);
        let outcomes = ingestion.wait_all().await;
        assert!(outcomes.iter().all(|o| o.is_clean()), "{outcomes:?}");

        drop(tx);
        dispatcher.shutdown().await
    }

    /// File in, file out: payloads arrive byte-identical and in order
    #[tokio::test]
    async fn test_e2e_file_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.fstrm");
        let output = dir.path().join("out.fstrm");
        let payloads = vec![
            client_query([192, 0, 2, 1], 1_700_000_000),
            Bytes::from_static(b"not a dnstap message"),
            client_query([192, 0, 2, 2], 1_700_000_001),
        ];
        write_framed(&input, &payloads);

        let toml = format!(
            r#"
            [[InputFile]]
            Path = "{}"

            [[OutputFile]]
            Path = "{}"
            "#,
            input.display(),
            output.display()
        );
        let config = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();

        let report = relay_once(&config).await;
        assert_eq!(report.records_dispatched, 3);
        assert_eq!(report.total_dropped(), 0);
        assert_eq!(read_data_frames(&output), payloads);
    }

    #[derive(Debug, Deserialize)]
    struct ForwardFields {
        identity: Option<String>,
        query_address: Option<String>,
        query_port: Option<u32>,
    }

    /// Forward output masks client addresses before they leave the relay
    #[tokio::test]
    async fn test_e2e_forward_masks_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.fstrm");
        write_framed(&input, &[client_query([203, 0, 113, 77], 1_700_000_123)]);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let collector = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            received
        });

        let toml = format!(
            r#"
            [[InputFile]]
            Path = "{}"

            [[OutputFluent]]
            Host = "127.0.0.1"
            Port = {port}
            Tag = "dnstap.client"
            "#,
            input.display()
        );
        let config = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();

        let report = relay_once(&config).await;
        assert_eq!(report.sinks[0].1.write_count, 1);

        let received = tokio::time::timeout(Duration::from_secs(5), collector)
            .await
            .unwrap()
            .unwrap();
        let (tag, time, fields): (String, i64, ForwardFields) =
            rmp_serde::from_slice(&received).unwrap();
        assert_eq!(tag, "dnstap.client");
        assert_eq!(time, 1_700_000_123);
        assert_eq!(fields.identity.as_deref(), Some("resolver-1"));
        assert_eq!(fields.query_address.as_deref(), Some("203.0.113.0"));
        assert_eq!(fields.query_port, Some(53000));
    }

    /// Records every payload it is handed; optionally blocks until released
    struct CollectingSink {
        name: String,
        seen: Arc<Mutex<Vec<Bytes>>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl DataSink for CollectingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&mut self, record: &Record) -> Result<(), ContractError> {
            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?
                    .forget();
            }
            self.seen.lock().unwrap().push(record.payload.clone());
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    async fn wait_for(seen: &Mutex<Vec<Bytes>>, count: usize) {
        for _ in 0..500 {
            if seen.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sink saw {} of {count} records", seen.lock().unwrap().len());
    }

    /// A stalled sink drops its own overflow without slowing its neighbour
    #[tokio::test]
    async fn test_e2e_slow_sink_is_isolated() {
        let mut dispatcher: Dispatcher = DispatcherBuilder::new(DispatcherConfig::default())
            .grace_period(Duration::from_secs(2))
            .build();

        let gate = Arc::new(Semaphore::new(0));
        let slow_seen = Arc::new(Mutex::new(Vec::new()));
        let fast_seen = Arc::new(Mutex::new(Vec::new()));
        dispatcher
            .register(
                CollectingSink {
                    name: "slow".into(),
                    seen: slow_seen.clone(),
                    gate: Some(gate.clone()),
                },
                Some(2),
            )
            .unwrap();
        dispatcher
            .register(
                CollectingSink {
                    name: "fast".into(),
                    seen: fast_seen.clone(),
                    gate: None,
                },
                Some(64),
            )
            .unwrap();

        let tx = dispatcher.start().unwrap();
        let sent: Vec<Bytes> = (0..20u8).map(|i| Bytes::from(vec![i])).collect();
        for payload in &sent {
            tx.send(payload.clone()).await.unwrap();
        }

        wait_for(&fast_seen, sent.len()).await;
        gate.add_permits(sent.len());
        drop(tx);
        let report = dispatcher.shutdown().await;

        assert_eq!(*fast_seen.lock().unwrap(), sent);

        let (name, slow) = &report.sinks[0];
        assert_eq!(name, "slow");
        assert!(slow.dropped_count >= 17, "{slow:?}");
        assert_eq!(slow.write_count + slow.dropped_count, sent.len() as u64);

        // what the slow sink did get is still in arrival order
        let slow_seen = slow_seen.lock().unwrap();
        assert!(slow_seen.windows(2).all(|w| w[0][0] < w[1][0]));
        assert_eq!(report.sinks[1].1.dropped_count, 0);
    }
}
