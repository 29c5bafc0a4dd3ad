//! Socket connection driver shared by the unix and tcp readers

use std::time::Duration;

use contracts::{Frame, FrameStreamCodec};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::reader::ReaderContext;
use crate::session::{FrameSession, SessionAction};

/// Read one connection until EOF, STOP, shutdown or a framing error
pub(crate) async fn serve_connection<S>(io: S, ctx: &ReaderContext) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, FrameStreamCodec);
    let mut session = FrameSession::socket();
    let mut delivered = 0u64;

    loop {
        let next = tokio::select! {
            _ = ctx.shutdown().cancelled() => break,
            next = framed.next() => next,
        };
        let frame = match next {
            None => break,
            Some(frame) => frame.map_err(|e| ctx.framing(e))?,
        };

        match session.on_frame(frame).map_err(|v| ctx.protocol(v))? {
            SessionAction::Deliver(payload) => {
                trace!(reader = %ctx.name(), len = payload.len(), "frame received");
                ctx.deliver(payload).await?;
                delivered += 1;
            }
            SessionAction::Reply(control) => {
                framed
                    .send(Frame::Control(control))
                    .await
                    .map_err(|e| ctx.framing(e))?;
            }
            SessionAction::Finish(last) => {
                if let Some(control) = last {
                    framed
                        .send(Frame::Control(control))
                        .await
                        .map_err(|e| ctx.framing(e))?;
                }
                break;
            }
            SessionAction::Continue => {}
        }
    }

    Ok(delivered)
}

/// Spawn a connection task; errors close that connection only
pub(crate) fn spawn_connection<S>(
    conns: &mut JoinSet<u64>,
    io: S,
    peer: String,
    ctx: &ReaderContext,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ctx = ctx.clone();
    ctx.metrics().connection_opened();
    debug!(reader = %ctx.name(), peer = %peer, "connection accepted");

    conns.spawn(async move {
        let result = serve_connection(io, &ctx).await;
        ctx.metrics().connection_closed();
        match result {
            Ok(count) => {
                debug!(reader = %ctx.name(), peer = %peer, records = count, "connection closed");
                count
            }
            Err(e) => {
                ctx.report(&e, &peer);
                0
            }
        }
    });
}

/// Pause before the next accept after a failed one
pub(crate) const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Log a failed accept and pause; false when shutdown arrived first
pub(crate) async fn accept_failed(ctx: &ReaderContext, err: &std::io::Error) -> bool {
    warn!(reader = %ctx.name(), error = %err, "accept failed");
    tokio::select! {
        _ = ctx.shutdown().cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => true,
    }
}

/// Wait for every connection task, summing delivered records
pub(crate) async fn drain_connections(conns: &mut JoinSet<u64>) -> u64 {
    let mut total = 0;
    while let Some(joined) = conns.join_next().await {
        total += joined.unwrap_or(0);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::IngestionMetrics;
    use bytes::Bytes;
    use contracts::{inbound_queue, ControlFrame, ControlKind, DNSTAP_CONTENT_TYPE};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn context() -> (ReaderContext, contracts::RecordReceiver) {
        context_with(CancellationToken::new())
    }

    fn context_with(shutdown: CancellationToken) -> (ReaderContext, contracts::RecordReceiver) {
        let (tx, rx) = inbound_queue(16);
        let ctx = ReaderContext::new(
            "InputTest[0]",
            tx,
            Arc::new(IngestionMetrics::new()),
            shutdown,
        );
        (ctx, rx)
    }

    fn emfile() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::Other, "too many open files")
    }

    #[tokio::test]
    async fn test_failed_accept_pauses_before_retry() {
        let (ctx, _rx) = context();
        let started = std::time::Instant::now();
        assert!(accept_failed(&ctx, &emfile()).await);
        assert!(started.elapsed() >= ACCEPT_RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_failed_accept_pause_yields_to_shutdown() {
        let shutdown = CancellationToken::new();
        let (ctx, _rx) = context_with(shutdown.clone());
        shutdown.cancel();
        let started = std::time::Instant::now();
        assert!(!accept_failed(&ctx, &emfile()).await);
        assert!(started.elapsed() < ACCEPT_RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_repeated_accept_failures_do_not_spin() {
        let (ctx, _rx) = context();
        let started = std::time::Instant::now();
        let mut retries = 0;
        while started.elapsed() < ACCEPT_RETRY_DELAY * 3 {
            if !accept_failed(&ctx, &emfile()).await {
                break;
            }
            retries += 1;
        }
        assert!(retries <= 3, "retried {retries} times");
    }

    #[tokio::test]
    async fn test_bidirectional_session_over_duplex() {
        let (ctx, rx) = context();
        let (client, server) = tokio::io::duplex(4096);

        let reader = tokio::spawn(async move { serve_connection(server, &ctx).await });

        let mut client = Framed::new(client, FrameStreamCodec);
        client
            .send(Frame::Control(
                ControlFrame::new(ControlKind::Ready)
                    .with_content_type(Bytes::from_static(DNSTAP_CONTENT_TYPE)),
            ))
            .await
            .unwrap();
        let accept = client.next().await.unwrap().unwrap();
        assert!(matches!(accept, Frame::Control(c) if c.kind == ControlKind::Accept));

        client
            .send(Frame::Control(ControlFrame::dnstap_start()))
            .await
            .unwrap();
        client
            .send(Frame::Data(Bytes::from_static(b"first")))
            .await
            .unwrap();
        client
            .send(Frame::Data(Bytes::from_static(b"second")))
            .await
            .unwrap();
        client
            .send(Frame::Control(ControlFrame::new(ControlKind::Stop)))
            .await
            .unwrap();

        let finish = client.next().await.unwrap().unwrap();
        assert!(matches!(finish, Frame::Control(c) if c.kind == ControlKind::Finish));

        assert_eq!(reader.await.unwrap().unwrap(), 2);
        assert_eq!(rx.recv().await.unwrap().payload, Bytes::from_static(b"first"));
        assert_eq!(rx.recv().await.unwrap().payload, Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn test_malformed_frame_fails_connection() {
        let (ctx, _rx) = context();
        let (client, server) = tokio::io::duplex(4096);

        let reader = tokio::spawn(async move { serve_connection(server, &ctx).await });

        let mut client = Framed::new(client, FrameStreamCodec);
        client
            .send(Frame::Control(ControlFrame::new(ControlKind::Accept)))
            .await
            .unwrap();

        let err = reader.await.unwrap().unwrap_err();
        assert!(err.is_framing());
    }
}
