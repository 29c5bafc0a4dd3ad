//! TCP socket reader

use std::net::SocketAddr;

use contracts::InputTcpConfig;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::connection::{accept_failed, drain_connections, spawn_connection};
use crate::error::{IngestionError, Result};
use crate::reader::ReaderContext;

/// Listens on a TCP address; every connection is a Frame Streams session
#[derive(Debug)]
pub struct TcpSocketReader {
    name: String,
    listener: TcpListener,
}

impl TcpSocketReader {
    pub async fn bind(name: &str, config: &InputTcpConfig) -> Result<Self> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| IngestionError::startup_io(name, format!("bind {addr}"), e))?;

        info!(reader = %name, addr = %addr, "tcp socket listening");
        Ok(Self {
            name: name.to_string(),
            listener,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, ctx: ReaderContext) -> Result<u64> {
        let mut conns = JoinSet::new();
        let mut total = 0u64;

        loop {
            tokio::select! {
                _ = ctx.shutdown().cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(reader = %self.name, peer = %peer, error = %e, "set_nodelay failed");
                        }
                        spawn_connection(&mut conns, stream, peer.to_string(), &ctx);
                    }
                    Err(e) => {
                        if !accept_failed(&ctx, &e).await {
                            break;
                        }
                    }
                },
                Some(joined) = conns.join_next(), if !conns.is_empty() => {
                    total += joined.unwrap_or(0);
                }
            }
        }

        total += drain_connections(&mut conns).await;
        debug!(reader = %self.name, "tcp socket reader stopped");
        Ok(total)
    }
}
