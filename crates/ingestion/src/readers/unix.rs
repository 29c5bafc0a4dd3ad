//! Unix socket reader

use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use contracts::{chown_to_user, InputUnixConfig};
use tokio::net::UnixListener;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::connection::{accept_failed, drain_connections, spawn_connection};
use crate::error::{IngestionError, Result};
use crate::reader::ReaderContext;

/// Removes the socket file when the reader goes away
#[derive(Debug)]
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.0.display(), error = %e, "failed to remove socket file");
            }
        }
    }
}

/// Listens on a unix socket; every connection is a Frame Streams session
#[derive(Debug)]
pub struct UnixSocketReader {
    name: String,
    listener: UnixListener,
    // declared after the listener so the socket is closed before unlinking
    socket_file: SocketFile,
}

impl UnixSocketReader {
    /// Bind the socket, replacing a stale one, and hand it to `User`
    pub fn bind(name: &str, config: &InputUnixConfig) -> Result<Self> {
        let path = PathBuf::from(&config.path);
        remove_stale_socket(name, &path)?;

        let listener = UnixListener::bind(&path)
            .map_err(|e| IngestionError::startup_io(name, format!("bind {}", path.display()), e))?;
        let socket_file = SocketFile(path.clone());

        if let Some(user) = config.user.as_deref() {
            chown_to_user(&path, user).map_err(|e| {
                IngestionError::startup_io(name, format!("chown {} to {user}", path.display()), e)
            })?;
        }

        info!(reader = %name, path = %path.display(), "unix socket listening");
        Ok(Self {
            name: name.to_string(),
            listener,
            socket_file,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.socket_file.0
    }

    pub async fn run(self, ctx: ReaderContext) -> Result<u64> {
        let mut conns = JoinSet::new();
        let mut next_peer = 0u64;
        let mut total = 0u64;

        loop {
            tokio::select! {
                _ = ctx.shutdown().cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        next_peer += 1;
                        spawn_connection(&mut conns, stream, format!("unix#{next_peer}"), &ctx);
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
        debug!(reader = %self.name, "unix socket reader stopped");
        Ok(total)
    }
}

fn remove_stale_socket(name: &str, path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!(reader = %name, path = %path.display(), "removing stale socket");
            std::fs::remove_file(path).map_err(|e| {
                IngestionError::startup_io(name, format!("remove stale socket {}", path.display()), e)
            })
        }
        Ok(_) => Err(IngestionError::startup(
            name,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(IngestionError::startup_io(
            name,
            format!("stat {}", path.display()),
            e,
        )),
    }
}
