//! Tailed-file reader
//!
//! Reads a framed file from the start and keeps polling for appended data.
//! A new inode at the path means the file was rotated: the old file is read
//! to its end, then the new one is opened from offset 0. A file that shrinks
//! below the read offset was truncated and is re-read from the start.

use std::io::SeekFrom;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::BytesMut;
use contracts::{FrameStreamCodec, InputTailConfig, DEFAULT_TAIL_POLL_INTERVAL_MS};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

use crate::error::{IngestionError, Result};
use crate::reader::ReaderContext;
use crate::session::{FrameSession, SessionAction};

const READ_CHUNK: usize = 64 * 1024;

/// Decoder state for the file currently being read
#[derive(Debug)]
struct TailCursor {
    session: FrameSession,
    buf: BytesMut,
    offset: u64,
    delivered: u64,
}

impl TailCursor {
    fn new() -> Self {
        Self {
            session: FrameSession::file(),
            buf: BytesMut::with_capacity(READ_CHUNK),
            offset: 0,
            delivered: 0,
        }
    }

    /// Start over on a new or truncated file
    fn restart(&mut self) {
        self.session = FrameSession::file();
        self.buf.clear();
        self.offset = 0;
    }
}

/// Follows a growing, possibly rotated, framed file
#[derive(Debug)]
pub struct TailReader {
    name: String,
    path: PathBuf,
    poll_interval: Duration,
    file: File,
    inode: u64,
}

impl TailReader {
    pub async fn open(name: &str, config: &InputTailConfig) -> Result<Self> {
        let path = PathBuf::from(&config.path);
        let file = File::open(&path)
            .await
            .map_err(|e| IngestionError::startup_io(name, format!("open {}", path.display()), e))?;
        let inode = file
            .metadata()
            .await
            .map_err(|e| IngestionError::startup_io(name, format!("stat {}", path.display()), e))?
            .ino();

        let poll_ms = if config.poll_interval_ms == 0 {
            DEFAULT_TAIL_POLL_INTERVAL_MS
        } else {
            config.poll_interval_ms
        };

        Ok(Self {
            name: name.to_string(),
            path,
            poll_interval: Duration::from_millis(poll_ms),
            file,
            inode,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs until shutdown; never completes on its own
    pub async fn run(mut self, ctx: ReaderContext) -> Result<u64> {
        let mut cursor = TailCursor::new();
        info!(reader = %self.name, path = %self.path.display(), "tailing file");

        loop {
            match self.read_once(&ctx, &mut cursor).await? {
                None => break,
                Some(0) => {}
                Some(_) => continue,
            }

            // at the end of the current file: look for rotation or truncation
            match tokio::fs::metadata(&self.path).await {
                Ok(meta) if meta.ino() != self.inode => {
                    if self.rotate(&ctx, &mut cursor).await? {
                        continue;
                    }
                }
                Ok(meta) if meta.len() < cursor.offset => {
                    info!(reader = %self.name, "file truncated, reading from start");
                    self.file
                        .seek(SeekFrom::Start(0))
                        .await
                        .map_err(|e| ctx.io(e))?;
                    cursor.restart();
                    continue;
                }
                Ok(_) => {}
                Err(e) => debug!(reader = %self.name, error = %e, "tailed path missing"),
            }

            tokio::select! {
                _ = ctx.shutdown().cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        debug!(reader = %self.name, records = cursor.delivered, "tail reader stopped");
        Ok(cursor.delivered)
    }

    /// One read from the current file, delivering every complete frame;
    /// `None` when shutdown arrived first
    async fn read_once(
        &mut self,
        ctx: &ReaderContext,
        cursor: &mut TailCursor,
    ) -> Result<Option<usize>> {
        cursor.buf.reserve(READ_CHUNK);
        let read = tokio::select! {
            _ = ctx.shutdown().cancelled() => return Ok(None),
            read = self.file.read_buf(&mut cursor.buf) => read.map_err(|e| ctx.io(e))?,
        };
        cursor.offset += read as u64;

        while let Some(frame) = FrameStreamCodec
            .decode(&mut cursor.buf)
            .map_err(|e| ctx.framing(e))?
        {
            if let SessionAction::Deliver(payload) =
                cursor.session.on_frame(frame).map_err(|v| ctx.protocol(v))?
            {
                ctx.deliver(payload).await?;
                cursor.delivered += 1;
            }
        }
        Ok(Some(read))
    }

    /// Switch to the file now at the path after reading the old one to its
    /// end; false when the new file cannot be opened or shutdown arrived
    async fn rotate(&mut self, ctx: &ReaderContext, cursor: &mut TailCursor) -> Result<bool> {
        let (file, inode) = match open_with_inode(&self.path).await {
            Ok(opened) => opened,
            Err(e) => {
                debug!(reader = %self.name, error = %e, "rotated file not ready");
                return Ok(false);
            }
        };

        // a writer may still hold the old file open
        loop {
            match self.read_once(ctx, cursor).await? {
                None => return Ok(false),
                Some(0) => break,
                Some(_) => {}
            }
        }

        if !cursor.buf.is_empty() {
            warn!(reader = %self.name, pending = cursor.buf.len(), "rotated file ended inside a frame");
        }
        info!(reader = %self.name, "file rotated, reopening");
        self.file = file;
        self.inode = inode;
        cursor.restart();
        Ok(true)
    }
}

async fn open_with_inode(path: &Path) -> std::io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let inode = file.metadata().await?.ino();
    Ok((file, inode))
}
