//! File reader: one pass over a Frame Streams file

use std::path::{Path, PathBuf};

use contracts::{FrameStreamCodec, InputFileConfig};
use futures::StreamExt;
use tokio::fs::File;
use tokio_util::codec::FramedRead;
use tracing::info;

use crate::error::{IngestionError, Result};
use crate::reader::ReaderContext;
use crate::session::{FrameSession, SessionAction};

/// Reads a framed file once and completes
#[derive(Debug)]
pub struct FileReader {
    name: String,
    path: PathBuf,
    file: File,
}

impl FileReader {
    pub async fn open(name: &str, config: &InputFileConfig) -> Result<Self> {
        let path = PathBuf::from(&config.path);
        let file = File::open(&path)
            .await
            .map_err(|e| IngestionError::startup_io(name, format!("open {}", path.display()), e))?;

        Ok(Self {
            name: name.to_string(),
            path,
            file,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn run(self, ctx: ReaderContext) -> Result<u64> {
        let mut frames = FramedRead::new(self.file, FrameStreamCodec);
        let mut session = FrameSession::file();
        let mut delivered = 0u64;

        loop {
            let next = tokio::select! {
                _ = ctx.shutdown().cancelled() => break,
                next = frames.next() => next,
            };
            let Some(frame) = next else { break };
            let frame = frame.map_err(|e| ctx.framing(e))?;

            if let SessionAction::Deliver(payload) =
                session.on_frame(frame).map_err(|v| ctx.protocol(v))?
            {
                ctx.deliver(payload).await?;
                delivered += 1;
            }
        }

        info!(reader = %self.name, path = %self.path.display(), records = delivered, "file read complete");
        Ok(delivered)
    }
}
