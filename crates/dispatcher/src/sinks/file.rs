//! FileSink - appends framed records to a file

use std::path::{Path, PathBuf};

use bytes::BytesMut;
use contracts::{
    chown_to_user, ContractError, ControlFrame, ControlKind, DataSink, Frame, FrameStreamCodec,
    OutputFileConfig, Record,
};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::codec::Encoder;
use tracing::{debug, info, instrument};

use crate::error::DispatcherError;

/// Sink that appends Frame Streams data to a file
///
/// Each open starts a new segment with a START frame; a clean close ends it
/// with STOP.
pub struct FileSink {
    name: String,
    path: PathBuf,
    writer: BufWriter<File>,
    buf: BytesMut,
}

impl FileSink {
    /// Open (or create) the file for append and write the segment header
    #[instrument(name = "file_sink_open", skip(config), fields(path = %config.path))]
    pub async fn open(name: &str, config: &OutputFileConfig) -> Result<Self, DispatcherError> {
        let path = PathBuf::from(&config.path);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| DispatcherError::sink_creation(name, format!("open {}: {e}", path.display())))?;

        if let Some(user) = &config.user {
            chown_to_user(&path, user).map_err(|e| {
                DispatcherError::sink_creation(name, format!("chown {} to {user}: {e}", path.display()))
            })?;
        }

        let mut sink = Self {
            name: name.to_string(),
            path,
            writer: BufWriter::new(file),
            buf: BytesMut::new(),
        };
        sink.write_frame(Frame::Control(ControlFrame::dnstap_start()))
            .await
            .map_err(|e| DispatcherError::sink_creation(name, e.to_string()))?;

        info!(sink = %sink.name, path = %sink.path.display(), "file sink opened");
        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<(), ContractError> {
        self.buf.clear();
        FrameStreamCodec
            .encode(frame, &mut self.buf)
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        self.writer.write_all(&self.buf).await?;
        Ok(())
    }
}

impl DataSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, record: &Record) -> Result<(), ContractError> {
        self.write_frame(Frame::Data(record.payload.clone())).await
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        self.writer.flush().await?;
        Ok(())
    }

    #[instrument(name = "file_sink_close", skip(self), fields(sink = %self.name))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.write_frame(Frame::Control(ControlFrame::new(ControlKind::Stop)))
            .await?;
        self.writer.flush().await?;
        self.writer.get_mut().sync_data().await?;
        debug!(sink = %self.name, "FileSink closed");
        Ok(())
    }
}
