use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::reassembler::{AudioSink, SinkFactory, StreamId};

/// Callback fired once per completed append
pub type AppendEmitter = Arc<dyn Fn(StreamId) + Send + Sync>;

enum SinkCommand {
    Append(Vec<u8>),
    Finalize,
    Abandon,
}

/// Writes every response stream to its own file
pub struct FileSinkFactory {
    output_dir: PathBuf,
    prefix: String,
    extension: String,
    emit: AppendEmitter,
}

impl FileSinkFactory {
    pub fn new(
        output_dir: impl AsRef<Path>,
        prefix: impl Into<String>,
        extension: impl Into<String>,
        emit: AppendEmitter,
    ) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create playback directory {:?}", output_dir))?;

        Ok(Self {
            output_dir,
            prefix: prefix.into(),
            extension: extension.into(),
            emit,
        })
    }

    pub fn path_for(&self, stream: StreamId) -> PathBuf {
        self.output_dir.join(format!(
            "{}-response-{:03}.{}",
            self.prefix, stream, self.extension
        ))
    }
}

impl SinkFactory for FileSinkFactory {
    fn open(&mut self, stream: StreamId) -> Result<Box<dyn AudioSink>> {
        let path = self.path_for(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_stream(stream, path, rx, Arc::clone(&self.emit)));
        Ok(Box::new(FileSink { commands: tx }))
    }
}

struct FileSink {
    commands: mpsc::UnboundedSender<SinkCommand>,
}

impl AudioSink for FileSink {
    fn append(&mut self, bytes: Vec<u8>) {
        if self.commands.send(SinkCommand::Append(bytes)).is_err() {
            warn!("Sink writer already gone, chunk dropped");
        }
    }

    fn finalize(self: Box<Self>) {
        let _ = self.commands.send(SinkCommand::Finalize);
    }

    fn abandon(self: Box<Self>) {
        let _ = self.commands.send(SinkCommand::Abandon);
    }
}

async fn write_stream(
    stream: StreamId,
    path: PathBuf,
    mut commands: mpsc::UnboundedReceiver<SinkCommand>,
    emit: AppendEmitter,
) {
    let mut file: Option<File> = None;
    let mut created = false;
    let mut written = 0usize;

    while let Some(command) = commands.recv().await {
        match command {
            SinkCommand::Append(bytes) => {
                if !created {
                    created = true;
                    match File::create(&path).await {
                        Ok(f) => file = Some(f),
                        Err(e) => error!("Failed to create {:?}: {}", path, e),
                    }
                }
                if let Some(f) = file.as_mut() {
                    match f.write_all(&bytes).await {
                        Ok(()) => written += bytes.len(),
                        Err(e) => error!("Failed to write response {}: {}", stream, e),
                    }
                }
                // Acknowledge even on failure so the drain loop keeps moving
                emit(stream);
            }
            SinkCommand::Finalize => {
                if let Some(mut f) = file.take() {
                    if let Err(e) = f.flush().await {
                        error!("Failed to flush response {}: {}", stream, e);
                    }
                    info!("Response {} saved to {:?} ({} bytes)", stream, path, written);
                }
                return;
            }
            SinkCommand::Abandon => {
                drop(file.take());
                if created {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!("Failed to remove abandoned {:?}: {}", path, e);
                    }
                }
                return;
            }
        }
    }
}
