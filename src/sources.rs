use crate::config::{SourceConfig, SourceKind};
use crate::error::Error;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{sleep_until, Instant};

/// Result of a single read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    Eof,
    TimedOut,
}

#[async_trait]
pub trait ByteSource: Send {
    fn id(&self) -> &str;

    /// Reads at most `buf.len()` bytes. `timeout_ms == 0` waits indefinitely.
    async fn read_chunk(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<ReadOutcome, Error>;
}

/// Single read with an optional deadline.
async fn read_with_timeout<R>(reader: &mut R, buf: &mut [u8], timeout_ms: u64) -> Result<ReadOutcome, Error>
where
    R: AsyncRead + Unpin + Send,
{
    if buf.is_empty() {
        return Ok(ReadOutcome::Data(0));
    }
    if timeout_ms == 0 {
        let n = reader.read(buf).await?;
        return Ok(outcome(n));
    }
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let sleep = sleep_until(deadline);
    tokio::pin!(sleep);
    tokio::select! {
        res = reader.read(buf) => Ok(outcome(res?)),
        _ = &mut sleep => Ok(ReadOutcome::TimedOut),
    }
}

fn outcome(n: usize) -> ReadOutcome {
    if n == 0 { ReadOutcome::Eof } else { ReadOutcome::Data(n) }
}

pub struct FileSource {
    id: String,
    file: File,
}

impl FileSource {
    pub async fn open(id: &str, path: &str) -> io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self { id: id.to_string(), file })
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn read_chunk(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<ReadOutcome, Error> {
        read_with_timeout(&mut self.file, buf, timeout_ms).await
    }
}

pub struct StdinSource {
    id: String,
    stdin: tokio::io::Stdin,
}

impl StdinSource {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string(), stdin: tokio::io::stdin() }
    }
}

#[async_trait]
impl ByteSource for StdinSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn read_chunk(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<ReadOutcome, Error> {
        read_with_timeout(&mut self.stdin, buf, timeout_ms).await
    }
}

/// Replays fixed chunks; `None` entries stand for a read that times out.
pub struct MemorySource {
    id: String,
    chunks: VecDeque<Option<Vec<u8>>>,
}

impl MemorySource {
    pub fn new(id: &str, chunks: Vec<Option<Vec<u8>>>) -> Self {
        Self { id: id.to_string(), chunks: chunks.into() }
    }

    pub fn from_bytes(id: &str, data: &[u8]) -> Self {
        Self::new(id, vec![Some(data.to_vec())])
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn read_chunk(&mut self, buf: &mut [u8], _timeout_ms: u64) -> Result<ReadOutcome, Error> {
        match self.chunks.pop_front() {
            None => Ok(ReadOutcome::Eof),
            Some(None) => Ok(ReadOutcome::TimedOut),
            Some(Some(mut chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    // Hand the rest back for the next read.
                    self.chunks.push_front(Some(chunk.split_off(n)));
                }
                Ok(ReadOutcome::Data(n))
            }
        }
    }
}

/// Opens the source described by one config entry.
pub async fn open_source(cfg: SourceConfig) -> Result<Box<dyn ByteSource>, Error> {
    match cfg.kind {
        SourceKind::Stdin => Ok(Box::new(StdinSource::new(&cfg.id))),
        SourceKind::File => {
            let path = cfg.path.as_deref().ok_or(Error::Unexpected)?;
            let src = FileSource::open(&cfg.id, path).await.map_err(|e| {
                log::error!("Failed to open source '{}' at {}: {}", cfg.id, path, e);
                Error::from(e)
            })?;
            log::info!("Opened file source '{}' at {}", cfg.id, path);
            Ok(Box::new(src))
        }
    }
}
