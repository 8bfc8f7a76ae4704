use crate::config::{FlattenedConfig, OversizePolicy};
use crate::error::Error;
use crate::ring_buffer::RingBuffer;
use crate::sources::{open_source, ByteSource, ReadOutcome, StdinSource};
use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::VecDeque;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A run of bytes handed out by the framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Ends with the delimiter.
    Complete(Vec<u8>),
    /// Flushed without a delimiter, because the buffer filled up or the input went idle.
    Partial(Vec<u8>),
    /// Unterminated bytes left when every source hit end of stream.
    Trailing(Vec<u8>),
}

impl Frame {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Frame::Complete(b) | Frame::Partial(b) | Frame::Trailing(b) => b,
        }
    }
}

/// Splits the concatenation of its sources into delimiter-terminated frames,
/// staging bytes in a `RingBuffer`.
pub struct Framer {
    buffer: RingBuffer,
    delimiter: Vec<u8>,
    oversize: OversizePolicy,
    emit_trailing: bool,
    idle_flush_ms: u64,
    sources: VecDeque<Box<dyn ByteSource>>,
    scratch: Vec<u8>,
    frames_served: u64,
    bytes_served: u64,
}

impl Framer {
    pub fn new(cfg: &FlattenedConfig, sources: Vec<Box<dyn ByteSource>>) -> Result<Self, Error> {
        let buffer = RingBuffer::new(cfg.capacity)?;
        if cfg.delimiter.len() > buffer.capacity() {
            warn!(
                "Delimiter of {} bytes can never fit in a {} byte buffer",
                cfg.delimiter.len(),
                buffer.capacity()
            );
        }
        info!(
            "Framing {} source(s) with a {} byte buffer",
            sources.len(),
            buffer.capacity()
        );
        Ok(Self {
            buffer,
            delimiter: cfg.delimiter.clone(),
            oversize: cfg.oversize,
            emit_trailing: cfg.emit_trailing,
            idle_flush_ms: cfg.idle_flush_ms,
            sources: sources.into(),
            scratch: vec![0u8; cfg.read_chunk.max(1)],
            frames_served: 0,
            bytes_served: 0,
        })
    }

    /// Opens every configured source concurrently; stdin is used when none are configured.
    pub async fn from_config(cfg: FlattenedConfig) -> Result<Self, Error> {
        let results = join_all(cfg.sources.iter().cloned().map(open_source)).await;
        let mut sources = results.into_iter().collect::<Result<Vec<_>, Error>>()?;
        if sources.is_empty() {
            sources.push(Box::new(StdinSource::new("stdin")));
        }
        Self::new(&cfg, sources)
    }

    /// Returns the next frame, or `None` once every source is exhausted.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        loop {
            let end = self.buffer.search(&self.delimiter);
            if end > 0 {
                let bytes = self.take(end)?;
                return Ok(Some(Frame::Complete(bytes)));
            }

            if self.buffer.is_full() {
                match self.oversize {
                    OversizePolicy::Error => {
                        return Err(Error::FrameTooLarge { capacity: self.buffer.capacity() });
                    }
                    OversizePolicy::Flush => {
                        warn!("No delimiter in {} buffered bytes, flushing", self.buffer.len());
                        let bytes = self.take_all()?;
                        return Ok(Some(Frame::Partial(bytes)));
                    }
                }
            }

            let Some(source) = self.sources.front_mut() else {
                return self.finish().await;
            };
            let want = self.scratch.len().min(self.buffer.remaining());
            let timeout_ms = if self.buffer.is_empty() { 0 } else { self.idle_flush_ms };
            let outcome = source.read_chunk(&mut self.scratch[..want], timeout_ms).await?;
            match outcome {
                ReadOutcome::Data(n) => self.buffer.append(&self.scratch[..n])?,
                ReadOutcome::Eof => {
                    info!("Source '{}' reached end of stream", source.id());
                    self.sources.pop_front();
                }
                ReadOutcome::TimedOut => {
                    if !self.buffer.is_empty() {
                        debug!("Input idle, flushing {} buffered bytes", self.buffer.len());
                        let bytes = self.take_all()?;
                        return Ok(Some(Frame::Partial(bytes)));
                    }
                }
            }
        }
    }

    /// Writes every buffered byte to `sink` in one call and consumes them.
    pub async fn write_buffered<W>(&mut self, sink: &mut W) -> Result<usize, Error>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let view = self.buffer.contiguous_view()?;
        let n = view.len();
        sink.write_all(view).await?;
        self.buffer.consume(n);
        Ok(n)
    }

    /// Returns (total_frames_served, total_bytes_served).
    pub fn stats(&self) -> (u64, u64) {
        (self.frames_served, self.bytes_served)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn take(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        let mut out = vec![0u8; n];
        let got = self.buffer.remove(&mut out)?;
        out.truncate(got);
        self.record(got);
        Ok(out)
    }

    fn take_all(&mut self) -> Result<Vec<u8>, Error> {
        self.take(self.buffer.len())
    }

    fn record(&mut self, n: usize) {
        self.frames_served += 1;
        self.bytes_served += n as u64;
        debug!("Frame {} of {} bytes", self.frames_served, n);
    }

    async fn finish(&mut self) -> Result<Option<Frame>, Error> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        if self.emit_trailing {
            let bytes = self.take_all()?;
            return Ok(Some(Frame::Trailing(bytes)));
        }
        warn!("Dropping {} unterminated bytes at end of stream", self.buffer.len());
        self.buffer.clear();
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SourceConfig, SourceKind};
    use crate::sources::MemorySource;

    fn config(capacity: usize, delimiter: &[u8]) -> FlattenedConfig {
        FlattenedConfig {
            capacity,
            delimiter: delimiter.to_vec(),
            ..Default::default()
        }
    }

    fn mem(id: &str, chunks: &[&[u8]]) -> Box<dyn ByteSource> {
        Box::new(MemorySource::new(id, chunks.iter().map(|c| Some(c.to_vec())).collect()))
    }

    async fn collect(framer: &mut Framer) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = framer.next_frame().await.unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_lines_across_chunks() {
        let mut framer = Framer::new(&config(16, b"\n"), vec![mem("m", &[b"ab\ncd", b"e\nf"])]).unwrap();
        let frames = collect(&mut framer).await;
        assert_eq!(
            frames,
            vec![
                Frame::Complete(b"ab\n".to_vec()),
                Frame::Complete(b"cde\n".to_vec()),
                Frame::Trailing(b"f".to_vec()),
            ]
        );
        assert_eq!(framer.stats(), (3, 8));
    }

    #[tokio::test]
    async fn test_multibyte_delimiter_wrapping_the_ring() {
        let mut cfg = config(8, b"\r\n");
        cfg.read_chunk = 3;
        let input: &[u8] = b"abcde\r\nfg\r\nhijkl\r\n";
        let mut framer = Framer::new(&cfg, vec![mem("m", &[input])]).unwrap();
        let frames: Vec<Vec<u8>> = collect(&mut framer).await.iter().map(|f| f.bytes().to_vec()).collect();
        assert_eq!(frames, vec![b"abcde\r\n".to_vec(), b"fg\r\n".to_vec(), b"hijkl\r\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_oversize_flush() {
        let mut framer = Framer::new(&config(4, b"\n"), vec![mem("m", &[b"abcdefg\n"])]).unwrap();
        let frames = collect(&mut framer).await;
        assert_eq!(
            frames,
            vec![Frame::Partial(b"abcd".to_vec()), Frame::Complete(b"efg\n".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_wrapped_trailing_flush_keeps_storage() {
        let mut cfg = config(8, b"\n");
        cfg.read_chunk = 8;
        let src: Box<dyn ByteSource> = Box::new(MemorySource::from_bytes("m", b"abcdef\nghij"));
        let mut framer = Framer::new(&cfg, vec![src]).unwrap();
        let storage = framer.buffer.storage_ptr();

        let frames = collect(&mut framer).await;
        assert_eq!(
            frames,
            vec![Frame::Complete(b"abcdef\n".to_vec()), Frame::Trailing(b"ghij".to_vec())]
        );
        // "ghij" wrapped past the physical end; copying it out must not relay out.
        assert_eq!(framer.buffer.storage_ptr(), storage);
        assert_eq!(framer.stats(), (2, 11));
    }

    #[tokio::test]
    async fn test_oversize_error() {
        let mut cfg = config(4, b"\n");
        cfg.oversize = OversizePolicy::Error;
        let mut framer = Framer::new(&cfg, vec![mem("m", &[b"abcdefg\n"])]).unwrap();
        assert_eq!(framer.next_frame().await, Err(Error::FrameTooLarge { capacity: 4 }));
    }

    #[tokio::test]
    async fn test_idle_flush() {
        let mut cfg = config(16, b"\n");
        cfg.idle_flush_ms = 50;
        let src: Box<dyn ByteSource> = Box::new(MemorySource::new(
            "m",
            vec![Some(b"abc".to_vec()), None, Some(b"d\n".to_vec())],
        ));
        let mut framer = Framer::new(&cfg, vec![src]).unwrap();
        let frames = collect(&mut framer).await;
        assert_eq!(
            frames,
            vec![Frame::Partial(b"abc".to_vec()), Frame::Complete(b"d\n".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_trailing_dropped_when_disabled() {
        let mut cfg = config(16, b"\n");
        cfg.emit_trailing = false;
        let mut framer = Framer::new(&cfg, vec![mem("m", &[b"one\ntwo"])]).unwrap();
        let frames = collect(&mut framer).await;
        assert_eq!(frames, vec![Frame::Complete(b"one\n".to_vec())]);
        assert_eq!(framer.buffered(), 0);
    }

    #[tokio::test]
    async fn test_sources_are_concatenated() {
        let sources = vec![mem("a", &[b"x\ny"]), mem("b", &[b"z\n"])];
        let mut framer = Framer::new(&config(16, b"\n"), sources).unwrap();
        let frames = collect(&mut framer).await;
        assert_eq!(
            frames,
            vec![Frame::Complete(b"x\n".to_vec()), Frame::Complete(b"yz\n".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_write_buffered_after_wrap() {
        let mut cfg = config(8, b"|");
        cfg.read_chunk = 4;
        let mut framer = Framer::new(&cfg, vec![mem("m", &[b"abcdef|ghij"])]).unwrap();
        assert_eq!(
            framer.next_frame().await.unwrap(),
            Some(Frame::Complete(b"abcdef|".to_vec()))
        );
        // Pull "ghij" in without a delimiter; it wraps past the physical end.
        while framer.buffered() < 4 {
            let end = framer.buffer.remaining().min(framer.scratch.len());
            let outcome = framer.sources[0].read_chunk(&mut framer.scratch[..end], 0).await.unwrap();
            if let ReadOutcome::Data(n) = outcome {
                framer.buffer.append(&framer.scratch[..n]).unwrap();
            }
        }
        let mut sink = Vec::new();
        assert_eq!(framer.write_buffered(&mut sink).await.unwrap(), 4);
        assert_eq!(sink, b"ghij");
        assert_eq!(framer.buffered(), 0);
    }

    #[tokio::test]
    async fn test_from_config_opens_files() {
        let path = std::env::temp_dir().join(format!("ringstage-framer-{}.txt", std::process::id()));
        tokio::fs::write(&path, b"l1\nl2\n").await.unwrap();

        let mut cfg = config(16, b"\n");
        cfg.sources = vec![SourceConfig {
            id: "file".to_string(),
            kind: SourceKind::File,
            path: Some(path.to_string_lossy().into_owned()),
            enabled: true,
        }];
        let mut framer = Framer::from_config(cfg).await.unwrap();
        let frames = collect(&mut framer).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].bytes(), b"l2\n");

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
