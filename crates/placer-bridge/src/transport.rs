//! Transport abstractions for the engine socket
//!
//! Provides AsyncReader/AsyncWriter traits that read and write one complete
//! frame at a time, and generic implementations over any tokio byte stream
//! using a pluggable [`Framing`].

use crate::framing::Framing;
use async_trait::async_trait;
use placer_core::{PlacerError, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Trait for async reading from a transport
#[async_trait]
pub trait AsyncReader: Send {
    /// Read one complete frame payload.
    ///
    /// I/O failures and end-of-stream are `Connection` errors; malformed
    /// frames are `Protocol` errors.
    async fn read_message(&mut self) -> Result<Vec<u8>>;
}

/// Trait for async writing to a transport
#[async_trait]
pub trait AsyncWriter: Send {
    /// Frame and write one payload, then flush
    async fn write_message(&mut self, data: &[u8]) -> Result<()>;

    /// Close the write side
    async fn shutdown(&mut self) -> Result<()>;
}

/// Buffers partial reads until the framing yields a complete payload
pub struct FramedReader<R> {
    inner: R,
    framing: Arc<dyn Framing>,
    buf: Vec<u8>,
}

impl<R> FramedReader<R> {
    pub fn new(inner: R, framing: Arc<dyn Framing>) -> Self {
        Self {
            inner,
            framing,
            buf: Vec::with_capacity(4096),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AsyncReader for FramedReader<R> {
    async fn read_message(&mut self) -> Result<Vec<u8>> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(payload) = self.framing.decode(&mut self.buf)? {
                return Ok(payload);
            }

            let n = self
                .inner
                .read(&mut chunk)
                .await
                .map_err(|e| PlacerError::Connection(format!("Read failed: {}", e)))?;
            if n == 0 {
                return Err(PlacerError::Connection(if self.buf.is_empty() {
                    "Connection closed by engine".to_string()
                } else {
                    format!(
                        "Connection closed by engine mid-frame ({} bytes buffered)",
                        self.buf.len()
                    )
                }));
            }
            trace!("read {} bytes", n);
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Frames payloads and writes them to the underlying stream
pub struct FramedWriter<W> {
    inner: W,
    framing: Arc<dyn Framing>,
}

impl<W> FramedWriter<W> {
    pub fn new(inner: W, framing: Arc<dyn Framing>) -> Self {
        Self { inner, framing }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> AsyncWriter for FramedWriter<W> {
    async fn write_message(&mut self, data: &[u8]) -> Result<()> {
        let frame = self.framing.encode(data)?;

        self.inner
            .write_all(&frame)
            .await
            .map_err(|e| PlacerError::Connection(format!("Write failed: {}", e)))?;

        // Flush to ensure data is sent
        self.inner
            .flush()
            .await
            .map_err(|e| PlacerError::Connection(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| PlacerError::Connection(format!("Shutdown failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{LineFraming, UnrealCvFraming};
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_line_reply_split_across_reads() {
        let mock = Builder::new()
            .read(b"ok pay")
            .read(b"load id=4")
            .read(b"2\nerror second\n")
            .build();
        let mut reader = FramedReader::new(mock, Arc::new(LineFraming));

        assert_eq!(reader.read_message().await.unwrap(), b"ok payload id=42");
        assert_eq!(reader.read_message().await.unwrap(), b"error second");
    }

    #[tokio::test]
    async fn test_unrealcv_reply_split_across_reads() {
        let frame = UnrealCvFraming.encode(b"3:ok").unwrap();
        let mock = Builder::new()
            .read(&frame[..3])
            .read(&frame[3..10])
            .read(&frame[10..])
            .build();
        let mut reader = FramedReader::new(mock, Arc::new(UnrealCvFraming));

        assert_eq!(reader.read_message().await.unwrap(), b"3:ok");
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_connection_error() {
        let mock = Builder::new().read(b"ok trunc").build();
        let mut reader = FramedReader::new(mock, Arc::new(LineFraming));

        match reader.read_message().await {
            Err(PlacerError::Connection(msg)) => assert!(msg.contains("mid-frame")),
            other => panic!("expected connection error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writer_applies_framing() {
        let mock = Builder::new().write(b"vget /unrealcv/status\n").build();
        let mut writer = FramedWriter::new(mock, Arc::new(LineFraming));

        writer.write_message(b"vget /unrealcv/status").await.unwrap();
    }
}
