//! Socket lifecycle for the engine connection
//!
//! Owns the transport halves and the connection state. Any read or write
//! failure drops the transport and moves the state to `Disconnected`; the
//! caller sees the error on the current call and `NotConnected` afterwards.

use crate::config::BridgeConfig;
use crate::framing::Framing;
use crate::transport::{AsyncReader, AsyncWriter, FramedReader, FramedWriter};
use placer_core::{PlacerError, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    /// A request has been written and its reply is outstanding
    AwaitingResponse,
}

/// Connection to the engine's command socket
pub struct Connection {
    config: BridgeConfig,
    framing: Arc<dyn Framing>,
    state: ConnectionState,
    reader: Option<Box<dyn AsyncReader>>,
    writer: Option<Box<dyn AsyncWriter>>,
}

impl Connection {
    /// Create a new connection (not connected yet)
    pub fn new(config: BridgeConfig) -> Self {
        let framing = config.wire.framing();
        Self {
            config,
            framing,
            state: ConnectionState::Disconnected,
            reader: None,
            writer: None,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    /// Open the socket, retrying with backoff until the attempt budget is spent
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let address = self.config.address();
        let attempts = self.config.max_attempts.max(1);
        info!("Connecting to engine at {}", address);

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            let connect = TcpStream::connect((self.config.host.as_str(), self.config.port));
            match timeout(self.config.connect_timeout, connect).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("set_nodelay failed: {}", e);
                    }
                    let (read_half, write_half) = stream.into_split();
                    let installed = self
                        .install(
                            Box::new(FramedReader::new(read_half, self.framing.clone())),
                            Box::new(FramedWriter::new(write_half, self.framing.clone())),
                        )
                        .await;
                    match installed {
                        Ok(()) => {
                            info!("Connected to engine at {} (attempt {})", address, attempt);
                            return Ok(());
                        }
                        Err(e) => last_error = e.to_string(),
                    }
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("timed out after {:?}", self.config.connect_timeout)
                }
            }

            if attempt < attempts {
                let delay = self.config.backoff(attempt);
                info!(
                    "Waiting for engine connection... {}/{} ({}), retrying in {:?}",
                    attempt, attempts, last_error, delay
                );
                sleep(delay).await;
            }
        }

        Err(PlacerError::Connection(format!(
            "could not reach {} after {} attempts: {}",
            address, attempts, last_error
        )))
    }

    /// Use an already-open duplex stream as the transport
    pub async fn attach<S>(&mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        self.install(
            Box::new(FramedReader::new(read_half, self.framing.clone())),
            Box::new(FramedWriter::new(write_half, self.framing.clone())),
        )
        .await
    }

    /// Take over the transport halves; consumes the greeting when the wire has one
    async fn install(
        &mut self,
        reader: Box<dyn AsyncReader>,
        writer: Box<dyn AsyncWriter>,
    ) -> Result<()> {
        self.reader = Some(reader);
        self.writer = Some(writer);
        if self.config.wire.greets_on_connect() {
            if let Err(e) = self.read_greeting().await {
                self.reader = None;
                self.writer = None;
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        }
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// The first frame must be the server's `connected to ...` banner
    async fn read_greeting(&mut self) -> Result<()> {
        let reader = self.reader.as_mut().ok_or(PlacerError::NotConnected)?;
        let frame = match timeout(self.config.connect_timeout, reader.read_message()).await {
            Ok(frame) => frame?,
            Err(_) => {
                return Err(PlacerError::Connection(format!(
                    "no greeting within {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        let greeting = String::from_utf8_lossy(&frame);
        let greeting = greeting.trim();
        if !greeting.to_ascii_lowercase().starts_with("connected") {
            let preview: String = greeting.chars().take(80).collect();
            return Err(PlacerError::Connection(format!(
                "unexpected greeting '{}'",
                preview
            )));
        }
        info!("Engine greeting: {}", greeting);
        Ok(())
    }

    /// Close the socket. Safe to call when already disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.reader = None;
        if self.state != ConnectionState::Disconnected {
            info!("Disconnected from engine");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Drop the transport after a failure
    pub(crate) fn mark_disconnected(&mut self, reason: &str) {
        if self.state != ConnectionState::Disconnected {
            warn!("Engine connection lost: {}", reason);
        }
        self.reader = None;
        self.writer = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Request resolved; ready for the next one
    pub(crate) fn settle(&mut self) {
        if self.state == ConnectionState::AwaitingResponse {
            self.state = ConnectionState::Connected;
        }
    }

    pub(crate) async fn write_message(&mut self, data: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(PlacerError::NotConnected)?;
        match writer.write_message(data).await {
            Ok(()) => {
                self.state = ConnectionState::AwaitingResponse;
                Ok(())
            }
            Err(e) => {
                if e.is_connection_loss() {
                    self.mark_disconnected(&e.to_string());
                }
                Err(e)
            }
        }
    }

    pub(crate) async fn read_message(&mut self) -> Result<Vec<u8>> {
        let reader = self.reader.as_mut().ok_or(PlacerError::NotConnected)?;
        match reader.read_message().await {
            Ok(data) => Ok(data),
            Err(e) => {
                if e.is_connection_loss() {
                    self.mark_disconnected(&e.to_string());
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireProfile;
    use crate::framing::UnrealCvFraming;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::time::Duration;

    fn fast_config(port: u16) -> BridgeConfig {
        BridgeConfig {
            connect_timeout: Duration::from_millis(200),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            wire: WireProfile::Line,
            ..BridgeConfig::with_address("127.0.0.1", port)
        }
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let mut conn = Connection::new(fast_config(port));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        accept.await.unwrap().unwrap();

        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        // Idempotent
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_budget() {
        // Grab a free port, then close it so connects are refused
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut conn = Connection::new(fast_config(port));
        match conn.connect().await {
            Err(PlacerError::Connection(msg)) => assert!(msg.contains("after 3 attempts")),
            other => panic!("expected connection error, got {:?}", other),
        }
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_io_without_transport_is_not_connected() {
        let mut conn = Connection::new(fast_config(1));
        assert!(matches!(
            conn.write_message(b"vget /unrealcv/status").await,
            Err(PlacerError::NotConnected)
        ));
        assert!(matches!(
            conn.read_message().await,
            Err(PlacerError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_peer_close_marks_disconnected() {
        let (client, server) = tokio::io::duplex(64);
        let mut conn = Connection::new(fast_config(1));
        conn.attach(client).await.unwrap();
        drop(server);

        assert!(matches!(
            conn.read_message().await,
            Err(PlacerError::Connection(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_consumes_unrealcv_greeting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let engine = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let greeting = UnrealCvFraming.encode(b"connected to Demo").unwrap();
            let reply = UnrealCvFraming.encode(b"0:ok").unwrap();
            stream.write_all(&greeting).await.unwrap();
            stream.write_all(&reply).await.unwrap();
            stream
        });

        let mut conn = Connection::new(BridgeConfig {
            wire: WireProfile::UnrealCv,
            ..fast_config(port)
        });
        conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        // The banner is gone; the next frame is the first reply
        assert_eq!(conn.read_message().await.unwrap(), b"0:ok");
        let _stream = engine.await.unwrap();
    }

    #[tokio::test]
    async fn test_unexpected_greeting_rejects_attach() {
        let (client, mut server) = tokio::io::duplex(256);
        let frame = UnrealCvFraming.encode(b"0:ok Is Listening").unwrap();
        server.write_all(&frame).await.unwrap();

        let mut conn = Connection::new(BridgeConfig {
            wire: WireProfile::UnrealCv,
            ..fast_config(1)
        });
        match conn.attach(client).await {
            Err(PlacerError::Connection(msg)) => assert!(msg.contains("unexpected greeting")),
            other => panic!("expected greeting error, got {:?}", other),
        }
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_missing_greeting_fails_each_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let engine = tokio::spawn(async move {
            let mut held = Vec::new();
            for _ in 0..3 {
                let (stream, _) = listener.accept().await.unwrap();
                held.push(stream);
            }
            held
        });

        let mut conn = Connection::new(BridgeConfig {
            wire: WireProfile::UnrealCv,
            connect_timeout: Duration::from_millis(50),
            ..fast_config(port)
        });
        match conn.connect().await {
            Err(PlacerError::Connection(msg)) => {
                assert!(msg.contains("after 3 attempts"));
                assert!(msg.contains("no greeting"));
            }
            other => panic!("expected connection error, got {:?}", other),
        }
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        let _held = engine.await.unwrap();
    }
}
