//! Serialized request/response exchange with the engine
//!
//! The protocol has no pipelining: a command must not be written until the
//! previous one has a reply or has timed out. All callers go through one
//! async mutex that guards both the connection and the codec.

use crate::codec::{Codec, Command, Decoded, Response};
use crate::config::BridgeConfig;
use crate::connection::{Connection, ConnectionState};
use placer_core::{PlacerError, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, timeout_at};
use tracing::{debug, warn};

struct Wire {
    connection: Connection,
    codec: Codec,
}

/// Sends one command at a time and waits for its reply
pub struct Dispatcher {
    wire: Mutex<Wire>,
    command_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher for the configured endpoint (not connected yet)
    pub fn new(config: BridgeConfig) -> Self {
        Self::from_connection(Connection::new(config))
    }

    pub fn from_connection(connection: Connection) -> Self {
        let codec = Codec::new(connection.config().wire);
        let command_timeout = connection.config().command_timeout;
        Self {
            wire: Mutex::new(Wire { connection, codec }),
            command_timeout,
        }
    }

    /// Connect with the configured retry budget
    pub async fn connect(&self) -> Result<()> {
        self.wire.lock().await.connection.connect().await
    }

    /// Use an already-open stream as the transport
    pub async fn attach<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.wire.lock().await.connection.attach(stream).await
    }

    pub async fn disconnect(&self) {
        self.wire.lock().await.connection.disconnect().await;
    }

    pub async fn state(&self) -> ConnectionState {
        self.wire.lock().await.connection.state()
    }

    pub async fn is_connected(&self) -> bool {
        self.wire.lock().await.connection.is_connected()
    }

    /// Issue a no-op command; false on any failure or error reply
    pub async fn is_healthy(&self) -> bool {
        match self.send(&Command::status()).await {
            Ok(response) => response.is_ok(),
            Err(e) => {
                debug!("Health check failed: {}", e);
                false
            }
        }
    }

    /// Send a command and wait for its reply.
    ///
    /// An `error` reply is returned as a `Response`; interpreting it is up to
    /// the caller. The timeout covers the write and the wait for the reply.
    /// Timeouts and socket failures leave the connection
    /// disconnected. Unparseable replies fail with `Protocol` and leave the
    /// connection usable.
    pub async fn send(&self, command: &Command) -> Result<Response> {
        let mut guard = self.wire.lock().await;
        let Wire { connection, codec } = &mut *guard;

        if !connection.is_connected() {
            return Err(PlacerError::NotConnected);
        }

        let deadline = Instant::now() + self.command_timeout;
        let (tag, payload) = codec.encode(command);
        debug!("[Rust→Engine] {}", command);
        match timeout_at(deadline, connection.write_message(&payload)).await {
            Err(_) => {
                connection.mark_disconnected("engine stopped reading");
                return Err(PlacerError::CommandTimeout(self.command_timeout));
            }
            Ok(Err(e)) => {
                connection.settle();
                return Err(e);
            }
            Ok(Ok(())) => {}
        }

        loop {
            let frame = match timeout_at(deadline, connection.read_message()).await {
                Err(_) => {
                    connection.mark_disconnected("no reply before timeout");
                    return Err(PlacerError::CommandTimeout(self.command_timeout));
                }
                Ok(Err(e)) => {
                    connection.settle();
                    return Err(e);
                }
                Ok(Ok(frame)) => frame,
            };

            let preview: String = String::from_utf8_lossy(&frame).chars().take(200).collect();
            debug!("[Engine→Rust] len={} {}", frame.len(), preview);

            match codec.decode(tag, &frame) {
                Ok(Decoded::Reply(response)) => {
                    connection.settle();
                    return Ok(response);
                }
                Ok(Decoded::Stale { tag: stale }) => {
                    warn!("Discarding stale reply for request {}", stale);
                }
                Err(e) => {
                    connection.settle();
                    return Err(e);
                }
            }
        }
    }
}
