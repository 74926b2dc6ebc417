//! Engine command bridge for the runtime placer
//!
//! This crate provides:
//! - Command/response codec for the engine's text protocol
//! - Pluggable framing (newline or UnrealCV magic + length)
//! - Transport abstractions (AsyncReader/AsyncWriter traits)
//! - Connection lifecycle with bounded retry and backoff
//! - A dispatcher that keeps exactly one request in flight

pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod framing;
pub mod transport;

pub use codec::{Codec, Command, Decoded, Response, Status, WireProfile};
pub use config::BridgeConfig;
pub use connection::{Connection, ConnectionState};
pub use dispatcher::Dispatcher;
pub use framing::{Framing, LineFraming, UnrealCvFraming};
pub use transport::{AsyncReader, AsyncWriter, FramedReader, FramedWriter};
