//! # placer-session
//!
//! Session layer for the runtime placer.
//!
//! This crate provides:
//! - `ObjectRegistry` tracking spawned objects and per-component confirmation
//! - `Session` state machine with bounded reconnect and re-verification
//! - Operator request grammar (`ControlRequest`) and the request queue
//! - `AssetImporter` abstraction with a console-snippet implementation

pub mod control;
pub mod importer;
pub mod registry;
pub mod session;

#[cfg(test)]
mod testing;

pub use control::{ControlReply, ControlRequest};
pub use importer::{AssetImporter, ConsoleImporter, ImportRequest};
pub use registry::{ComponentFailure, ObjectRegistry, Placement, PlacementOutcome};
pub use session::{
    Envelope, Session, SessionConfig, SessionHandle, SessionReport, SessionState, request_queue,
};
