//! # placer-core
//!
//! Core types for the runtime placer.
//!
//! This crate provides the foundational types shared by the bridge and the
//! session controller:
//! - Error taxonomy and exit codes
//! - Transform types and coordinate parsing
//! - Spawned object model with per-component confirmation
//! - Blueprint class path normalization

pub mod blueprint;
pub mod error;
pub mod object;
pub mod transform;

pub use error::{PlacerError, Result, exit_codes};
pub use object::{Confirmation, ObjectId, SpawnedObject, TransformUpdate};
pub use transform::{Rotator, Transform, TransformComponent, Vec3, parse_triple};
