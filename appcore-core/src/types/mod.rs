//! Core types for appcore.
//!
//! This module provides the identifiers used throughout the runtime:
//! - `ModuleId`: Identifier for an application module
//! - `DeviceId`: Identifier for a device session
//! - `ResourceId`: Identifier of a physical resource a backend touches
//! - `NetworkId`: Identifier of a circular dependency network
//! - `GroupId`: Identifier of a recovery group
//! - `AccessorId`: Identifier of a single accessor
//! - `VariablePath`: Normalised hierarchical variable name

mod ids;
mod path;

pub use ids::{AccessorId, DeviceId, GroupId, ModuleId, NetworkId, ResourceId};
pub use path::VariablePath;
