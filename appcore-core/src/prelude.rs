//! Prelude for convenient imports.
//!
//! This module re-exports the most commonly used types and traits.
//!
//! # Example
//!
//! ```
//! use appcore_core::prelude::*;
//! ```

// Identifiers
pub use crate::types::{
    AccessorId, DeviceId, GroupId, ModuleId, NetworkId, ResourceId, VariablePath,
};

// Error handling
pub use crate::error::{AppCoreError, Result};

// Versions and validity
pub use crate::validity::{
    DataValidity, FaultCounter, ModuleValidity, NetworkInvalidity, ReadValidity, WriteValidity,
};
pub use crate::version::VersionNumber;

// Values
pub use crate::value::{DataType, UserType, Value, Void};

// Dependency analysis
pub use crate::graph::{
    detect_circular_networks, CircularDependencyDetector, Edge, GraphNode, ModuleGraph,
    NetworkTable,
};
