//! appcore Core Library
//!
//! This crate provides the foundational types for the appcore control-system
//! runtime: identifiers, version numbers, typed values, data validity
//! bookkeeping and module dependency analysis.
//!
//! # Key Components
//!
//! - **Version**: Globally ordered version numbers carried by every transfer
//! - **Validity**: Fault counters and the read/write validity rules
//! - **Value**: Tagged union over the supported element types
//! - **Graph**: Module dependency graph and circular network detection
//!
//! # Example
//!
//! ```
//! use appcore_core::prelude::*;
//!
//! let owner = ModuleValidity::new(ModuleId::new(0));
//! let mut input = ReadValidity::new(false);
//! assert_eq!(input.current(), DataValidity::Faulty);
//!
//! input.on_post_read(&owner, DataValidity::Faulty);
//! assert_eq!(owner.validity(), DataValidity::Faulty);
//! input.on_post_read(&owner, DataValidity::Ok);
//! assert_eq!(owner.counter().get(), 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod graph;
pub mod prelude;
pub mod types;
pub mod validity;
pub mod value;
pub mod version;

// Re-export key types at crate root for convenience
pub use error::{AppCoreError, Result};
pub use graph::{detect_circular_networks, ModuleGraph, NetworkTable};
pub use types::{AccessorId, DeviceId, GroupId, ModuleId, NetworkId, ResourceId, VariablePath};
pub use validity::{
    DataValidity, FaultCounter, ModuleValidity, NetworkInvalidity, ReadValidity, WriteValidity,
};
pub use value::{DataType, UserType, Value, Void};
pub use version::VersionNumber;
