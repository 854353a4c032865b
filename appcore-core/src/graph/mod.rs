//! Module dependency analysis.
//!
//! - `ModuleGraph`: push dependencies between application modules
//! - `CircularDependencyDetector`: assigns modules on cycles to networks

mod circular;
mod module_graph;

pub use circular::{detect_circular_networks, CircularDependencyDetector, NetworkTable};
pub use module_graph::{Edge, GraphNode, ModuleGraph};
