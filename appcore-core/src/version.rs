//! Globally ordered version numbers.
//!
//! Every transfer carries a [`VersionNumber`]. Fresh numbers come from one
//! process-wide counter, so any two numbers are comparable and a number
//! generated later always compares greater. A number generated once for a
//! fault event can be attached to many updates to correlate them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// A monotonic, comparable version tag.
///
/// The null version (`VersionNumber::null()`) is smaller than every
/// generated version and marks "never written".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionNumber(u64);

impl VersionNumber {
    /// Generate a new version number, greater than all previously generated ones.
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_VERSION.fetch_add(1, Ordering::SeqCst))
    }

    /// The null version.
    #[must_use]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Whether this is the null version.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Raw value, for diagnostics.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for VersionNumber {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("v_null")
        } else {
            write!(f, "v_{}", self.0)
        }
    }
}
