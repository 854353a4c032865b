//! Strongly-typed identifiers for appcore entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident($inner:ty), $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Create an identifier from a raw value.
            #[must_use]
            pub const fn new(id: $inner) -> Self {
                Self(id)
            }

            /// Get the raw identifier value.
            #[must_use]
            pub const fn raw(&self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(id: $inner) -> Self {
                Self(id)
            }
        }
    };
}

define_id!(
    /// Identifier for an application module.
    ///
    /// Module IDs are assigned in registration order at assembly time.
    ModuleId(u32),
    "module"
);

define_id!(
    /// Identifier for a device session.
    DeviceId(u32),
    "device"
);

define_id!(
    /// Identifier of a low-level resource (bus, socket, file) used by a backend.
    ///
    /// Sessions sharing a resource ID are recovered together.
    ResourceId(u64),
    "resource"
);

define_id!(
    /// Identifier of a circular dependency network. Never zero.
    NetworkId(u32),
    "network"
);

define_id!(
    /// Identifier of a recovery group.
    GroupId(u32),
    "group"
);

/// Identifier for a single accessor, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessorId(u64);

static NEXT_ACCESSOR_ID: AtomicU64 = AtomicU64::new(1);

impl AccessorId {
    /// Allocate a fresh accessor ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_ACCESSOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AccessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "accessor_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display() {
        assert_eq!(format!("{}", ModuleId::new(5)), "module_5");
        assert_eq!(format!("{}", DeviceId::new(2)), "device_2");
        assert_eq!(format!("{}", ResourceId::new(77)), "resource_77");
        assert_eq!(format!("{}", NetworkId::new(1)), "network_1");
    }

    #[test]
    fn ids_are_ordered() {
        assert!(ModuleId::new(1) < ModuleId::new(2));
        assert_eq!(GroupId::from(3).raw(), 3);
    }

    #[test]
    fn accessor_ids_are_unique() {
        let a = AccessorId::next();
        let b = AccessorId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&DeviceId::new(9)).unwrap();
        assert_eq!(json, "9");
        let back: ModuleId = serde_json::from_str("12").unwrap();
        assert_eq!(back, ModuleId::new(12));
    }
}
