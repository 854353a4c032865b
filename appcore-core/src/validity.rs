//! Data validity and fault counting.
//!
//! Every module owns a fault counter. Inputs bump it when their incoming
//! data turns faulty and release it when the data becomes ok again; the
//! module's validity is derived from the counter and stamped onto every
//! output it writes.
//!
//! Modules inside a circular dependency network additionally share a
//! network-wide counter which only external inputs contribute to. Without
//! it, a faulty flag entering the cycle would keep itself alive forever.

use crate::types::{ModuleId, NetworkId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Validity flag carried by every transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataValidity {
    /// Data is trustworthy.
    #[default]
    Ok,
    /// Data is derived from a faulty source.
    Faulty,
}

impl DataValidity {
    /// Whether the flag is `Ok`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Whether the flag is `Faulty`.
    pub fn is_faulty(&self) -> bool {
        matches!(self, Self::Faulty)
    }

    /// `Ok` only if both flags are `Ok`.
    pub fn and(self, other: Self) -> Self {
        if self.is_ok() && other.is_ok() {
            Self::Ok
        } else {
            Self::Faulty
        }
    }
}

impl fmt::Display for DataValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Faulty => f.write_str("faulty"),
        }
    }
}

/// A non-negative counter of faulty contributions.
///
/// Increments and decrements must pair. A decrement at zero is a bug in the
/// caller: it is clamped and reported, never propagated as underflow.
#[derive(Debug)]
pub struct FaultCounter {
    owner: String,
    count: AtomicU64,
}

impl FaultCounter {
    /// Create a counter at zero. `owner` names it in diagnostics.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            count: AtomicU64::new(0),
        }
    }

    /// Add one faulty contribution. Returns the new count.
    pub fn increment(&self) -> u64 {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Remove one faulty contribution. Returns the new count.
    pub fn decrement(&self) -> u64 {
        let result = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
        match result {
            Ok(previous) => previous - 1,
            Err(_) => {
                tracing::error!(
                    owner = %self.owner,
                    "Fault counter decremented below zero; increments and decrements are unpaired"
                );
                0
            }
        }
    }

    /// Current count.
    pub fn get(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// `Faulty` if the count is non-zero.
    pub fn validity(&self) -> DataValidity {
        if self.get() > 0 {
            DataValidity::Faulty
        } else {
            DataValidity::Ok
        }
    }
}

/// Shared invalidity state of one circular dependency network.
#[derive(Debug)]
pub struct NetworkInvalidity {
    id: NetworkId,
    counter: FaultCounter,
}

impl NetworkInvalidity {
    /// Create the state for a network.
    pub fn new(id: NetworkId) -> Self {
        Self {
            id,
            counter: FaultCounter::new(format!("{}", id)),
        }
    }

    /// The network this state belongs to.
    pub fn id(&self) -> NetworkId {
        self.id
    }

    /// The network-wide counter.
    pub fn counter(&self) -> &FaultCounter {
        &self.counter
    }
}

/// Validity bookkeeping of one module.
#[derive(Debug)]
pub struct ModuleValidity {
    module: ModuleId,
    counter: FaultCounter,
    network: Option<Arc<NetworkInvalidity>>,
}

impl ModuleValidity {
    /// Validity state for a module outside any circular network.
    pub fn new(module: ModuleId) -> Self {
        Self {
            module,
            counter: FaultCounter::new(format!("{}", module)),
            network: None,
        }
    }

    /// Validity state for a module that belongs to a circular network.
    pub fn in_network(module: ModuleId, network: Arc<NetworkInvalidity>) -> Self {
        Self {
            module,
            counter: FaultCounter::new(format!("{}", module)),
            network: Some(network),
        }
    }

    /// The owning module.
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// The module's own fault counter.
    pub fn counter(&self) -> &FaultCounter {
        &self.counter
    }

    /// The circular network, if any.
    pub fn network(&self) -> Option<&Arc<NetworkInvalidity>> {
        self.network.as_ref()
    }

    /// Derived validity of the module.
    ///
    /// Inside a circular network a non-zero module counter only makes the
    /// module faulty while the network counter is non-zero too.
    pub fn validity(&self) -> DataValidity {
        if self.counter.get() == 0 {
            return DataValidity::Ok;
        }
        match &self.network {
            None => DataValidity::Faulty,
            Some(network) => network.counter().validity(),
        }
    }
}

/// Read-side validity decorator state of one input accessor.
#[derive(Debug, Clone)]
pub struct ReadValidity {
    /// Validity last accounted in the owner's counter. Baseline is `Ok`.
    observed: DataValidity,
    /// Validity visible to the module. `Faulty` until the first update.
    current: DataValidity,
    /// Fed by a module of the same circular network.
    circular_input: bool,
}

impl ReadValidity {
    /// State for a freshly constructed input.
    pub fn new(circular_input: bool) -> Self {
        Self {
            observed: DataValidity::Ok,
            current: DataValidity::Faulty,
            circular_input,
        }
    }

    /// Validity of the data currently held by the accessor.
    pub fn current(&self) -> DataValidity {
        self.current
    }

    /// Whether this input is fed from inside its owner's circular network.
    pub fn is_circular_input(&self) -> bool {
        self.circular_input
    }

    /// Account an incoming update. Counters change only on transitions.
    pub fn on_post_read(&mut self, owner: &ModuleValidity, incoming: DataValidity) {
        if incoming != self.observed {
            let external = !self.circular_input;
            match incoming {
                DataValidity::Faulty => {
                    owner.counter().increment();
                    if external {
                        if let Some(network) = owner.network() {
                            network.counter().increment();
                        }
                    }
                }
                DataValidity::Ok => {
                    owner.counter().decrement();
                    if external {
                        if let Some(network) = owner.network() {
                            network.counter().decrement();
                        }
                    }
                }
            }
            self.observed = incoming;
        }
        self.current = incoming;
    }

    /// Release whatever this accessor still contributes to the counters.
    pub fn release(&mut self, owner: &ModuleValidity) {
        self.on_post_read(owner, DataValidity::Ok);
    }
}

/// Write-side validity decorator state of one output accessor.
#[derive(Debug, Clone, Default)]
pub struct WriteValidity {
    /// Explicit per-accessor override set by module code.
    explicit: DataValidity,
    /// Explicit flag last accounted in the network counter.
    accounted: DataValidity,
}

impl WriteValidity {
    /// State for a freshly constructed output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the explicit flag. It stays until explicitly set back to `Ok`.
    pub fn set_explicit(&mut self, validity: DataValidity) {
        self.explicit = validity;
    }

    /// The explicit flag.
    pub fn explicit(&self) -> DataValidity {
        self.explicit
    }

    /// Compute the outgoing validity for a write.
    ///
    /// `owner` is `None` for outputs without an owning module (device
    /// status variables); those only honour the explicit flag.
    pub fn on_pre_write(&mut self, owner: Option<&ModuleValidity>) -> DataValidity {
        let Some(owner) = owner else {
            return self.explicit;
        };
        if let Some(network) = owner.network() {
            if self.explicit != self.accounted {
                match self.explicit {
                    DataValidity::Faulty => network.counter().increment(),
                    DataValidity::Ok => network.counter().decrement(),
                };
                self.accounted = self.explicit;
            }
        }
        self.explicit.and(owner.validity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> ModuleValidity {
        ModuleValidity::new(ModuleId::new(1))
    }

    #[test]
    fn counter_never_underflows() {
        let counter = FaultCounter::new("test");
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.get(), 0);
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.decrement(), 0);
    }

    #[test]
    fn input_starts_faulty_without_touching_counter() {
        let owner = module();
        let input = ReadValidity::new(false);
        assert_eq!(input.current(), DataValidity::Faulty);
        assert_eq!(owner.counter().get(), 0);
        assert_eq!(owner.validity(), DataValidity::Ok);
    }

    #[test]
    fn read_transitions_pair_up() {
        let owner = module();
        let mut input = ReadValidity::new(false);

        input.on_post_read(&owner, DataValidity::Faulty);
        assert_eq!(owner.counter().get(), 1);
        input.on_post_read(&owner, DataValidity::Faulty);
        assert_eq!(owner.counter().get(), 1);
        assert_eq!(owner.validity(), DataValidity::Faulty);

        input.on_post_read(&owner, DataValidity::Ok);
        assert_eq!(owner.counter().get(), 0);
        input.on_post_read(&owner, DataValidity::Ok);
        assert_eq!(owner.counter().get(), 0);
    }

    #[test]
    fn two_faulty_inputs_need_two_recoveries() {
        let owner = module();
        let mut a = ReadValidity::new(false);
        let mut b = ReadValidity::new(false);
        a.on_post_read(&owner, DataValidity::Faulty);
        b.on_post_read(&owner, DataValidity::Faulty);
        assert_eq!(owner.counter().get(), 2);
        a.on_post_read(&owner, DataValidity::Ok);
        assert_eq!(owner.validity(), DataValidity::Faulty);
        b.on_post_read(&owner, DataValidity::Ok);
        assert_eq!(owner.validity(), DataValidity::Ok);
    }

    #[test]
    fn write_combines_owner_and_explicit_flag() {
        let owner = module();
        let mut output = WriteValidity::new();
        assert_eq!(output.on_pre_write(Some(&owner)), DataValidity::Ok);

        // An ok module can force one output faulty.
        output.set_explicit(DataValidity::Faulty);
        assert_eq!(output.on_pre_write(Some(&owner)), DataValidity::Faulty);

        // A faulty module cannot force an output ok.
        output.set_explicit(DataValidity::Ok);
        owner.counter().increment();
        assert_eq!(output.on_pre_write(Some(&owner)), DataValidity::Faulty);
    }

    #[test]
    fn ownerless_output_uses_explicit_flag() {
        let mut output = WriteValidity::new();
        assert_eq!(output.on_pre_write(None), DataValidity::Ok);
        output.set_explicit(DataValidity::Faulty);
        assert_eq!(output.on_pre_write(None), DataValidity::Faulty);
    }

    #[test]
    fn circular_inputs_do_not_latch_network() {
        let network = Arc::new(NetworkInvalidity::new(NetworkId::new(1)));
        let a = ModuleValidity::in_network(ModuleId::new(1), Arc::clone(&network));
        let b = ModuleValidity::in_network(ModuleId::new(2), Arc::clone(&network));

        // External input of A goes faulty.
        let mut external = ReadValidity::new(false);
        external.on_post_read(&a, DataValidity::Faulty);
        assert_eq!(a.validity(), DataValidity::Faulty);

        // B sees A's faulty output through the cycle.
        let mut from_a = ReadValidity::new(true);
        from_a.on_post_read(&b, DataValidity::Faulty);
        assert_eq!(b.validity(), DataValidity::Faulty);

        // A's external input recovers: the whole network is ok again even
        // though B still holds a faulty circular input.
        external.on_post_read(&a, DataValidity::Ok);
        assert_eq!(network.counter().get(), 0);
        assert_eq!(b.counter().get(), 1);
        assert_eq!(b.validity(), DataValidity::Ok);
    }

    #[test]
    fn explicit_faulty_output_counts_into_network() {
        let network = Arc::new(NetworkInvalidity::new(NetworkId::new(3)));
        let owner = ModuleValidity::in_network(ModuleId::new(1), Arc::clone(&network));
        let mut output = WriteValidity::new();

        output.set_explicit(DataValidity::Faulty);
        assert_eq!(output.on_pre_write(Some(&owner)), DataValidity::Faulty);
        assert_eq!(network.counter().get(), 1);
        // Writing again does not count twice.
        output.on_pre_write(Some(&owner));
        assert_eq!(network.counter().get(), 1);

        output.set_explicit(DataValidity::Ok);
        assert_eq!(output.on_pre_write(Some(&owner)), DataValidity::Ok);
        assert_eq!(network.counter().get(), 0);
    }
}
