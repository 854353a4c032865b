//! Detection of modules waiting on each other for initial values.
//!
//! Before a module enters its main loop it reads an initial value from
//! every input. Modules on a cycle that all wait for each other, without
//! any of them writing an initial value first, would block forever. Waiting
//! modules register here, and after a grace period a waiter follows the
//! chain of feeders to see whether it leads back to itself.

use parking_lot::Mutex;
use std::collections::BTreeMap;

use appcore_core::types::{ModuleId, VariablePath};

#[derive(Debug, Clone)]
struct Waiter {
    name: String,
    path: VariablePath,
    feeder: Option<ModuleId>,
}

/// Registry of modules currently waiting for an initial value.
#[derive(Debug, Default)]
pub struct DependencyWaitDetector {
    waiting: Mutex<BTreeMap<ModuleId, Waiter>>,
}

impl DependencyWaitDetector {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// `module` starts waiting on `path`, fed by `feeder` (if a module).
    pub fn begin(
        &self,
        module: ModuleId,
        name: &str,
        path: &VariablePath,
        feeder: Option<ModuleId>,
    ) {
        self.waiting.lock().insert(
            module,
            Waiter {
                name: name.to_string(),
                path: path.clone(),
                feeder,
            },
        );
    }

    /// `module` stopped waiting.
    pub fn end(&self, module: ModuleId) {
        self.waiting.lock().remove(&module);
    }

    /// Follow the feeders of waiting modules starting at `start`. Returns a
    /// readable chain if it leads back to `start`.
    pub fn find_cycle(&self, start: ModuleId) -> Option<String> {
        let waiting = self.waiting.lock();
        let mut chain = Vec::new();
        let mut current = start;

        for _ in 0..=waiting.len() {
            let waiter = waiting.get(&current)?;
            chain.push(format!("{} waits for {}", waiter.name, waiter.path));
            current = waiter.feeder?;
            if current == start {
                return Some(chain.join(", "));
            }
        }
        None
    }

    /// Describe all current waiters, for stall diagnostics.
    pub fn describe(&self) -> Vec<String> {
        self.waiting
            .lock()
            .values()
            .map(|w| format!("{} waits for {}", w.name, w.path))
            .collect()
    }
}
