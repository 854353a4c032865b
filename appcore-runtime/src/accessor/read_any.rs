//! Waiting on whichever of several push inputs updates first.

use std::sync::Arc;

use super::input::{Input, InputShared, InputSource};
use crate::transfer::ReadyNotifier;
use appcore_core::error::{AppCoreError, Result};
use appcore_core::types::AccessorId;
use appcore_core::UserType;

/// Waits on several push-type inputs at once.
///
/// Updates are taken in the order they arrived, across all members.
#[derive(Debug, Default)]
pub struct ReadAnyGroup {
    members: Vec<Arc<InputShared>>,
    notifier: Arc<ReadyNotifier>,
}

impl ReadAnyGroup {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connected push-type input.
    pub fn add<T: UserType>(&mut self, input: &Input<T>) -> Result<()> {
        let shared = input.shared();
        match shared.source()? {
            InputSource::Queue(queue) => {
                queue.set_notifier(Some(Arc::clone(&self.notifier)));
                self.members.push(Arc::clone(shared));
                Ok(())
            }
            _ => Err(AppCoreError::InvalidWiring {
                path: shared.path().to_string(),
                cause: "only push-type inputs can join a read-any group".to_string(),
            }),
        }
    }

    /// Number of member inputs.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Block until any member has an update, take it and return the id of
    /// the input that was updated.
    pub fn read_any(&mut self) -> Result<AccessorId> {
        let Some(first) = self.members.first() else {
            return Err(AppCoreError::Lifecycle {
                operation: "read_any".to_string(),
                cause: "group has no members".to_string(),
            });
        };
        let ctx = Arc::clone(first.owner().ctx());
        let poll = ctx.config().poll_interval();
        loop {
            ctx.cancel().checkpoint()?;
            if let Some(id) = self.notifier.pop() {
                if let Some(member) = self.members.iter().find(|m| m.id() == id) {
                    // Stale notifications (value taken by a direct read) are skipped.
                    if member.read_non_blocking()? {
                        return Ok(id);
                    }
                }
                continue;
            }
            ctx.testable().with_released(|| self.notifier.wait(poll));
        }
    }
}

impl Drop for ReadAnyGroup {
    fn drop(&mut self) {
        for member in &self.members {
            if let Ok(InputSource::Queue(queue)) = member.source() {
                queue.set_notifier(None);
            }
        }
    }
}
