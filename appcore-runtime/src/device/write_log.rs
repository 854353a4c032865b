//! Deferred write log.

use appcore_core::Value;

/// Latest value written to every register, in first-write order.
///
/// Replayed to the device after each re-open so that its state matches
/// what the application last wrote. Replaying twice writes the same
/// values again, so replay is idempotent.
#[derive(Debug, Default, Clone)]
pub struct DeferredWriteLog {
    entries: Vec<(String, Value)>,
}

impl DeferredWriteLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write. Void writes carry no state and are not recorded.
    pub fn record(&mut self, register: &str, value: Value) {
        if value.data_type().is_void() {
            return;
        }
        match self.entries.iter_mut().find(|(r, _)| r == register) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((register.to_string(), value)),
        }
    }

    /// Logged writes in replay order.
    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    /// Number of registers in the log.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was written yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_latest_value_in_first_write_order() {
        let mut log = DeferredWriteLog::new();
        log.record("B", Value::Int32(vec![1]));
        log.record("A", Value::Int32(vec![2]));
        log.record("B", Value::Int32(vec![3]));

        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0], ("B".to_string(), Value::Int32(vec![3])));
        assert_eq!(log.entries()[1], ("A".to_string(), Value::Int32(vec![2])));
    }

    #[test]
    fn void_writes_are_not_logged() {
        let mut log = DeferredWriteLog::new();
        log.record("TRIGGER", Value::Void(1));
        assert!(log.is_empty());
    }
}
