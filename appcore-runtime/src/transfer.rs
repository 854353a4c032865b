//! Transfer channels between feeders and consumers.
//!
//! Every write produces an [`Update`] which a [`Fanout`] hands to each sink
//! of the variable network: bounded push queues for push-type inputs,
//! latest-value cells for poll-type inputs, device registers and the
//! process variable table.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::RuntimeContext;
use crate::device::DeviceSession;
use crate::process_variable::ProcessVariable;
use appcore_core::error::{AppCoreError, Result};
use appcore_core::types::{AccessorId, VariablePath};
use appcore_core::{DataType, DataValidity, Value, VersionNumber};

/// The unit moved through every channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Update {
    /// Payload.
    pub value: Value,
    /// Version of the write that produced it.
    pub version: VersionNumber,
    /// Validity of the payload.
    pub validity: DataValidity,
}

impl Update {
    /// An ok update with a fresh version number.
    pub fn fresh(value: Value) -> Self {
        Self {
            value,
            version: VersionNumber::new(),
            validity: DataValidity::Ok,
        }
    }
}

/// Wakes a [`ReadAnyGroup`](crate::accessor::ReadAnyGroup) in arrival order.
#[derive(Debug, Default)]
pub(crate) struct ReadyNotifier {
    ready: Mutex<VecDeque<AccessorId>>,
    cvar: Condvar,
}

impl ReadyNotifier {
    fn notify(&self, id: AccessorId) {
        self.ready.lock().push_back(id);
        self.cvar.notify_all();
    }

    /// Take the oldest notification.
    pub(crate) fn pop(&self) -> Option<AccessorId> {
        self.ready.lock().pop_front()
    }

    /// Wait up to `poll` for a notification to arrive.
    pub(crate) fn wait(&self, poll: std::time::Duration) {
        let mut ready = self.ready.lock();
        if ready.is_empty() {
            self.cvar.wait_for(&mut ready, poll);
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Update>,
    closed: bool,
}

/// Bounded queue feeding one push-type input.
///
/// On overflow the oldest entry is replaced; the pending counter of
/// testable mode is unchanged in that case.
#[derive(Debug)]
pub struct PushQueue {
    owner: AccessorId,
    path: VariablePath,
    capacity: usize,
    counted: bool,
    ctx: Arc<RuntimeContext>,
    state: Mutex<QueueState>,
    cvar: Condvar,
    notifier: Mutex<Option<Arc<ReadyNotifier>>>,
}

impl PushQueue {
    /// Create a queue for the input `owner`.
    pub fn new(
        owner: AccessorId,
        path: VariablePath,
        capacity: usize,
        counted: bool,
        ctx: Arc<RuntimeContext>,
    ) -> Self {
        Self {
            owner,
            path,
            capacity: capacity.max(1),
            counted,
            ctx,
            state: Mutex::new(QueueState::default()),
            cvar: Condvar::new(),
            notifier: Mutex::new(None),
        }
    }

    /// Enqueue an update. Returns `true` if an old entry was dropped.
    pub fn push(&self, update: Update) -> bool {
        let overflowed = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            let overflowed = state.items.len() >= self.capacity;
            if overflowed {
                state.items.pop_front();
            } else if self.counted {
                self.ctx.testable().increment(self.path.as_str());
            }
            state.items.push_back(update);
            overflowed
        };
        self.cvar.notify_all();
        if let Some(notifier) = self.notifier.lock().as_ref() {
            notifier.notify(self.owner);
        }
        if overflowed {
            tracing::trace!(path = %self.path, "Push queue overflow, oldest update dropped");
        }
        overflowed
    }

    /// Dequeue the oldest update without blocking.
    pub fn try_pop(&self) -> Option<Update> {
        let mut state = self.state.lock();
        let update = state.items.pop_front();
        if update.is_some() && self.counted {
            self.ctx.testable().decrement(self.path.as_str());
        }
        update
    }

    /// Dequeue the oldest update, blocking with the baton released.
    ///
    /// `on_idle` runs every time the queue is found empty and may abort the
    /// wait with an error.
    pub fn pop_blocking_with(&self, mut on_idle: impl FnMut() -> Result<()>) -> Result<Update> {
        let poll = self.ctx.config().poll_interval();
        loop {
            self.ctx.cancel().checkpoint()?;
            if let Some(update) = self.try_pop() {
                return Ok(update);
            }
            if self.state.lock().closed {
                return Err(AppCoreError::Shutdown);
            }
            on_idle()?;
            self.ctx.testable().with_released(|| {
                let mut state = self.state.lock();
                if state.items.is_empty() && !state.closed {
                    self.cvar.wait_for(&mut state, poll);
                }
            });
        }
    }

    /// Dequeue the oldest update, blocking with the baton released.
    pub fn pop_blocking(&self) -> Result<Update> {
        self.pop_blocking_with(|| Ok(()))
    }

    /// Number of queued updates.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the queue, waking a blocked reader.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.cvar.notify_all();
    }

    /// Register a group notifier, announcing updates already queued.
    pub(crate) fn set_notifier(&self, notifier: Option<Arc<ReadyNotifier>>) {
        if let Some(notifier) = &notifier {
            for _ in 0..self.len() {
                notifier.notify(self.owner);
            }
        }
        *self.notifier.lock() = notifier;
    }
}

/// Latest-value cell feeding one poll-type input.
///
/// The first value stored counts as pending in testable mode until the
/// consumer has taken its initial value.
#[derive(Debug)]
pub struct LatestCell {
    path: VariablePath,
    ctx: Arc<RuntimeContext>,
    latest: Mutex<Option<Update>>,
    cvar: Condvar,
    initial_pending: AtomicBool,
}

impl LatestCell {
    /// Create an empty cell.
    pub fn new(path: VariablePath, ctx: Arc<RuntimeContext>) -> Self {
        Self {
            path,
            ctx,
            latest: Mutex::new(None),
            cvar: Condvar::new(),
            initial_pending: AtomicBool::new(false),
        }
    }

    /// Replace the stored update.
    pub fn store(&self, update: Update) {
        let mut latest = self.latest.lock();
        if latest.is_none() && self.ctx.testable().is_enabled() {
            self.initial_pending.store(true, Ordering::SeqCst);
            self.ctx.testable().increment(self.path.as_str());
        }
        *latest = Some(update);
        self.cvar.notify_all();
    }

    /// The stored update, if any.
    pub fn get(&self) -> Option<Update> {
        self.latest.lock().clone()
    }

    /// Wait until a first value exists, with the baton released.
    pub fn wait_initial_with(&self, mut on_idle: impl FnMut() -> Result<()>) -> Result<Update> {
        let poll = self.ctx.config().poll_interval();
        loop {
            self.ctx.cancel().checkpoint()?;
            if let Some(update) = self.get() {
                if self.initial_pending.swap(false, Ordering::SeqCst) {
                    self.ctx.testable().decrement(self.path.as_str());
                }
                return Ok(update);
            }
            on_idle()?;
            self.ctx.testable().with_released(|| {
                let mut latest = self.latest.lock();
                if latest.is_none() {
                    self.cvar.wait_for(&mut latest, poll);
                }
            });
        }
    }
}

/// One destination of a variable network.
#[derive(Debug)]
pub(crate) enum Sink {
    /// Push-type module input.
    Queue(Arc<PushQueue>),
    /// Poll-type module input.
    Latest(Arc<LatestCell>),
    /// Writeable device register.
    Device {
        session: Arc<DeviceSession>,
        register: String,
    },
    /// The control system.
    ControlSystem(Arc<ProcessVariable>),
}

/// Distributes the writes of one feeder to all consumers of its network.
#[derive(Debug)]
pub struct Fanout {
    path: VariablePath,
    data_type: DataType,
    len: usize,
    sinks: Vec<Sink>,
}

impl Fanout {
    pub(crate) fn new(path: VariablePath, data_type: DataType, len: usize, sinks: Vec<Sink>) -> Self {
        Self {
            path,
            data_type,
            len,
            sinks,
        }
    }

    /// Variable path of the network.
    pub fn path(&self) -> &VariablePath {
        &self.path
    }

    /// Element type of the network.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Element count of the network.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the network carries no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Hand an update to every sink.
    pub fn distribute(&self, update: Update) -> Result<()> {
        if update.value.data_type() != self.data_type || update.value.len() != self.len {
            return Err(AppCoreError::TypeMismatch {
                path: self.path.to_string(),
                expected: self.data_type,
                expected_len: self.len,
                actual: update.value.data_type(),
                actual_len: update.value.len(),
            });
        }
        for sink in &self.sinks {
            match sink {
                Sink::Queue(queue) => {
                    queue.push(update.clone());
                }
                Sink::Latest(cell) => cell.store(update.clone()),
                Sink::Device { session, register } => session.write_sync(register, &update.value),
                Sink::ControlSystem(pv) => pv.publish(update.clone()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use std::thread;
    use std::time::Duration;

    fn ctx() -> Arc<RuntimeContext> {
        Arc::new(RuntimeContext::new(RuntimeConfig::for_testing()))
    }

    fn path() -> VariablePath {
        VariablePath::parse("/queue/test").unwrap()
    }

    fn update(v: i32) -> Update {
        Update::fresh(Value::Int32(vec![v]))
    }

    #[test]
    fn queue_preserves_order() {
        let queue = PushQueue::new(AccessorId::next(), path(), 3, true, ctx());
        queue.push(update(1));
        queue.push(update(2));
        assert_eq!(queue.try_pop().unwrap().value, Value::Int32(vec![1]));
        assert_eq!(queue.try_pop().unwrap().value, Value::Int32(vec![2]));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn overflow_replaces_oldest_without_counting() {
        let ctx = ctx();
        ctx.testable().enable();
        let queue = PushQueue::new(AccessorId::next(), path(), 2, true, Arc::clone(&ctx));
        assert!(!queue.push(update(1)));
        assert!(!queue.push(update(2)));
        assert!(queue.push(update(3)));
        assert_eq!(ctx.testable().pending(), 2);

        assert_eq!(queue.try_pop().unwrap().value, Value::Int32(vec![2]));
        assert_eq!(queue.try_pop().unwrap().value, Value::Int32(vec![3]));
        assert_eq!(ctx.testable().pending(), 0);
    }

    #[test]
    fn uncounted_queue_leaves_counter_alone() {
        let ctx = ctx();
        ctx.testable().enable();
        let queue = PushQueue::new(AccessorId::next(), path(), 2, false, Arc::clone(&ctx));
        queue.push(update(1));
        assert_eq!(ctx.testable().pending(), 0);
    }

    #[test]
    fn blocking_pop_wakes_on_push() {
        let ctx = ctx();
        let queue = Arc::new(PushQueue::new(AccessorId::next(), path(), 3, true, ctx));
        let reader = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_blocking())
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(update(7));
        let got = reader.join().unwrap().unwrap();
        assert_eq!(got.value, Value::Int32(vec![7]));
    }

    #[test]
    fn blocking_pop_ends_on_shutdown() {
        let ctx = ctx();
        let queue = Arc::new(PushQueue::new(
            AccessorId::next(),
            path(),
            3,
            true,
            Arc::clone(&ctx),
        ));
        let reader = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_blocking())
        };
        thread::sleep(Duration::from_millis(20));
        ctx.cancel().cancel();
        assert!(reader.join().unwrap().unwrap_err().is_shutdown());
    }

    #[test]
    fn latest_cell_counts_first_value_once() {
        let ctx = ctx();
        ctx.testable().enable();
        let cell = LatestCell::new(path(), Arc::clone(&ctx));
        cell.store(update(1));
        cell.store(update(2));
        assert_eq!(ctx.testable().pending(), 1);

        let initial = cell.wait_initial_with(|| Ok(())).unwrap();
        assert_eq!(initial.value, Value::Int32(vec![2]));
        assert_eq!(ctx.testable().pending(), 0);
    }
}
