//! The hardware abstraction a session drives, and the sink used to feed
//! asynchronous reads back into it.

use std::collections::BTreeSet;
use std::sync::Weak;

use super::session::DeviceSession;
use appcore_core::error::Result;
use appcore_core::types::ResourceId;
use appcore_core::Value;

/// Hardware access behind a device session.
///
/// Implementations report failures as transient errors
/// ([`AppCoreError::is_transient`](appcore_core::AppCoreError::is_transient));
/// the session turns them into exceptions and recovery takes over. A
/// backend is only ever driven by its own session, so methods take
/// `&mut self`.
pub trait DeviceBackend: Send {
    /// Open (or re-open) the device.
    fn open(&mut self) -> Result<()>;

    /// Close the device. Called once on shutdown.
    fn close(&mut self);

    /// Read a register.
    fn read(&mut self, register: &str) -> Result<Value>;

    /// Write a register.
    fn write(&mut self, register: &str, value: &Value) -> Result<()>;

    /// Start delivering asynchronous reads to `sink`.
    ///
    /// Called after every successful recovery. The backend must push the
    /// current value of each subscribed register once.
    fn activate_async_read(&mut self, sink: AsyncReadSink) -> Result<()>;

    /// Whether the device is usable right now.
    fn is_functional(&self) -> bool;

    /// Low-level resources this device depends on. Devices sharing a
    /// resource are recovered together.
    fn involved_resource_ids(&self) -> BTreeSet<ResourceId>;
}

/// Handle given to a backend for asynchronous delivery.
#[derive(Debug, Clone)]
pub struct AsyncReadSink {
    session: Weak<DeviceSession>,
}

impl AsyncReadSink {
    pub(crate) fn new(session: Weak<DeviceSession>) -> Self {
        Self { session }
    }

    /// Deliver a new value of `register`. Ignored while the device is in
    /// the error state.
    pub fn push(&self, register: &str, value: Value) {
        if let Some(session) = self.session.upgrade() {
            session.deliver_async(register, value);
        }
    }

    /// Report a fault detected on the asynchronous path.
    pub fn report_exception(&self, message: impl Into<String>) {
        if let Some(session) = self.session.upgrade() {
            session.report_exception(message);
        }
    }

    /// Registers with asynchronous subscribers.
    pub fn registers(&self) -> Vec<String> {
        self.session
            .upgrade()
            .map(|session| session.async_registers())
            .unwrap_or_default()
    }
}

/// Initialisation handler run after every (re-)open, in registration order.
pub type InitHandler = Box<dyn Fn(&mut dyn DeviceBackend) -> Result<()> + Send + Sync>;
