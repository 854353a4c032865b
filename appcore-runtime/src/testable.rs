//! Testable mode: deterministic stepping of a multi-threaded application.
//!
//! In testable mode a single baton decides which thread runs application
//! logic. Workers give it up at every blocking point and take it back
//! before consuming data; the test thread owns it between steps. Every
//! counted enqueue raises the pending counter and every consume lowers it,
//! so once the test thread holds the baton with the counter at zero, all
//! data sent into the application has been processed transitively.
//!
//! When testable mode is disabled every operation here is a no-op.

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::config::RuntimeConfig;
use appcore_core::error::{AppCoreError, Result};

/// Pause between handing the baton over and taking it back in `step()`.
const STEP_YIELD: Duration = Duration::from_micros(500);

/// Shared testable mode state of one application.
#[derive(Debug)]
pub struct TestableMode {
    enabled: AtomicBool,
    shutdown: AtomicBool,
    baton: Mutex<Option<ThreadId>>,
    released: Condvar,
    pending: AtomicUsize,
    device_init: AtomicUsize,
    per_variable: DashMap<String, usize>,
    stall_timeout: Duration,
    poll: Duration,
}

impl TestableMode {
    /// Create a disabled testable mode.
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            baton: Mutex::new(None),
            released: Condvar::new(),
            pending: AtomicUsize::new(0),
            device_init: AtomicUsize::new(0),
            per_variable: DashMap::new(),
            stall_timeout: config.stall_timeout(),
            poll: config.poll_interval(),
        }
    }

    /// Enable testable mode. The calling thread becomes the test thread and
    /// takes the baton.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        self.lock();
        tracing::debug!("Testable mode enabled");
    }

    /// Whether testable mode is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Whether the calling thread holds the baton.
    pub fn owns_baton(&self) -> bool {
        self.is_enabled() && *self.baton.lock() == Some(thread::current().id())
    }

    /// Take the baton, blocking until it is free. Re-entrant.
    pub fn lock(&self) {
        if !self.is_enabled() {
            return;
        }
        let me = thread::current().id();
        let mut baton = self.baton.lock();
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            match *baton {
                None => {
                    *baton = Some(me);
                    return;
                }
                Some(owner) if owner == me => return,
                Some(_) => {
                    self.released.wait_for(&mut baton, self.poll);
                }
            }
        }
    }

    /// Give up the baton if the calling thread holds it.
    pub fn unlock(&self) {
        if !self.is_enabled() {
            return;
        }
        let mut baton = self.baton.lock();
        if *baton == Some(thread::current().id()) {
            *baton = None;
            self.released.notify_all();
        }
    }

    /// Run `f` with the baton released, re-taking it afterwards if the
    /// calling thread held it before.
    pub fn with_released<R>(&self, f: impl FnOnce() -> R) -> R {
        let held = self.owns_baton();
        if held {
            self.unlock();
        }
        let result = f();
        if held {
            self.lock();
        }
        result
    }

    /// Record a counted enqueue on `variable`.
    pub fn increment(&self, variable: &str) {
        if !self.is_enabled() {
            return;
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        *self.per_variable.entry(variable.to_string()).or_insert(0) += 1;
    }

    /// Record a consume on `variable`.
    pub fn decrement(&self, variable: &str) {
        if !self.is_enabled() {
            return;
        }
        let underflow = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1))
            .is_err();
        if underflow {
            tracing::error!(variable, "Pending counter decremented below zero");
        }
        if let Some(mut count) = self.per_variable.get_mut(variable) {
            *count = count.saturating_sub(1);
        }
    }

    /// Number of counted items not yet consumed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// A device session started (re-)initialising.
    pub fn device_init_begin(&self) {
        if self.is_enabled() {
            self.device_init.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A device session reached the functional state.
    pub fn device_init_end(&self) {
        if self.is_enabled() {
            let _ = self
                .device_init
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
        }
    }

    /// Number of device sessions still initialising.
    pub fn devices_initialising(&self) -> usize {
        self.device_init.load(Ordering::SeqCst)
    }

    /// Whether a step would have anything to wait for.
    pub fn can_step(&self, wait_for_devices: bool) -> bool {
        self.pending() > 0 || (wait_for_devices && self.devices_initialising() > 0)
    }

    /// Let the application run until all pending work has settled.
    ///
    /// Returns immediately if nothing is pending. Must be called from the
    /// test thread.
    pub fn step(&self, wait_for_devices: bool) -> Result<()> {
        if !self.is_enabled() {
            return Err(AppCoreError::TestableModeDisabled);
        }
        if !self.can_step(wait_for_devices) {
            return Ok(());
        }

        let started = Instant::now();
        loop {
            self.unlock();
            thread::sleep(STEP_YIELD);
            self.lock();

            if self.shutdown.load(Ordering::SeqCst) {
                return Err(AppCoreError::Shutdown);
            }
            if !self.can_step(wait_for_devices) {
                return Ok(());
            }
            if started.elapsed() > self.stall_timeout {
                let err = self.stalled(wait_for_devices);
                tracing::error!(error = %err, "Application stalled");
                return Err(err);
            }
        }
    }

    fn stalled(&self, wait_for_devices: bool) -> AppCoreError {
        let mut unread: Vec<String> = self
            .per_variable
            .iter()
            .filter(|entry| *entry.value() > 0)
            .map(|entry| format!("{} ({})", entry.key(), entry.value()))
            .collect();
        unread.sort();
        if wait_for_devices && self.devices_initialising() > 0 {
            unread.push(format!(
                "{} device(s) still initialising",
                self.devices_initialising()
            ));
        }
        AppCoreError::StepStalled {
            timeout_ms: self.stall_timeout.as_millis() as u64,
            pending: self.pending(),
            details: if unread.is_empty() {
                "none".to_string()
            } else {
                unread.join(", ")
            },
        }
    }

    /// Release the baton for good; all later `lock()` calls return at once.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut baton = self.baton.lock();
        *baton = None;
        self.released.notify_all();
    }
}
