//! State shared by every worker of one application.

use parking_lot::Mutex;

use crate::config::RuntimeConfig;
use crate::dependency_wait::DependencyWaitDetector;
use crate::sync::CancellationToken;
use crate::testable::TestableMode;

/// Shared runtime state: configuration, testable mode, shutdown token and
/// the process-wide device open lock.
#[derive(Debug)]
pub struct RuntimeContext {
    config: RuntimeConfig,
    testable: TestableMode,
    cancel: CancellationToken,
    open_lock: Mutex<()>,
    waits: DependencyWaitDetector,
}

impl RuntimeContext {
    /// Create the context for a new application.
    pub fn new(config: RuntimeConfig) -> Self {
        let testable = TestableMode::new(&config);
        Self {
            config,
            testable,
            cancel: CancellationToken::new(),
            open_lock: Mutex::new(()),
            waits: DependencyWaitDetector::new(),
        }
    }

    /// Runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Testable mode state.
    pub fn testable(&self) -> &TestableMode {
        &self.testable
    }

    /// Shutdown token.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Serialises device open and initialisation across the process.
    pub fn open_lock(&self) -> &Mutex<()> {
        &self.open_lock
    }

    /// Initial value wait bookkeeping.
    pub fn waits(&self) -> &DependencyWaitDetector {
        &self.waits
    }

    /// Sleep for `duration` with the baton released, waking early on
    /// shutdown.
    pub fn sleep(&self, duration: std::time::Duration) -> appcore_core::Result<()> {
        let poll = self.config.poll_interval();
        self.testable.with_released(|| {
            let deadline = std::time::Instant::now() + duration;
            loop {
                self.cancel.checkpoint()?;
                let now = std::time::Instant::now();
                if now >= deadline {
                    return Ok(());
                }
                std::thread::sleep(poll.min(deadline - now));
            }
        })
    }
}
