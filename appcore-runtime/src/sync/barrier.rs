//! Closeable N-party rendezvous barrier.
//!
//! The barrier trips when `parties` callers have arrived. The last caller
//! to arrive is the leader of that generation and may run an action before
//! the others are released. Closing the barrier releases every waiter with
//! a shutdown error and makes all further waits fail immediately.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

use super::cancel::CancellationToken;
use appcore_core::error::{AppCoreError, Result};

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    closed: bool,
}

/// Reusable rendezvous for a fixed number of parties.
#[derive(Debug)]
pub struct Barrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

/// Result of a barrier wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    is_leader: bool,
    generation: u64,
}

impl BarrierWaitResult {
    /// Returns true for exactly one party (the last to arrive) each generation.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    /// The generation that tripped.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Barrier {
    /// Create a barrier for `parties` participants (at least one).
    #[must_use]
    pub fn new(parties: usize) -> Self {
        Self {
            parties: parties.max(1),
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                closed: false,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Number of parties required to trip the barrier.
    #[must_use]
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Number of generations tripped so far.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Whether the barrier was closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Wait for the barrier to trip.
    pub fn wait(&self, cancel: &CancellationToken, poll: Duration) -> Result<BarrierWaitResult> {
        self.wait_with(cancel, poll, || {})
    }

    /// Wait for the barrier to trip; the leader runs `leader_action` while
    /// the other parties are still held.
    ///
    /// If cancelled while waiting, the caller's arrival is withdrawn and
    /// `Err(Shutdown)` is returned.
    pub fn wait_with(
        &self,
        cancel: &CancellationToken,
        poll: Duration,
        leader_action: impl FnOnce(),
    ) -> Result<BarrierWaitResult> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(AppCoreError::Shutdown);
        }
        let local_gen = state.generation;
        state.arrived += 1;

        if state.arrived == self.parties {
            leader_action();
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cvar.notify_all();
            return Ok(BarrierWaitResult {
                is_leader: true,
                generation: local_gen,
            });
        }

        loop {
            if state.generation != local_gen {
                return Ok(BarrierWaitResult {
                    is_leader: false,
                    generation: local_gen,
                });
            }
            if state.closed {
                return Err(AppCoreError::Shutdown);
            }
            if cancel.is_cancelled() {
                state.arrived = state.arrived.saturating_sub(1);
                return Err(AppCoreError::Shutdown);
            }
            self.cvar.wait_for(&mut state, poll);
        }
    }

    /// Close the barrier, releasing all current and future waiters.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn single_party_trips_immediately() {
        let barrier = Barrier::new(1);
        let token = CancellationToken::new();
        let result = barrier.wait(&token, POLL).unwrap();
        assert!(result.is_leader());
        assert_eq!(barrier.generation(), 1);
    }

    #[test]
    fn exactly_one_leader_runs_action() {
        let barrier = Arc::new(Barrier::new(3));
        let actions = Arc::new(AtomicUsize::new(0));
        let leaders = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let actions = Arc::clone(&actions);
                let leaders = Arc::clone(&leaders);
                thread::spawn(move || {
                    let token = CancellationToken::new();
                    let result = barrier
                        .wait_with(&token, POLL, || {
                            actions.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    if result.is_leader() {
                        leaders.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(actions.load(Ordering::SeqCst), 1);
        assert_eq!(leaders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_releases_waiters() {
        let barrier = Arc::new(Barrier::new(2));
        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait(&CancellationToken::new(), POLL))
        };
        thread::sleep(Duration::from_millis(20));
        barrier.close();
        let result = waiter.join().unwrap();
        assert!(result.unwrap_err().is_shutdown());
        assert!(barrier
            .wait(&CancellationToken::new(), POLL)
            .unwrap_err()
            .is_shutdown());
    }

    #[test]
    fn cancel_withdraws_arrival() {
        let barrier = Arc::new(Barrier::new(2));
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert!(barrier.wait(&cancelled, POLL).is_err());

        // The withdrawn arrival must not count toward the next trip.
        let other = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait(&CancellationToken::new(), POLL))
        };
        let mine = barrier.wait(&CancellationToken::new(), POLL).unwrap();
        let theirs = other.join().unwrap().unwrap();
        assert!(mine.is_leader() ^ theirs.is_leader());
    }
}
