//! Synchronisation primitives used by the runtime workers.

mod barrier;
mod cancel;

pub use barrier::{Barrier, BarrierWaitResult};
pub use cancel::CancellationToken;
