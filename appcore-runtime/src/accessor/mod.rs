//! Typed process variable accessors used by module code.
//!
//! Every accessor is a thin typed handle around shared, type-erased state
//! that the connection phase wires into a variable network. Inputs carry
//! the read-side validity decorator and outputs the write-side one.

mod input;
mod output;
mod read_any;

pub use input::Input;
pub use output::Output;
pub use read_any::ReadAnyGroup;

pub(crate) use input::{InputShared, InputSource};
pub(crate) use output::OutputShared;

use serde::{Deserialize, Serialize};

/// How an input receives data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Every write is queued; `read()` blocks for the next one.
    Push,
    /// Only the latest value is kept; `read()` never blocks.
    Poll,
}
