//! Test support: drive an application from a test thread.
//!
//! [`TestFacility`] starts an application with default values for every
//! control-system input and, in testable mode, steps it deterministically.
//!
//! # Example
//!
//! ```ignore
//! use appcore_runtime::prelude::*;
//! use appcore_runtime::testing::TestFacility;
//!
//! let mut test = TestFacility::new(app, true)?;
//! test.set_scalar_default("/setpoint", 25.0_f64)?;
//! test.run_application()?;
//!
//! test.write_scalar("/setpoint", 30.0_f64)?;
//! test.step_application(true)?;
//! assert_eq!(test.read_scalar::<f64>("/heater/power")?, 5.0);
//! ```

mod facility;

pub use facility::{ProcessVariableAccessor, TestFacility};
