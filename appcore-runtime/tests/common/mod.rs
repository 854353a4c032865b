//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use appcore_runtime::observability::init_test_tracing;
use appcore_runtime::prelude::*;

/// Copies every update of a push input to an output.
pub struct Forwarder {
    input: Input<i32>,
    output: Output<i32>,
}

impl Forwarder {
    pub fn register(app: &mut Application, name: &str, from: &str, to: &str) -> ModuleId {
        app.add_module(name, |b| {
            Ok(Forwarder {
                input: b.scalar_input(from, UpdateMode::Push)?,
                output: b.scalar_output(to)?,
            })
        })
        .unwrap()
    }
}

impl ApplicationModule for Forwarder {
    fn main_loop(&mut self) -> Result<()> {
        loop {
            self.output.write_value(self.input.value())?;
            self.input.read()?;
        }
    }
}

/// Marks its output faulty when it sees 99 and ok again when it sees 0.
pub struct Flagger {
    input: Input<i32>,
    output: Output<i32>,
}

impl Flagger {
    pub fn register(app: &mut Application) -> ModuleId {
        app.add_module("Flagger", |b| {
            Ok(Flagger {
                input: b.scalar_input("/flag/in", UpdateMode::Push)?,
                output: b.scalar_output("/flag/out")?,
            })
        })
        .unwrap()
    }
}

impl ApplicationModule for Flagger {
    fn main_loop(&mut self) -> Result<()> {
        loop {
            match self.input.value() {
                99 => self.output.set_validity(DataValidity::Faulty),
                0 => self.output.set_validity(DataValidity::Ok),
                _ => {}
            }
            self.output.write_value(self.input.value())?;
            self.input.read()?;
        }
    }
}

/// On every trigger, copies a poll-type input to an output.
pub struct PollReader {
    trigger: Input<i32>,
    value: Input<i32>,
    output: Output<i32>,
}

impl PollReader {
    pub fn register(app: &mut Application, trigger: &str, value: &str, out: &str) -> ModuleId {
        app.add_module("PollReader", |b| {
            Ok(PollReader {
                trigger: b.scalar_input(trigger, UpdateMode::Push)?,
                value: b.scalar_input(value, UpdateMode::Poll)?,
                output: b.scalar_output(out)?,
            })
        })
        .unwrap()
    }
}

impl ApplicationModule for PollReader {
    fn main_loop(&mut self) -> Result<()> {
        loop {
            self.output.write_value(self.value.value())?;
            self.trigger.read()?;
            self.value.read()?;
        }
    }
}

/// Waits on an input it is never sent, leaving its other input unread.
pub struct Sleeper {
    never: Input<i32>,
    _ignored: Input<i32>,
}

impl Sleeper {
    pub fn register(app: &mut Application) -> ModuleId {
        app.add_module("Sleeper", |b| {
            Ok(Sleeper {
                never: b.scalar_input("/sleeper/never", UpdateMode::Push)?,
                _ignored: b.scalar_input("/sleeper/ignored", UpdateMode::Push)?,
            })
        })
        .unwrap()
    }
}

impl ApplicationModule for Sleeper {
    fn main_loop(&mut self) -> Result<()> {
        loop {
            self.never.read()?;
        }
    }
}

/// Runtime configuration for tests, with tracing routed to the test output.
pub fn test_config() -> RuntimeConfig {
    init_test_tracing();
    RuntimeConfig::for_testing()
}

/// A new application with the test configuration.
pub fn test_app() -> Application {
    Application::new("test", test_config()).unwrap()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
