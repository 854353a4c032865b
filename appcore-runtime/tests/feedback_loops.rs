//! Modules wired into feedback loops.

mod common;

use std::time::Duration;

use appcore_runtime::prelude::*;
use common::{test_app, wait_until, Forwarder};

/// Sends `/ext` to the plant and publishes what the plant returns.
struct Controller {
    ext: Input<i32>,
    from_plant: Input<i32>,
    to_plant: Output<i32>,
    out: Output<i32>,
}

impl ApplicationModule for Controller {
    fn prepare(&mut self) -> Result<()> {
        self.to_plant.write_value(0)
    }

    fn main_loop(&mut self) -> Result<()> {
        let mut group = ReadAnyGroup::new();
        group.add(&self.ext)?;
        group.add(&self.from_plant)?;
        loop {
            let updated = group.read_any()?;
            if updated == self.ext.id() {
                self.to_plant.write_value(self.ext.value())?;
            } else if updated == self.from_plant.id() {
                self.out.write_value(self.from_plant.value())?;
            }
        }
    }
}

/// Adds one to whatever the controller sends.
struct Plant {
    input: Input<i32>,
    to_controller: Output<i32>,
    out: Output<i32>,
}

impl ApplicationModule for Plant {
    fn prepare(&mut self) -> Result<()> {
        self.to_controller.write_value(0)
    }

    fn main_loop(&mut self) -> Result<()> {
        loop {
            let value = self.input.value() + 1;
            self.to_controller.write_value(value)?;
            self.out.write_value(value)?;
            self.input.read()?;
        }
    }
}

fn loop_app() -> Application {
    let mut app = test_app();
    app.add_module("Controller", |b| {
        Ok(Controller {
            ext: b.scalar_input("/ext", UpdateMode::Push)?,
            from_plant: b.scalar_input("/b2a", UpdateMode::Push)?,
            to_plant: b.scalar_output("/a2b")?,
            out: b.scalar_output("/a_out")?,
        })
    })
    .unwrap();
    app.add_module("Plant", |b| {
        Ok(Plant {
            input: b.scalar_input("/a2b", UpdateMode::Push)?,
            to_controller: b.scalar_output("/b2a")?,
            out: b.scalar_output("/b_out")?,
        })
    })
    .unwrap();
    app
}

fn validity_of(test: &TestFacility, path: &str) -> DataValidity {
    let mut accessor = test.get_scalar::<i32>(path).unwrap();
    accessor.read();
    accessor.validity()
}

#[test]
fn loop_is_reported_as_one_circular_network() {
    let mut app = loop_app();
    app.initialise().unwrap();

    let networks = &app.connection_report().unwrap().circular_networks;
    assert_eq!(networks.len(), 1);
    let (_, members) = networks.networks().next().unwrap();
    assert_eq!(members.len(), 2);
}

#[test]
fn external_fault_enters_and_leaves_the_loop() {
    let mut test = TestFacility::new(loop_app(), true).unwrap();
    test.set_scalar_default("/ext", 1).unwrap();
    test.run_application().unwrap();
    assert_eq!(test.read_scalar::<i32>("/b_out").unwrap(), 1);
    assert_eq!(test.read_scalar::<i32>("/a_out").unwrap(), 1);
    assert_eq!(validity_of(&test, "/a_out"), DataValidity::Ok);

    let mut ext = test.get_scalar::<i32>("/ext").unwrap();
    ext.set(5);
    ext.set_validity(DataValidity::Faulty);
    ext.write().unwrap();
    test.step_application(false).unwrap();
    assert_eq!(test.read_scalar::<i32>("/b_out").unwrap(), 6);
    assert_eq!(validity_of(&test, "/b_out"), DataValidity::Faulty);
    assert_eq!(validity_of(&test, "/a_out"), DataValidity::Faulty);

    ext.set(7);
    ext.set_validity(DataValidity::Ok);
    ext.write().unwrap();
    test.step_application(false).unwrap();
    assert_eq!(test.read_scalar::<i32>("/a_out").unwrap(), 8);
    assert_eq!(validity_of(&test, "/b_out"), DataValidity::Ok);
    assert_eq!(validity_of(&test, "/a_out"), DataValidity::Ok);
}

#[test]
fn circular_wait_for_initial_values_is_reported() {
    let mut app = test_app();
    Forwarder::register(&mut app, "A", "/ring/b", "/ring/a");
    Forwarder::register(&mut app, "B", "/ring/a", "/ring/b");
    app.run().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        app.worker_errors()
            .iter()
            .any(|(_, err)| err.code() == "E209")
    }));
    app.shutdown();

    let (worker, err) = app
        .worker_errors()
        .into_iter()
        .find(|(_, err)| err.code() == "E209")
        .unwrap();
    assert!(worker.starts_with("module:"));
    let message = err.to_string();
    assert!(message.contains('A') && message.contains('B'), "{}", message);
}
