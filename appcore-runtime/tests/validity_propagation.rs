//! Integration tests for validity and version propagation through modules.

mod common;

use appcore_runtime::prelude::*;
use common::{test_app, Flagger, Forwarder};

#[test]
fn faulty_input_propagates_and_recovers() {
    let mut app = test_app();
    Forwarder::register(&mut app, "Forwarder", "/in", "/out");
    let mut test = TestFacility::new(app, true).unwrap();
    test.run_application().unwrap();

    let mut input = test.get_scalar::<i32>("/in").unwrap();
    let mut output = test.get_scalar::<i32>("/out").unwrap();

    input.set(5);
    input.write().unwrap();
    test.step_application(false).unwrap();
    assert!(output.read());
    assert_eq!(output.value(), 5);
    assert_eq!(output.validity(), DataValidity::Ok);

    input.set(6);
    input.set_validity(DataValidity::Faulty);
    input.write().unwrap();
    test.step_application(false).unwrap();
    output.read();
    assert_eq!(output.value(), 6);
    assert_eq!(output.validity(), DataValidity::Faulty);

    input.set(7);
    input.set_validity(DataValidity::Ok);
    input.write().unwrap();
    test.step_application(false).unwrap();
    output.read();
    assert_eq!(output.value(), 7);
    assert_eq!(output.validity(), DataValidity::Ok);
}

#[test]
fn output_carries_version_of_triggering_input() {
    let mut app = test_app();
    Forwarder::register(&mut app, "Forwarder", "/in", "/out");
    let mut test = TestFacility::new(app, true).unwrap();
    test.run_application().unwrap();

    let mut input = test.get_scalar::<i32>("/in").unwrap();
    let mut output = test.get_scalar::<i32>("/out").unwrap();
    input.set(1);
    input.write().unwrap();
    test.step_application(false).unwrap();
    output.read();
    assert_eq!(output.version(), input.version());
}

#[test]
fn explicit_fault_flag_persists_until_cleared() {
    let mut app = test_app();
    Flagger::register(&mut app);
    let mut test = TestFacility::new(app, true).unwrap();
    test.run_application().unwrap();

    let mut output = test.get_scalar::<i32>("/flag/out").unwrap();
    let mut step = |value: i32| {
        test.write_scalar("/flag/in", value).unwrap();
        test.step_application(false).unwrap();
        output.read();
        output.validity()
    };

    assert_eq!(step(99), DataValidity::Faulty);
    assert_eq!(step(5), DataValidity::Faulty);
    assert_eq!(step(0), DataValidity::Ok);
    assert_eq!(step(5), DataValidity::Ok);
}

#[test]
fn chain_of_modules_forwards_fault() {
    let mut app = test_app();
    Forwarder::register(&mut app, "First", "/chain/in", "/chain/a");
    Forwarder::register(&mut app, "Second", "/chain/a", "/chain/b");
    let mut test = TestFacility::new(app, true).unwrap();
    test.run_application().unwrap();

    let mut input = test.get_scalar::<i32>("/chain/in").unwrap();
    input.set(3);
    input.set_validity(DataValidity::Faulty);
    input.write().unwrap();
    test.step_application(false).unwrap();

    let mut output = test.get_scalar::<i32>("/chain/b").unwrap();
    output.read();
    assert_eq!(output.value(), 3);
    assert_eq!(output.validity(), DataValidity::Faulty);
}
