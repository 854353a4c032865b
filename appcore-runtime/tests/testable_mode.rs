//! Integration tests for deterministic stepping.

mod common;

use std::time::{Duration, Instant};

use appcore_runtime::prelude::*;
use common::{test_app, test_config, Forwarder, Sleeper};

#[test]
fn one_step_settles_transitively() {
    let mut app = test_app();
    Forwarder::register(&mut app, "A", "/in", "/a");
    Forwarder::register(&mut app, "B", "/a", "/b");
    Forwarder::register(&mut app, "C", "/b", "/c");
    let mut test = TestFacility::new(app, true).unwrap();
    test.run_application().unwrap();

    test.write_scalar("/in", 42).unwrap();
    assert!(test.can_step_application());
    test.step_application(false).unwrap();

    assert!(!test.can_step_application());
    assert_eq!(test.read_scalar::<i32>("/c").unwrap(), 42);
}

#[test]
fn step_without_pending_work_returns_immediately() {
    let mut app = test_app();
    Forwarder::register(&mut app, "A", "/in", "/out");
    let mut test = TestFacility::new(app, true).unwrap();
    test.run_application().unwrap();

    assert!(!test.can_step_application());
    let started = Instant::now();
    test.step_application(true).unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[test]
fn queued_updates_are_all_processed() {
    let mut app = test_app();
    Forwarder::register(&mut app, "A", "/in", "/out");
    let mut test = TestFacility::new(app, true).unwrap();
    test.run_application().unwrap();

    test.write_scalar("/in", 1).unwrap();
    test.write_scalar("/in", 2).unwrap();
    test.step_application(false).unwrap();
    assert_eq!(test.read_scalar::<i32>("/out").unwrap(), 2);
}

#[test]
fn stalled_step_names_unread_variable() {
    let mut app = Application::new("stall", test_config().with_stall_timeout_ms(200)).unwrap();
    Sleeper::register(&mut app);
    let mut test = TestFacility::new(app, true).unwrap();
    test.run_application().unwrap();

    test.write_scalar("/sleeper/ignored", 1).unwrap();
    let err = test.step_application(false).unwrap_err();
    assert_eq!(err.code(), "E302");
    assert!(err.to_string().contains("/sleeper/ignored"));
}

#[test]
fn stepping_requires_testable_mode() {
    let mut app = test_app();
    Forwarder::register(&mut app, "A", "/in", "/out");
    let mut test = TestFacility::new(app, false).unwrap();
    test.run_application().unwrap();

    let err = test.step_application(false).unwrap_err();
    assert_eq!(err.code(), "E301");
}

#[test]
fn facility_follows_configured_mode() {
    let mut app = test_app();
    Forwarder::register(&mut app, "A", "/in", "/out");
    let mut test = TestFacility::from_application(app).unwrap();
    test.run_application().unwrap();
    assert!(!test.can_step_application());

    test.write_scalar("/in", 9).unwrap();
    assert!(test.can_step_application());
    test.step_application(false).unwrap();
    assert_eq!(test.read_scalar::<i32>("/out").unwrap(), 9);
}
