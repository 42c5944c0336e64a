// tests/setup_saga.rs

//! Saga interpreter behaviour through the public API.

use divban::{
    CallbackProgress, Error, ProgressEvent, SagaOutcome, SetupStep, SilentProgress, StepState,
    run_setup_saga,
};
use std::cell::RefCell;

/// Resources "created" by the steps, newest last
#[derive(Debug, Default, Clone)]
struct Ledger {
    resources: Vec<String>,
}

impl StepState for Ledger {
    type Update = String;

    fn merge(&mut self, update: String) {
        self.resources.push(update);
    }
}

/// A step that creates `name` in `world` and deletes it again on failure
fn resource_step<'a>(
    name: &'static str,
    world: &'a RefCell<Vec<String>>,
    fail: bool,
) -> SetupStep<'a, Ledger> {
    SetupStep::new(format!("Creating {}", name), move |_: &Ledger| {
        if fail {
            return Err(Error::InvalidSettings(format!("{} is broken", name)));
        }
        world.borrow_mut().push(name.to_string());
        Ok(name.to_string())
    })
    .with_release(move |ledger: &Ledger, outcome| {
        assert_eq!(ledger.resources.last().map(String::as_str), Some(name));
        if outcome == SagaOutcome::Failure {
            world.borrow_mut().retain(|r| r != name);
        }
        Ok(())
    })
}

#[test]
fn test_failed_saga_leaves_nothing_behind() {
    let world = RefCell::new(Vec::new());
    let steps = vec![
        resource_step("user", &world, false),
        resource_step("linger", &world, false),
        resource_step("directories", &world, true),
        resource_step("config", &world, false),
    ];

    let err = run_setup_saga(steps, &SilentProgress).unwrap_err();

    assert_eq!(err.to_string(), "invalid settings: directories is broken");
    assert!(world.borrow().is_empty());
}

#[test]
fn test_successful_saga_keeps_everything() {
    let world = RefCell::new(Vec::new());
    let steps = vec![
        resource_step("user", &world, false),
        resource_step("linger", &world, false),
    ];

    let ledger = run_setup_saga(steps, &SilentProgress).unwrap();

    assert_eq!(ledger.resources, vec!["user", "linger"]);
    assert_eq!(world.into_inner(), vec!["user", "linger"]);
}

#[test]
fn test_progress_reports_failing_step() {
    let world = RefCell::new(Vec::new());
    let events = RefCell::new(Vec::new());
    let progress = CallbackProgress::new(|e| events.borrow_mut().push(e));
    let steps = vec![
        resource_step("user", &world, false),
        resource_step("linger", &world, true),
    ];

    run_setup_saga(steps, &progress).unwrap_err();
    drop(progress);

    let events = events.into_inner();
    assert_eq!(
        events,
        vec![
            ProgressEvent::StepStarted {
                index: 1,
                total: 2,
                message: "Creating user".to_string(),
            },
            ProgressEvent::StepStarted {
                index: 2,
                total: 2,
                message: "Creating linger".to_string(),
            },
            ProgressEvent::StepFailed {
                index: 2,
                message: "Creating linger".to_string(),
                error: "invalid settings: linger is broken".to_string(),
            },
            ProgressEvent::RollbackStarted { completed: 1 },
        ]
    );
}

#[test]
fn test_empty_saga_succeeds() {
    let ledger = run_setup_saga(Vec::<SetupStep<'_, Ledger>>::new(), &SilentProgress).unwrap();
    assert!(ledger.resources.is_empty());
}
