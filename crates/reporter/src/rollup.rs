//! Status rollup
//!
//! Propagates step and test outcomes upward. Failure is sticky at every
//! level: once a meta-step, suite or launch is failed, nothing downgrades it
//! back to passed.

use stepmirror_common::ItemStatus;

use crate::state::CorrelationTable;

/// Merge an observed outcome into an aggregate, keeping failure sticky
pub fn merge(current: &mut Option<ItemStatus>, observed: ItemStatus) {
    if current.as_ref().is_some_and(ItemStatus::is_failed) {
        return;
    }
    *current = Some(observed);
}

/// A step passed: mark it and every open meta-step passed
pub fn step_passed(table: &mut CorrelationTable) {
    for meta in table.meta_steps_mut() {
        merge(&mut meta.status, ItemStatus::Passed);
    }
    if let Some(step) = table.step_mut() {
        step.status = Some(ItemStatus::Passed);
    }
    if let Some(test) = table.test_mut() {
        test.failed_step = None;
    }
}

/// A step failed: fail it, every open meta-step, the test and everything
/// above it, and remember the step as the test's failure point
///
/// The failure may be reported after the step was already closed; it then
/// points at the last closed step.
pub fn step_failed(table: &mut CorrelationTable) {
    for meta in table.meta_steps_mut() {
        meta.status = Some(ItemStatus::Failed);
    }
    if let Some(step) = table.step_mut() {
        step.status = Some(ItemStatus::Failed);
    }
    if let Some(step) = table.latest_step() {
        if let Some(test) = table.test_mut() {
            test.failed_step = Some(step);
        }
    }
    test_failed(table);
}

/// A test passed; aggregates are left alone
pub fn test_passed(table: &mut CorrelationTable) {
    if let Some(test) = table.test_mut() {
        merge(&mut test.status, ItemStatus::Passed);
    }
}

/// A test failed: fail it, every open suite, and the launch
pub fn test_failed(table: &mut CorrelationTable) {
    if let Some(test) = table.test_mut() {
        test.status = Some(ItemStatus::Failed);
    }
    for suite in table.suites_mut() {
        suite.status = ItemStatus::Failed;
    }
    if let Some(launch) = table.launch_mut() {
        launch.status = ItemStatus::Failed;
    }
}
