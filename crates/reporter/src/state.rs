//! Item correlation table
//!
//! Maps the host's live entities (launch, suites, current test, current
//! step, open meta-steps) to remote identifiers, and tracks which remote
//! items are open so that each is started once and finished at most once.

use std::collections::HashSet;
use stepmirror_common::{ItemId, ItemStatus, LaunchId};
use tracing::debug;

use crate::reconciler::MetaStepKey;

/// The run's launch
#[derive(Debug, Clone)]
pub struct LaunchEntry {
    pub id: LaunchId,
    pub status: ItemStatus,
    /// Owned by someone else; never finished by us
    pub external: bool,
}

/// An open suite
#[derive(Debug, Clone)]
pub struct SuiteEntry {
    pub title: String,
    pub id: ItemId,
    pub status: ItemStatus,
}

/// The test currently executing
#[derive(Debug, Clone)]
pub struct TestEntry {
    pub title: String,
    pub id: ItemId,
    pub retry_index: u32,
    /// Set by the pass/fail notification
    pub status: Option<ItemStatus>,
    /// Step that was running when the last failure happened
    pub failed_step: Option<ItemId>,
}

/// The step currently executing
#[derive(Debug, Clone)]
pub struct StepEntry {
    pub id: ItemId,
    pub label: String,
    pub status: Option<ItemStatus>,
}

/// A meta-step with an open remote item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenMetaStep {
    pub key: MetaStepKey,
    pub id: ItemId,
    pub status: Option<ItemStatus>,
}

/// Correlation between local entities and remote items
#[derive(Debug, Default)]
pub struct CorrelationTable {
    launch: Option<LaunchEntry>,
    /// Open suites, outermost first
    suites: Vec<SuiteEntry>,
    test: Option<TestEntry>,
    step: Option<StepEntry>,
    /// Most recently closed step of the current test
    last_step: Option<ItemId>,
    /// Open meta-steps, outermost first
    meta_steps: Vec<OpenMetaStep>,
    /// Items started and not yet finished
    open: HashSet<ItemId>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Record that a start call is being issued for `id`
    ///
    /// Returns false if the id is already open.
    pub fn record_start(&mut self, id: ItemId) -> bool {
        if !self.open.insert(id) {
            debug!(%id, "item already started");
            return false;
        }
        true
    }

    /// Record that a finish call is being issued for `id`
    ///
    /// Returns false unless the item is open. Finished ids are forgotten;
    /// ids are never reused, so a second finish is always refused.
    pub fn record_finish(&mut self, id: ItemId) -> bool {
        if !self.open.remove(&id) {
            debug!(%id, "finish requested for an item that is not open");
            return false;
        }
        true
    }

    #[cfg(test)]
    pub fn is_open(&self, id: &ItemId) -> bool {
        self.open.contains(id)
    }

    /// Number of items started and not yet finished
    pub fn open_items(&self) -> usize {
        self.open.len()
    }

    // ========================================================================
    // Launch
    // ========================================================================

    pub fn set_launch(&mut self, launch: LaunchEntry) {
        self.launch = Some(launch);
    }

    pub fn launch(&self) -> Option<&LaunchEntry> {
        self.launch.as_ref()
    }

    pub fn launch_mut(&mut self) -> Option<&mut LaunchEntry> {
        self.launch.as_mut()
    }

    pub fn launch_id(&self) -> Option<LaunchId> {
        self.launch.as_ref().map(|l| l.id)
    }

    // ========================================================================
    // Suites
    // ========================================================================

    pub fn open_suite(&mut self, suite: SuiteEntry) {
        self.suites.push(suite);
    }

    /// Innermost open suite
    pub fn current_suite(&self) -> Option<&SuiteEntry> {
        self.suites.last()
    }

    pub fn suites_mut(&mut self) -> impl Iterator<Item = &mut SuiteEntry> {
        self.suites.iter_mut()
    }

    /// Remove the innermost open suite with this title
    pub fn close_suite(&mut self, title: &str) -> Option<SuiteEntry> {
        let idx = self.suites.iter().rposition(|s| s.title == title)?;
        Some(self.suites.remove(idx))
    }

    /// Remove every open suite, innermost first
    pub fn drain_suites(&mut self) -> Vec<SuiteEntry> {
        let mut suites = std::mem::take(&mut self.suites);
        suites.reverse();
        suites
    }

    // ========================================================================
    // Test and step
    // ========================================================================

    pub fn begin_test(&mut self, test: TestEntry) {
        self.test = Some(test);
        self.last_step = None;
    }

    pub fn test(&self) -> Option<&TestEntry> {
        self.test.as_ref()
    }

    pub fn test_mut(&mut self) -> Option<&mut TestEntry> {
        self.test.as_mut()
    }

    pub fn end_test(&mut self) -> Option<TestEntry> {
        self.last_step = None;
        self.test.take()
    }

    pub fn begin_step(&mut self, step: StepEntry) {
        self.step = Some(step);
    }

    pub fn step(&self) -> Option<&StepEntry> {
        self.step.as_ref()
    }

    pub fn step_mut(&mut self) -> Option<&mut StepEntry> {
        self.step.as_mut()
    }

    pub fn end_step(&mut self) -> Option<StepEntry> {
        let step = self.step.take();
        if let Some(step) = &step {
            self.last_step = Some(step.id);
        }
        step
    }

    /// The open step, else the last step closed in the current test
    pub fn latest_step(&self) -> Option<ItemId> {
        self.step.as_ref().map(|s| s.id).or(self.last_step)
    }

    // ========================================================================
    // Meta-steps
    // ========================================================================

    pub fn meta_steps(&self) -> &[OpenMetaStep] {
        &self.meta_steps
    }

    pub fn meta_steps_mut(&mut self) -> &mut [OpenMetaStep] {
        &mut self.meta_steps
    }

    /// Replace the active stack wholesale
    pub fn replace_meta_steps(&mut self, stack: Vec<OpenMetaStep>) {
        self.meta_steps = stack;
    }

    /// Item a new leaf step is parented under
    pub fn step_parent(&self) -> Option<ItemId> {
        self.meta_steps
            .last()
            .map(|m| m.id)
            .or_else(|| self.test.as_ref().map(|t| t.id))
    }

    /// Item that ad hoc log output should land on
    ///
    /// The open step, else the innermost meta-step, else the test. `None`
    /// means the launch itself.
    pub fn log_target(&self) -> Option<ItemId> {
        self.step
            .as_ref()
            .map(|s| s.id)
            .or_else(|| self.step_parent())
    }
}
