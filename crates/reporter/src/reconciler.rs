//! Meta-step stack reconciliation
//!
//! Every step arrives with its chain of enclosing meta-steps. The reconciler
//! diffs that chain against the stack of meta-steps currently open remotely
//! and issues the closes and opens needed to make them agree:
//!
//! ```text
//! open:  A ─ B ─ C          shared prefix: A
//! next:  A ─ D              close C, close B (innermost first)
//!                           open D under A
//! ```
//!
//! Meta-steps are matched by value (actor, action, joined arguments), never by
//! identity: the host builds fresh instances for every step.

use chrono::{DateTime, Utc};
use stepmirror_common::{ItemId, ItemKind};
use tracing::debug;

use crate::events::{truncate_label, MetaStep, Step};
use crate::remote::{NewItem, Remote};
use crate::state::{CorrelationTable, OpenMetaStep};

/// Structural identity of a meta-step
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaStepKey {
    pub actor: String,
    pub action: String,
    pub args: String,
}

impl MetaStepKey {
    pub fn new(actor: impl Into<String>, action: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            args: args.into(),
        }
    }

    /// Label for the remote item
    pub fn label(&self) -> String {
        let mut text = format!("{} {}", self.actor, self.action);
        if !self.args.is_empty() {
            text.push(' ');
            text.push_str(&self.args);
        }
        truncate_label(text.trim())
    }
}

impl From<&MetaStep> for MetaStepKey {
    fn from(meta: &MetaStep) -> Self {
        Self::new(meta.actor.clone(), meta.name.clone(), meta.args.join(", "))
    }
}

/// Meta-step stack of a step, outermost first
pub fn stack_of(step: &Step) -> Vec<MetaStepKey> {
    let mut stack: Vec<MetaStepKey> = step
        .meta_step
        .iter()
        .flat_map(|m| m.chain())
        .map(MetaStepKey::from)
        .collect();
    stack.reverse();
    stack
}

/// Operations that turn one stack into another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Length of the common prefix that stays open
    pub shared: usize,
    /// Indices into the current stack to close, innermost first
    pub close: Vec<usize>,
    /// Indices into the next stack to open, outermost first
    pub open: Vec<usize>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.close.is_empty() && self.open.is_empty()
    }
}

/// Diff the open stack against the next one
pub fn plan(current: &[MetaStepKey], next: &[MetaStepKey]) -> ReconcilePlan {
    let shared = current
        .iter()
        .zip(next)
        .take_while(|(open, wanted)| open == wanted)
        .count();

    ReconcilePlan {
        shared,
        close: (shared..current.len()).rev().collect(),
        open: (shared..next.len()).collect(),
    }
}

/// Bring the open meta-steps in line with `next` and return the parent for
/// the step about to start
///
/// Returns `None` when no test is open. Remote failures never stop the
/// stack from being replaced.
pub async fn reconcile(
    remote: &Remote,
    table: &mut CorrelationTable,
    next: Vec<MetaStepKey>,
    at: DateTime<Utc>,
) -> Option<ItemId> {
    let test = table.test()?.id;

    let current: Vec<MetaStepKey> = table.meta_steps().iter().map(|m| m.key.clone()).collect();
    let plan = plan(&current, &next);
    if plan.is_noop() {
        return table.step_parent();
    }
    debug!(
        shared = plan.shared,
        close = plan.close.len(),
        open = plan.open.len(),
        "reconciling meta-steps"
    );

    let mut stack = table.meta_steps().to_vec();
    for &idx in &plan.close {
        let open = &stack[idx];
        remote
            .finish_item(table, open.id, open.status.clone(), at)
            .await;
    }
    stack.truncate(plan.shared);

    for &idx in &plan.open {
        let key = next[idx].clone();
        let parent = stack.last().map(|m| m.id).unwrap_or(test);
        let item = NewItem::new(ItemKind::Step, key.label(), Some(parent)).started_at(at);
        if let Some(id) = remote.start_item(table, item).await {
            stack.push(OpenMetaStep {
                key,
                id,
                status: None,
            });
        }
    }

    let parent = stack.last().map(|m| m.id).unwrap_or(test);
    table.replace_meta_steps(stack);
    Some(parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn keys(names: &[&str]) -> Vec<MetaStepKey> {
        names.iter().map(|n| MetaStepKey::new("I", *n, "")).collect()
    }

    /// Apply a plan to a key stack the way `reconcile` applies it remotely
    fn apply(current: &[MetaStepKey], next: &[MetaStepKey], plan: &ReconcilePlan) -> Vec<MetaStepKey> {
        let mut stack = current.to_vec();
        for &idx in &plan.close {
            assert_eq!(idx + 1, stack.len(), "closes must be innermost first");
            stack.pop();
        }
        for &idx in &plan.open {
            assert_eq!(idx, stack.len(), "opens must be outermost first");
            stack.push(next[idx].clone());
        }
        stack
    }

    #[test]
    fn test_sibling_replaced_under_common_parent() {
        let p = plan(&keys(&["A", "B"]), &keys(&["A", "C"]));
        assert_eq!(p.shared, 1);
        assert_eq!(p.close, vec![1]);
        assert_eq!(p.open, vec![1]);
    }

    #[test]
    fn test_empty_next_closes_everything() {
        let p = plan(&keys(&["A", "B", "C"]), &[]);
        assert_eq!(p.close, vec![2, 1, 0]);
        assert!(p.open.is_empty());
    }

    #[test]
    fn test_all_new_nesting_opens_every_level() {
        let p = plan(&[], &keys(&["A", "B", "C"]));
        assert!(p.close.is_empty());
        assert_eq!(p.open, vec![0, 1, 2]);
    }

    #[test]
    fn test_equal_keys_with_different_instances_are_shared() {
        let a1 = MetaStep::new("I", "login as").with_args(["admin"]);
        let a2 = MetaStep::new("I", "login as").with_args(["admin"]);
        let s1 = Step::new("I", "click").within(a1);
        let s2 = Step::new("I", "fill").within(a2);
        assert!(plan(&stack_of(&s1), &stack_of(&s2)).is_noop());
    }

    #[test]
    fn test_arguments_distinguish_meta_steps() {
        let s1 = Step::new("I", "click").within(MetaStep::new("I", "login as").with_args(["admin"]));
        let s2 = Step::new("I", "click").within(MetaStep::new("I", "login as").with_args(["guest"]));
        let p = plan(&stack_of(&s1), &stack_of(&s2));
        assert_eq!(p.close, vec![0]);
        assert_eq!(p.open, vec![0]);
    }

    #[test]
    fn test_stack_of_is_outermost_first() {
        let step = Step::new("I", "click")
            .within(MetaStep::new("I", "C").within(MetaStep::new("I", "B").within(MetaStep::new("I", "A"))));
        assert_eq!(stack_of(&step), keys(&["A", "B", "C"]));
        assert!(stack_of(&Step::new("I", "see")).is_empty());
    }

    #[test]
    fn test_key_label() {
        assert_eq!(MetaStepKey::new("I", "login as", "admin, secret").label(), "I login as admin, secret");
        assert_eq!(MetaStepKey::new("", "Given I am on home", "").label(), "Given I am on home");
    }

    fn arb_stack() -> impl Strategy<Value = Vec<MetaStepKey>> {
        prop::collection::vec(
            (prop_oneof![Just("A"), Just("B"), Just("C")], prop_oneof![Just(""), Just("x")])
                .prop_map(|(name, args)| MetaStepKey::new("I", name, args)),
            0..6,
        )
    }

    proptest! {
        #[test]
        fn prop_applied_plan_yields_next(current in arb_stack(), next in arb_stack()) {
            let p = plan(&current, &next);
            prop_assert_eq!(apply(&current, &next, &p), next);
        }

        #[test]
        fn prop_self_reconcile_is_noop(stack in arb_stack()) {
            prop_assert!(plan(&stack, &stack).is_noop());
        }

        #[test]
        fn prop_prefix_extension_never_closes(current in arb_stack(), tail in arb_stack()) {
            let mut next = current.clone();
            next.extend(tail.iter().cloned());
            let p = plan(&current, &next);
            prop_assert!(p.close.is_empty());
            prop_assert_eq!(p.open.len(), tail.len());
        }

        #[test]
        fn prop_disjoint_stacks_close_all_then_open_all(current in arb_stack(), next in arb_stack()) {
            prop_assume!(current.first() != next.first() || current.is_empty() || next.is_empty());
            let p = plan(&current, &next);
            prop_assert_eq!(p.shared, 0);
            prop_assert_eq!(p.close, (0..current.len()).rev().collect::<Vec<_>>());
            prop_assert_eq!(p.open, (0..next.len()).collect::<Vec<_>>());
        }
    }
}
