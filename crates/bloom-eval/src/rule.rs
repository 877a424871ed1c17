//! Rules and temporal merge operators.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::operator::Plan;
use crate::program::CollectionId;

/// How a rule's output is applied to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemporalOp {
    /// Merge into the target during the current tick's fixpoint.
    MergeNow,
    /// Stage for merging at the start of the next tick.
    MergeNextTick,
    /// Stage as the target's entire content for the next tick.
    MergeRetractNextTick,
}

impl TemporalOp {
    pub fn symbol(self) -> &'static str {
        match self {
            TemporalOp::MergeNow => "<=",
            TemporalOp::MergeNextTick => "<+",
            TemporalOp::MergeRetractNextTick => "<+-",
        }
    }

    /// Whether the rule's effect waits for the next tick.
    pub fn is_deferred(self) -> bool {
        self != TemporalOp::MergeNow
    }
}

impl fmt::Display for TemporalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A resolved rule: target, temporal operator and operator plan.
///
/// Rules are created by [`ProgramBuilder`](crate::ProgramBuilder) and are
/// immutable once the program is built.
#[derive(Clone)]
pub struct Rule {
    pub(crate) target: CollectionId,
    pub(crate) target_name: String,
    pub(crate) op: TemporalOp,
    pub(crate) plan: Plan,
    pub(crate) label: String,
    pub(crate) recursive: bool,
}

impl Rule {
    pub fn target(&self) -> CollectionId {
        self.target
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn op(&self) -> TemporalOp {
        self.op
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the rule can feed its own input within a tick, directly or
    /// through other merge-now rules.
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Collections the rule reads, in operator position order.
    pub fn sources(&self) -> Vec<CollectionId> {
        self.plan.sources()
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("label", &self.label)
            .field("target", &self.target_name)
            .field("op", &self.op)
            .field("plan", &self.plan)
            .field("recursive", &self.recursive)
            .finish()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}
