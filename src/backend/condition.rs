//! Deferred permission tests
//!
//! UI code often needs dozens of "may the user do X" answers, many of them
//! duplicates. A [`PermissionBackendCondition`] captures one such question
//! without answering it, so a batch can be answered at once through
//! [`PermissionBackend::bulk_evaluate_test`](crate::backend::PermissionBackend::bulk_evaluate_test).

use crate::backend::scope::{ForChange, ForProject, ForRef, PermissionScope, WithUser};
use crate::identity::Identity;
use crate::permissions::{ChangeScopePermission, GlobalPermission, ProjectPermission, RefPermission};
use std::fmt;
use std::ops::Not;
use std::sync::OnceLock;

/// A scope together with the permission to test on it
#[derive(Debug, Clone)]
pub enum ConditionTarget {
    Global(WithUser, GlobalPermission),
    Project(ForProject, ProjectPermission),
    Ref(ForRef, RefPermission),
    Change(ForChange, ChangeScopePermission),
}

impl ConditionTarget {
    pub fn identity(&self) -> &Identity {
        match self {
            ConditionTarget::Global(scope, _) => scope.identity(),
            ConditionTarget::Project(scope, _) => scope.identity(),
            ConditionTarget::Ref(scope, _) => scope.identity(),
            ConditionTarget::Change(scope, _) => scope.identity(),
        }
    }

    pub fn resource_path(&self) -> String {
        match self {
            ConditionTarget::Global(scope, _) => scope.resource_path(),
            ConditionTarget::Project(scope, _) => scope.resource_path(),
            ConditionTarget::Ref(scope, _) => scope.resource_path(),
            ConditionTarget::Change(scope, _) => scope.resource_path(),
        }
    }

    pub fn permission(&self) -> String {
        match self {
            ConditionTarget::Global(_, p) => p.to_string(),
            ConditionTarget::Project(_, p) => p.to_string(),
            ConditionTarget::Ref(_, p) => p.to_string(),
            ConditionTarget::Change(_, p) => p.to_string(),
        }
    }

    fn test_or_false(&self) -> bool {
        match self {
            ConditionTarget::Global(scope, p) => scope.test_or_false(p),
            ConditionTarget::Project(scope, p) => scope.test_or_false(p),
            ConditionTarget::Ref(scope, p) => scope.test_or_false(p),
            ConditionTarget::Change(scope, p) => scope.test_or_false(p),
        }
    }
}

/// A permission test evaluated on demand
///
/// Once a result is set, it is returned without testing again; the first
/// result set sticks.
#[derive(Debug, Clone)]
pub struct PermissionBackendCondition {
    target: ConditionTarget,
    value: OnceLock<bool>,
}

impl PermissionBackendCondition {
    pub fn new(target: ConditionTarget) -> Self {
        Self {
            target,
            value: OnceLock::new(),
        }
    }

    pub fn target(&self) -> &ConditionTarget {
        &self.target
    }

    /// Identifies conditions asking the same question
    pub fn key(&self) -> (String, String, String) {
        (
            self.target.identity().cache_key(),
            self.target.resource_path(),
            self.target.permission(),
        )
    }

    pub fn set(&self, value: bool) {
        // Keeps the earlier result if one was already set
        let _ = self.value.set(value);
    }

    pub fn is_set(&self) -> bool {
        self.value.get().is_some()
    }

    pub(crate) fn preset(&self) -> Option<bool> {
        self.value.get().copied()
    }

    /// Test the permission, ignoring any result already set
    pub(crate) fn evaluate(&self) -> bool {
        self.target.test_or_false()
    }

    /// The preset result, or a fresh `test_or_false`
    pub fn value(&self) -> bool {
        match self.value.get() {
            Some(value) => *value,
            None => self.evaluate(),
        }
    }
}

impl fmt::Display for PermissionBackendCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PermissionCondition({} on {} for {})",
            self.target.permission(),
            self.target.resource_path(),
            self.target.identity()
        )
    }
}

/// Boolean expression over permission conditions
#[derive(Debug, Clone)]
pub enum BooleanCondition {
    Value(bool),
    Permission(PermissionBackendCondition),
    And(Box<BooleanCondition>, Box<BooleanCondition>),
    Or(Box<BooleanCondition>, Box<BooleanCondition>),
    Not(Box<BooleanCondition>),
}

impl BooleanCondition {
    pub const TRUE: BooleanCondition = BooleanCondition::Value(true);
    pub const FALSE: BooleanCondition = BooleanCondition::Value(false);

    pub fn permission(condition: PermissionBackendCondition) -> Self {
        BooleanCondition::Permission(condition)
    }

    /// Conjunction; constants are folded away
    pub fn and(self, other: BooleanCondition) -> Self {
        match (self, other) {
            (BooleanCondition::Value(false), _) | (_, BooleanCondition::Value(false)) => {
                BooleanCondition::FALSE
            }
            (BooleanCondition::Value(true), c) | (c, BooleanCondition::Value(true)) => c,
            (a, b) => BooleanCondition::And(Box::new(a), Box::new(b)),
        }
    }

    /// Disjunction; constants are folded away
    pub fn or(self, other: BooleanCondition) -> Self {
        match (self, other) {
            (BooleanCondition::Value(true), _) | (_, BooleanCondition::Value(true)) => {
                BooleanCondition::TRUE
            }
            (BooleanCondition::Value(false), c) | (c, BooleanCondition::Value(false)) => c,
            (a, b) => BooleanCondition::Or(Box::new(a), Box::new(b)),
        }
    }

    /// Evaluate the expression, short-circuiting
    pub fn value(&self) -> bool {
        match self {
            BooleanCondition::Value(v) => *v,
            BooleanCondition::Permission(c) => c.value(),
            BooleanCondition::And(a, b) => a.value() && b.value(),
            BooleanCondition::Or(a, b) => a.value() || b.value(),
            BooleanCondition::Not(c) => !c.value(),
        }
    }

    /// Every permission condition in the expression, for bulk evaluation
    pub fn permission_conditions(&self) -> Vec<&PermissionBackendCondition> {
        let mut out = Vec::new();
        self.collect_permissions(&mut out);
        out
    }

    fn collect_permissions<'a>(&'a self, out: &mut Vec<&'a PermissionBackendCondition>) {
        match self {
            BooleanCondition::Value(_) => {}
            BooleanCondition::Permission(c) => out.push(c),
            BooleanCondition::And(a, b) | BooleanCondition::Or(a, b) => {
                a.collect_permissions(out);
                b.collect_permissions(out);
            }
            BooleanCondition::Not(c) => c.collect_permissions(out),
        }
    }
}

impl Not for BooleanCondition {
    type Output = BooleanCondition;

    fn not(self) -> Self::Output {
        match self {
            BooleanCondition::Value(v) => BooleanCondition::Value(!v),
            BooleanCondition::Not(inner) => *inner,
            c => BooleanCondition::Not(Box::new(c)),
        }
    }
}

impl From<bool> for BooleanCondition {
    fn from(value: bool) -> Self {
        BooleanCondition::Value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_folding() {
        let c = BooleanCondition::TRUE.and(BooleanCondition::FALSE);
        assert!(matches!(c, BooleanCondition::Value(false)));

        let c = BooleanCondition::FALSE.or(BooleanCondition::TRUE);
        assert!(c.value());

        let c = !BooleanCondition::from(true);
        assert!(!c.value());
        assert!(c.permission_conditions().is_empty());
    }
}
