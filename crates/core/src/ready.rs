//! Readiness from generic status conditions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ConditionStatus, Conditioned};

/// Condition types consulted, highest priority first. Job-style kinds report
/// `Succeeded`, long-running ones report `Ready`.
pub const PRIORITY: [&str; 2] = ["Succeeded", "Ready"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadinessVerdict {
    Ready,
    Failed,
    /// A recognized condition is present but still `Unknown`.
    Pending,
    /// No recognized condition type is present.
    Indeterminate,
}

impl ReadinessVerdict {
    pub fn is_ready(self) -> bool {
        matches!(self, ReadinessVerdict::Ready)
    }

    /// A waiter can stop polling once this holds.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReadinessVerdict::Ready | ReadinessVerdict::Failed)
    }
}

impl fmt::Display for ReadinessVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadinessVerdict::Ready => "Ready",
            ReadinessVerdict::Failed => "Failed",
            ReadinessVerdict::Pending => "Pending",
            ReadinessVerdict::Indeterminate => "Indeterminate",
        };
        f.write_str(s)
    }
}

/// The first priority type present decides; an `Unknown` status there does
/// not fall through to lower priority types.
pub fn evaluate<T: Conditioned + ?Sized>(obj: &T) -> ReadinessVerdict {
    for type_ in PRIORITY {
        if let Some(c) = obj.condition(type_) {
            return match c.status {
                ConditionStatus::True => ReadinessVerdict::Ready,
                ConditionStatus::False => ReadinessVerdict::Failed,
                ConditionStatus::Unknown => ReadinessVerdict::Pending,
            };
        }
    }
    ReadinessVerdict::Indeterminate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Condition, ConditionStatus::*, WatchedObject};

    fn conds(list: &[(&str, ConditionStatus)]) -> Vec<Condition> {
        list.iter().map(|(t, s)| Condition::new(*t, *s)).collect()
    }

    #[test]
    fn ready_unknown_is_pending() {
        assert_eq!(evaluate(&conds(&[("Ready", Unknown)])), ReadinessVerdict::Pending);
    }

    #[test]
    fn succeeded_wins_over_ready() {
        assert_eq!(evaluate(&conds(&[("Succeeded", True), ("Ready", False)])), ReadinessVerdict::Ready);
        assert_eq!(evaluate(&conds(&[("Ready", True), ("Succeeded", False)])), ReadinessVerdict::Failed);
    }

    #[test]
    fn unknown_succeeded_does_not_fall_through() {
        assert_eq!(evaluate(&conds(&[("Succeeded", Unknown), ("Ready", True)])), ReadinessVerdict::Pending);
    }

    #[test]
    fn empty_and_unrecognized_are_indeterminate() {
        assert_eq!(evaluate(&conds(&[])), ReadinessVerdict::Indeterminate);
        assert_eq!(evaluate(&conds(&[("Available", True), ("Progressing", True)])), ReadinessVerdict::Indeterminate);
    }

    #[test]
    fn object_without_conditions_is_indeterminate() {
        let o = WatchedObject { namespace: None, name: "x".into(), resource_version: None, conditions: None };
        assert_eq!(evaluate(&o), ReadinessVerdict::Indeterminate);
    }

    #[test]
    fn first_duplicate_decides() {
        assert_eq!(evaluate(&conds(&[("Ready", False), ("Ready", True)])), ReadinessVerdict::Failed);
    }

    #[test]
    fn every_status_combination_yields_a_verdict() {
        let statuses = [None, Some(True), Some(False), Some(Unknown)];
        for s in statuses {
            for r in statuses {
                let mut list = Vec::new();
                if let Some(s) = s { list.push(Condition::new("Succeeded", s)); }
                if let Some(r) = r { list.push(Condition::new("Ready", r)); }
                let v = evaluate(&list);
                let decider = s.or(r);
                let expected = match decider {
                    None => ReadinessVerdict::Indeterminate,
                    Some(True) => ReadinessVerdict::Ready,
                    Some(False) => ReadinessVerdict::Failed,
                    Some(Unknown) => ReadinessVerdict::Pending,
                };
                assert_eq!(v, expected, "succeeded={s:?} ready={r:?}");
            }
        }
    }

    #[test]
    fn terminal_states() {
        assert!(ReadinessVerdict::Ready.is_terminal());
        assert!(ReadinessVerdict::Failed.is_terminal());
        assert!(!ReadinessVerdict::Pending.is_terminal());
        assert!(!ReadinessVerdict::Indeterminate.is_terminal());
        assert!(!ReadinessVerdict::Failed.is_ready());
    }
}
