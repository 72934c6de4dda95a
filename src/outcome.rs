//! Per-unit results for fan-out operations.
//!
//! Scanning every repository or analyzing every table fans out into many
//! independent units. A failure in one unit is recorded as
//! [`Outcome::Skipped`] and the batch keeps going.

use serde::Serialize;

/// Result of one unit of work inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Skipped { unit: String, reason: String },
}

impl<T> Outcome<T> {
    pub fn skipped(unit: impl Into<String>, reason: impl ToString) -> Self {
        Outcome::Skipped {
            unit: unit.into(),
            reason: reason.to_string(),
        }
    }

    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(v) => Some(v),
            Outcome::Skipped { .. } => None,
        }
    }
}

/// A unit that was skipped, with the reason it failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedUnit {
    pub unit: String,
    pub reason: String,
}

/// Split a batch into completed values and skipped units.
pub fn partition<T>(outcomes: impl IntoIterator<Item = Outcome<T>>) -> (Vec<T>, Vec<SkippedUnit>) {
    let mut done = Vec::new();
    let mut skipped = Vec::new();
    for outcome in outcomes {
        match outcome {
            Outcome::Done(v) => done.push(v),
            Outcome::Skipped { unit, reason } => skipped.push(SkippedUnit { unit, reason }),
        }
    }
    (done, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_keeps_order() {
        let outcomes = vec![
            Outcome::Done(1),
            Outcome::skipped("b", "unreadable"),
            Outcome::Done(3),
        ];
        let (done, skipped) = partition(outcomes);
        assert_eq!(done, vec![1, 3]);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].unit, "b");
        assert_eq!(skipped[0].reason, "unreadable");
    }
}
