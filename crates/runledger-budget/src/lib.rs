// SPDX-License-Identifier: MIT OR Apache-2.0
//! runledger-budget
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Checks a case's observed counters against its merged budget ceiling.
//! Only `max_wall_ms`, `max_tool_calls`, and `max_tool_errors` are
//! enforced here; `max_tokens_out` and `max_cost_usd` are carried in
//! [`BudgetSpec`][runledger_core::BudgetSpec] for callers that track
//! token/cost accounting themselves, but the harness has no such
//! accounting of its own to check them against.

use runledger_core::{BudgetSpec, BudgetViolationRecord};

/// Compare observed counters against `budget`'s ceilings, returning one
/// violation per exceeded field, in a fixed field order.
#[must_use]
pub fn check_budgets(
    budget: Option<&BudgetSpec>,
    wall_ms: u64,
    tool_calls: u64,
    tool_errors: u64,
) -> Vec<BudgetViolationRecord> {
    let Some(budget) = budget else {
        return Vec::new();
    };
    let mut violations = Vec::new();
    if let Some(limit) = budget.max_wall_ms {
        if wall_ms > limit {
            violations.push(BudgetViolationRecord {
                field: "max_wall_ms",
                limit,
                actual: wall_ms,
            });
        }
    }
    if let Some(limit) = budget.max_tool_calls {
        if tool_calls > limit {
            violations.push(BudgetViolationRecord {
                field: "max_tool_calls",
                limit,
                actual: tool_calls,
            });
        }
    }
    if let Some(limit) = budget.max_tool_errors {
        if tool_errors > limit {
            violations.push(BudgetViolationRecord {
                field: "max_tool_errors",
                limit,
                actual: tool_errors,
            });
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_budget_means_no_violations() {
        assert!(check_budgets(None, 999_999, 999, 999).is_empty());
    }

    #[test]
    fn wall_ms_over_limit_is_reported() {
        let budget = BudgetSpec {
            max_wall_ms: Some(1000),
            ..Default::default()
        };
        let violations = check_budgets(Some(&budget), 1500, 0, 0);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "max_wall_ms");
        assert_eq!(violations[0].actual, 1500);
    }

    #[test]
    fn at_limit_is_not_a_violation() {
        let budget = BudgetSpec {
            max_tool_calls: Some(3),
            ..Default::default()
        };
        assert!(check_budgets(Some(&budget), 0, 3, 0).is_empty());
    }

    #[test]
    fn multiple_ceilings_can_all_be_exceeded() {
        let budget = BudgetSpec {
            max_wall_ms: Some(10),
            max_tool_calls: Some(1),
            max_tool_errors: Some(0),
            ..Default::default()
        };
        let violations = check_budgets(Some(&budget), 20, 2, 1);
        assert_eq!(violations.len(), 3);
    }
}
