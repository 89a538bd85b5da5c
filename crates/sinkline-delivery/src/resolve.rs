//! Normalizes a delivery outcome into an [`ActionResult`].

use std::fmt::Debug;

use sinkline_core::{ActionResult, DispatchTable};
use tracing::trace;

use crate::transport::{Outcome, Transport};

/// Resolved outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Reaction the worker applies.
    pub result: ActionResult,
    /// Status code reported by the sink, if any.
    pub status_code: Option<i64>,
    /// Whether a dispatch rule decided the result.
    pub rule_matched: bool,
}

/// Resolves `outcome` against the destination's dispatch rules.
///
/// Direct results pass through unchanged. A response is looked up by status
/// code and body; the first matching rule's action wins, and the transport's
/// default action applies when no rule matches.
pub fn resolve_outcome<C, T>(outcome: &Outcome, table: &DispatchTable<C>, transport: &T) -> Resolution
where
    C: Debug,
    T: Transport + ?Sized,
{
    match outcome {
        Outcome::Action(result) => {
            Resolution { result: *result, status_code: None, rule_matched: false }
        },
        Outcome::Response { status_code, body } => match table.lookup(*status_code, body) {
            Some(rule) => {
                trace!(
                    status_code,
                    action = %rule.action,
                    match_string = ?rule.match_string,
                    context = ?rule.context,
                    "dispatch rule matched"
                );
                Resolution {
                    result: rule.action.into(),
                    status_code: Some(*status_code),
                    rule_matched: true,
                }
            },
            None => Resolution {
                result: transport.default_action(*status_code, body),
                status_code: Some(*status_code),
                rule_matched: false,
            },
        },
    }
}
