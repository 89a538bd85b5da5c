//! Status-code keyed, order-sensitive dispatch rules.
//!
//! A transport that reports a status code and a response body (HTTP, for
//! instance) resolves them into an [`ActionResult`](crate::ActionResult)
//! through a [`DispatchTable`]. Each status code owns an ordered sequence of
//! rules; lookup scans that sequence in insertion order and stops at the
//! first rule that matches the body. Inserting under an existing code always
//! appends, so "specific body text first, generic fallback last" policies are
//! expressed purely by configuration order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    action::Action,
    error::{CoreError, Result},
};

/// Lowest status code a rule may be keyed on.
pub const MIN_STATUS_CODE: i64 = 100;

/// Highest status code a rule may be keyed on.
pub const MAX_STATUS_CODE: i64 = 599;

/// A single `(status code, optional body substring) -> action` rule.
///
/// `context` is opaque caller data carried alongside the rule and handed back
/// on lookup, for example a label used in logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRule<C = ()> {
    /// Status code this rule is keyed on.
    pub status_code: i64,
    /// Substring that must occur in the body; `None` or empty matches any body.
    pub match_string: Option<String>,
    /// Action selected when the rule matches.
    pub action: Action,
    /// Opaque caller data.
    pub context: C,
}

impl DispatchRule {
    /// Creates a rule without context.
    pub fn new(status_code: i64, match_string: Option<&str>, action: Action) -> Self {
        Self::with_context(status_code, match_string, action, ())
    }
}

impl<C> DispatchRule<C> {
    /// Creates a rule carrying caller data.
    pub fn with_context(
        status_code: i64,
        match_string: Option<&str>,
        action: Action,
        context: C,
    ) -> Self {
        Self { status_code, match_string: match_string.map(str::to_owned), action, context }
    }

    /// Whether the rule matches regardless of the body.
    pub fn is_unconditional(&self) -> bool {
        self.match_string.as_deref().map_or(true, str::is_empty)
    }

    /// Whether this rule matches the given body.
    ///
    /// The body is treated as a bounded byte span; it need not be valid UTF-8
    /// and may contain NUL bytes.
    pub fn matches(&self, body: &[u8]) -> bool {
        match self.match_string.as_deref() {
            None | Some("") => true,
            Some(needle) => contains_subslice(body, needle.as_bytes()),
        }
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|window| window == needle)
}

/// Ordered rule sequences keyed by status code.
///
/// The table owns clones of every inserted rule. It is built during
/// configuration and then shared read-only between workers; lookups take
/// `&self` and need no locking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTable<C = ()> {
    rules: HashMap<i64, Vec<DispatchRule<C>>>,
}

impl<C> DispatchTable<C> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self { rules: HashMap::new() }
    }

    /// Appends a clone of `rule` to the sequence for its status code.
    ///
    /// Never replaces an existing rule, even an identical one.
    pub fn insert(&mut self, rule: &DispatchRule<C>)
    where
        C: Clone,
    {
        self.push(rule.clone());
    }

    /// Appends an owned rule to the sequence for its status code.
    pub fn push(&mut self, rule: DispatchRule<C>) {
        self.rules.entry(rule.status_code).or_default().push(rule);
    }

    /// Finds the first rule for `status_code` that matches `body`.
    ///
    /// Returns `None` when no rule exists for the code or none of its rules
    /// match.
    pub fn lookup(&self, status_code: i64, body: &[u8]) -> Option<&DispatchRule<C>> {
        self.rules.get(&status_code)?.iter().find(|rule| rule.matches(body))
    }

    /// Whether any rule has been inserted.
    pub fn is_used(&self) -> bool {
        self.rules.values().any(|sequence| !sequence.is_empty())
    }

    /// Total number of rules across all status codes.
    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Whether the table holds no rules.
    pub fn is_empty(&self) -> bool {
        !self.is_used()
    }

    /// Rules for `status_code` in evaluation order.
    pub fn rules_for(&self, status_code: i64) -> &[DispatchRule<C>] {
        self.rules.get(&status_code).map_or(&[], Vec::as_slice)
    }
}

impl<C> Default for DispatchTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatch rule as written by an operator.
///
/// ```toml
/// [[dispatch_rules]]
/// status_code = 500
/// match = "timeout"
/// action = "retry"
/// context = "upstream timeout"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRuleConfig {
    /// Status code the rule is keyed on.
    pub status_code: i64,
    /// Optional body substring.
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_string: Option<String>,
    /// Action name: `success`, `retry`, `drop` or `disconnect`.
    pub action: String,
    /// Optional label carried as rule context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl TryFrom<&DispatchRuleConfig> for DispatchRule<Option<String>> {
    type Error = CoreError;

    fn try_from(config: &DispatchRuleConfig) -> Result<Self> {
        if !(MIN_STATUS_CODE..=MAX_STATUS_CODE).contains(&config.status_code) {
            return Err(CoreError::InvalidStatusCode { status_code: config.status_code });
        }
        let action = config.action.parse::<Action>()?;

        Ok(Self::with_context(
            config.status_code,
            config.match_string.as_deref(),
            action,
            config.context.clone(),
        ))
    }
}

impl DispatchTable<Option<String>> {
    /// Builds a table from configured rules, preserving their order.
    ///
    /// # Errors
    ///
    /// Returns the first validation error; no partial table is produced.
    pub fn from_config(rules: &[DispatchRuleConfig]) -> Result<Self> {
        let mut table = Self::new();
        for config in rules {
            table.push(DispatchRule::try_from(config)?);
        }
        Ok(table)
    }
}
