//! Core types shared by sinkline destinations.
//!
//! Provides the message unit that flows from the shared queue to destination
//! workers, the closed set of outcomes a delivery attempt can produce, and
//! the ordered status-code dispatch table that transports use to translate a
//! response (status code plus body) into one of those outcomes.
//!
//! # Dispatch rules
//!
//! Rules are keyed by status code and evaluated in insertion order. A rule
//! with no match string matches any response for its code; a rule with a
//! match string matches when that string occurs in the response body.
//!
//! ```
//! use sinkline_core::{Action, DispatchRule, DispatchTable};
//!
//! let mut table = DispatchTable::new();
//! table.insert(&DispatchRule::new(500, Some("timeout"), Action::Retry));
//! table.insert(&DispatchRule::new(500, None, Action::Disconnect));
//!
//! let rule = table.lookup(500, b"connection timeout occurred").unwrap();
//! assert_eq!(rule.action, Action::Retry);
//!
//! let rule = table.lookup(500, b"internal error").unwrap();
//! assert_eq!(rule.action, Action::Disconnect);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod action;
pub mod dispatch;
pub mod error;
pub mod models;

pub use action::{Action, ActionResult};
pub use dispatch::{DispatchRule, DispatchRuleConfig, DispatchTable};
pub use error::{CoreError, Result};
pub use models::{Message, MessageId};
