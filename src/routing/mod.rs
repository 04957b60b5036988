//! Routing infrastructure
//!
//! ## Rule table (rules.rs)
//!
//! Ordered, immutable routing rules compiled from the handler registry, each
//! with a priority tier, a trigger set and a specificity rank.
//!
//! ## Classification (classifier.rs, conflict.rs)
//!
//! Explicit overrides first, then tiers 1 -> 4. Same-tier matches are
//! resolved through the pairwise precedence matrix.
//!
//! ## Handoffs (handoff.rs)
//!
//! Strict directive grammar plus target and cycle validation.
//!
//! ## Router core (router.rs)
//!
//! The bounded dispatch loop tying the pieces together.

pub mod classifier;
pub mod conflict;
pub mod handoff;
pub mod router;
pub mod rules;

pub use classifier::{find_override, Classifier, DecisionReason, RoutingDecision};
pub use conflict::{ConflictResolver, PrecedenceMatrix};
pub use handoff::{parse_directive, Handoff, HandoffDirective, HandoffParser};
pub use router::{FinalResponse, Outcome, RouterCore, RouterSettings, TrailEntry};
pub use rules::{RoutingRule, RuleTable, Tier, TriggerMatch, TriggerSet};
