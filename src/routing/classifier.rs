//! Request classification
//!
//! Matches a request against the rule table. An explicit `route to <name>`
//! override bypasses every tier; otherwise tiers are evaluated 1 -> 4 and the
//! first tier with a match decides. A request that matches nothing is a
//! legitimate `NoMatch` outcome.

use crate::error::{RouterError, RouterResult};
use crate::handler::{HandlerId, Request};
use crate::routing::conflict::ConflictResolver;
use crate::routing::rules::{RuleTable, Tier, TriggerMatch};
use crate::workflow::WorkflowState;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

static OVERRIDE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\broute\s+to\s+([a-z0-9-]+)\b").expect("override pattern is a valid regex")
});

/// Why a handler was (or was not) selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    RuleMatch,
    ExplicitOverride,
    /// Next hop of a validated handoff
    HandoffFollow,
    NoMatch,
}

/// Output of classification, consumed by the dispatch step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub selected_handler: Option<HandlerId>,
    pub reason: DecisionReason,
    /// Tier whose rule fired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    /// Trigger that fired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerMatch>,
    /// Every handler that matched in the deciding tier, declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<HandlerId>,
}

impl RoutingDecision {
    pub fn no_match() -> Self {
        Self {
            selected_handler: None,
            reason: DecisionReason::NoMatch,
            tier: None,
            trigger: None,
            candidates: Vec::new(),
        }
    }

    pub fn explicit_override(handler: HandlerId) -> Self {
        Self {
            selected_handler: Some(handler),
            reason: DecisionReason::ExplicitOverride,
            tier: None,
            trigger: None,
            candidates: Vec::new(),
        }
    }

    pub fn handoff_follow(handler: HandlerId) -> Self {
        Self {
            selected_handler: Some(handler),
            reason: DecisionReason::HandoffFollow,
            tier: None,
            trigger: None,
            candidates: Vec::new(),
        }
    }

    pub fn is_no_match(&self) -> bool {
        self.reason == DecisionReason::NoMatch
    }
}

/// Find the first `route to <name>` naming a known handler.
///
/// Text such as "route to the login screen" does not name a handler and is
/// not an override.
pub fn find_override(text: &str) -> Option<HandlerId> {
    OVERRIDE_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|name| name.as_str().parse::<HandlerId>().ok())
}

/// Tiered rule matcher
#[derive(Debug, Clone)]
pub struct Classifier {
    table: Arc<RuleTable>,
}

impl Classifier {
    pub fn new(table: Arc<RuleTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    /// Classify a request against the current workflow state
    pub fn classify(&self, request: &Request, state: &WorkflowState) -> RouterResult<RoutingDecision> {
        self.classify_text(&request.text, state)
    }

    /// Classify raw text. Pure: identical input and state give an identical
    /// decision.
    pub fn classify_text(&self, text: &str, state: &WorkflowState) -> RouterResult<RoutingDecision> {
        if let Some(target) = find_override(text) {
            if !self.table.contains(target) {
                return Err(RouterError::UnregisteredHandler { handler: target });
            }
            info!(handler = %target, "Explicit route override");
            return Ok(RoutingDecision::explicit_override(target));
        }

        let resolver = ConflictResolver::new(self.table.precedence());

        for tier in Tier::ALL {
            let matches: Vec<_> = self
                .table
                .rules_in_tier(tier)
                .filter_map(|rule| rule.matches(text, state).map(|hit| (rule, hit)))
                .collect();

            if matches.is_empty() {
                continue;
            }

            let candidates: Vec<HandlerId> = matches.iter().map(|(rule, _)| rule.target).collect();
            let (rule, trigger) = if matches.len() == 1 {
                matches[0].clone()
            } else {
                let rules: Vec<_> = matches.iter().map(|(rule, _)| *rule).collect();
                let winner = resolver.resolve(tier, &rules)?;
                matches
                    .iter()
                    .find(|(rule, _)| rule.target == winner.target)
                    .cloned()
                    .unwrap_or_else(|| matches[0].clone())
            };

            debug!(
                tier = tier.number(),
                handler = %rule.target,
                trigger = %trigger,
                candidates = candidates.len(),
                "Rule matched"
            );

            return Ok(RoutingDecision {
                selected_handler: Some(rule.target),
                reason: DecisionReason::RuleMatch,
                tier: Some(tier),
                trigger: Some(trigger),
                candidates,
            });
        }

        debug!("No rule matched");
        Ok(RoutingDecision::no_match())
    }
}
