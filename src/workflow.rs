//! Session-scoped workflow state
//!
//! Tracks the macro-phase of a session (research, compression,
//! implementation), which domain specialists have been consulted, and the
//! append-only handoff history. Only the router mutates this state; handlers
//! see a [`WorkflowSnapshot`].

use crate::error::{RouterError, RouterResult};
use crate::handler::HandlerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info};

/// Macro-phase of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Research,
    Compression,
    Implementation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::Compression => "compression",
            Stage::Implementation => "implementation",
        }
    }

    /// Whether `self -> to` is one of the three permitted edges
    pub fn can_transition_to(&self, to: Stage) -> bool {
        matches!(
            (self, to),
            (Stage::Research, Stage::Compression)
                | (Stage::Compression, Stage::Implementation)
                | (Stage::Implementation, Stage::Research)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a handoff happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffKind {
    /// Handler emitted a `route to` directive
    Directive,
    /// Implementer reported missing research
    ResearchGap,
    /// Gap specialist finished; router returns to the compressor
    GapResolved,
}

/// One hop between handlers. Appended, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffEvent {
    pub sequence: u64,
    pub from: HandlerId,
    pub to: HandlerId,
    pub justification: String,
    pub kind: HandoffKind,
    pub timestamp: DateTime<Utc>,
}

/// Recorded stage change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
}

/// Mutable workflow state owned by the router
#[derive(Debug, Clone, Default)]
pub struct WorkflowState {
    stage: Stage,
    domains_touched: BTreeSet<HandlerId>,
    handoff_chain: Vec<HandoffEvent>,
    /// Index into `handoff_chain` where the unresolved chain begins
    chain_start: usize,
    active_handler: Option<HandlerId>,
    next_sequence: u64,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn domains_touched(&self) -> &BTreeSet<HandlerId> {
        &self.domains_touched
    }

    /// Full handoff history of the session
    pub fn handoff_chain(&self) -> &[HandoffEvent] {
        &self.handoff_chain
    }

    /// Hops recorded since the last terminal response
    pub fn unresolved_chain(&self) -> &[HandoffEvent] {
        &self.handoff_chain[self.chain_start..]
    }

    pub fn hops(&self) -> usize {
        self.unresolved_chain().len()
    }

    pub fn active_handler(&self) -> Option<HandlerId> {
        self.active_handler
    }

    /// `to` would revisit a handler already acting in the unresolved chain
    pub fn would_cycle(&self, from: HandlerId, to: HandlerId) -> bool {
        to == from || self.unresolved_chain().iter().any(|event| event.from == to)
    }

    /// Handlers in the unresolved chain in visiting order, ending with `tail`
    pub fn chain_path(&self, tail: HandlerId) -> Vec<HandlerId> {
        let mut path: Vec<HandlerId> = self.unresolved_chain().iter().map(|e| e.from).collect();
        path.push(tail);
        path
    }

    /// Immutable copy handed to handlers
    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            stage: self.stage,
            domains_touched: self.domains_touched.iter().copied().collect(),
            handoff_chain: self.handoff_chain.clone(),
            active_handler: self.active_handler,
        }
    }

    /// Mark `handler` as the single active handler, replacing any previous one
    pub(crate) fn activate(&mut self, handler: HandlerId) {
        self.active_handler = Some(handler);
    }

    /// Count a domain handler toward research breadth
    ///
    /// Returns true when the handler was not seen before.
    pub(crate) fn record_invocation(&mut self, handler: HandlerId) -> bool {
        if self.stage != Stage::Research || !handler.is_domain() {
            return false;
        }
        let inserted = self.domains_touched.insert(handler);
        if inserted {
            debug!(
                handler = %handler,
                domains_touched = self.domains_touched.len(),
                "New research domain touched"
            );
        }
        inserted
    }

    pub(crate) fn transition(&mut self, to: Stage) -> RouterResult<StageTransition> {
        let from = self.stage;
        if !from.can_transition_to(to) {
            return Err(RouterError::InvalidTransition { from, to });
        }
        self.stage = to;
        info!(from = %from, to = %to, "Workflow stage transition");
        Ok(StageTransition { from, to })
    }

    pub(crate) fn append_handoff(
        &mut self,
        from: HandlerId,
        to: HandlerId,
        justification: impl Into<String>,
        kind: HandoffKind,
    ) -> HandoffEvent {
        let event = HandoffEvent {
            sequence: self.next_sequence,
            from,
            to,
            justification: justification.into(),
            kind,
            timestamp: Utc::now(),
        };
        self.next_sequence += 1;
        self.handoff_chain.push(event.clone());
        event
    }

    /// Close the unresolved chain after a terminal response or fatal error
    pub(crate) fn resolve_chain(&mut self) {
        self.chain_start = self.handoff_chain.len();
        self.active_handler = None;
    }

    /// Return to the initial state (session end)
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Read-only view of [`WorkflowState`] given to handlers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub stage: Stage,
    pub domains_touched: Vec<HandlerId>,
    pub handoff_chain: Vec<HandoffEvent>,
    pub active_handler: Option<HandlerId>,
}
