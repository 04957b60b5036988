//! Router core
//!
//! Handlers are domain experts, not workflow coordinators. They return work
//! output and at most a recommendation; the router alone decides what runs
//! next and is the only code that invokes a handler.
//!
//! ```text
//! request -> classify -> invoke -> parse handoff -> (invoke ...) -> response
//! ```
//!
//! A request runs to completion, including its whole handoff chain, before
//! the next one is accepted. Fatal routing errors never escape: they degrade
//! into an unrouted response carrying a diagnostic and the decision trail.

use crate::config::{ConfigError, RouterConfig};
use crate::error::{Diagnostic, RouterError};
use crate::handler::{HandlerId, HandlerResult, HandlerSet, Request};
use crate::observability::metrics::metrics;
use crate::routing::classifier::{Classifier, DecisionReason, RoutingDecision};
use crate::routing::handoff::{Handoff, HandoffParser};
use crate::routing::rules::{RuleTable, Tier, TriggerMatch};
use crate::workflow::{HandoffKind, Stage, WorkflowState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// How a request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A handler produced the final content
    Handled,
    /// No rule matched; answered without a handler
    Direct,
    /// Same-tier ambiguity; the caller is asked to pick
    Clarification,
    /// A fatal routing error stopped the chain
    Aborted,
}

/// One step of the decision trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TrailEntry {
    Classified {
        handler: Option<HandlerId>,
        reason: DecisionReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        tier: Option<Tier>,
        #[serde(skip_serializing_if = "Option::is_none")]
        trigger: Option<TriggerMatch>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        candidates: Vec<HandlerId>,
    },
    Invoked {
        handler: HandlerId,
        stage: Stage,
    },
    StageChanged {
        from: Stage,
        to: Stage,
    },
    Handoff {
        from: HandlerId,
        to: HandlerId,
        kind: HandoffKind,
        justification: String,
    },
    Failed {
        diagnostic: Diagnostic,
    },
}

impl From<&RoutingDecision> for TrailEntry {
    fn from(decision: &RoutingDecision) -> Self {
        TrailEntry::Classified {
            handler: decision.selected_handler,
            reason: decision.reason,
            tier: decision.tier,
            trigger: decision.trigger.clone(),
            candidates: decision.candidates.clone(),
        }
    }
}

/// Result of routing one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResponse {
    pub request_id: Uuid,
    pub content: String,
    pub outcome: Outcome,
    /// Handler whose content is returned, if any
    pub handled_by: Option<HandlerId>,
    /// Hops taken in this request
    pub hops: usize,
    pub decision_trail: Vec<TrailEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Diagnostic>,
}

impl FinalResponse {
    pub fn is_handled(&self) -> bool {
        self.outcome == Outcome::Handled
    }

    /// Handlers invoked, in order
    pub fn invoked(&self) -> Vec<HandlerId> {
        self.decision_trail
            .iter()
            .filter_map(|entry| match entry {
                TrailEntry::Invoked { handler, .. } => Some(*handler),
                _ => None,
            })
            .collect()
    }
}

/// Router behaviour knobs, usually taken from `[router]`
#[derive(Debug, Clone, PartialEq)]
pub struct RouterSettings {
    pub max_hops: usize,
    pub brief_ready_marker: String,
    pub direct_reply: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        let section = crate::config::RouterSection::default();
        Self {
            max_hops: section.max_hops,
            brief_ready_marker: section.brief_ready_marker,
            direct_reply: section.direct_reply,
        }
    }
}

/// Dispatch loop: classification, invocation, handoff processing
#[derive(Debug, Clone)]
pub struct RouterCore {
    classifier: Classifier,
    parser: HandoffParser,
    handlers: HandlerSet,
    settings: RouterSettings,
}

/// Mutable bookkeeping for one request
struct RouteRun {
    trail: Vec<TrailEntry>,
    last: Option<(HandlerId, String)>,
    hops: usize,
}

impl RouterCore {
    pub fn new(table: Arc<RuleTable>, handlers: HandlerSet, settings: RouterSettings) -> Self {
        for id in table.handler_ids() {
            if !handlers.contains(id) {
                warn!(handler = %id, "Registered handler has no implementation bound");
            }
        }
        Self {
            classifier: Classifier::new(table.clone()),
            parser: HandoffParser::new(table),
            handlers,
            settings,
        }
    }

    /// Build the rule table from configuration and bind handlers
    pub fn from_config(config: &RouterConfig, handlers: HandlerSet) -> Result<Self, ConfigError> {
        let table = Arc::new(RuleTable::from_config(config)?);
        let settings = RouterSettings {
            max_hops: config.router.max_hops,
            brief_ready_marker: config.router.brief_ready_marker.clone(),
            direct_reply: config.router.direct_reply.clone(),
        };
        Ok(Self::new(table, handlers, settings))
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Route one request to a terminal response
    pub async fn route(&self, request: &Request, state: &mut WorkflowState) -> FinalResponse {
        let span = crate::route_span!(
            request_id = %request.id,
            session_id = %request.session_id,
            stage = %state.stage()
        );
        let started = Instant::now();
        metrics().request_received();

        let response = self.route_inner(request, state).instrument(span).await;

        metrics().request_finished(response.outcome, response.hops, started.elapsed());
        response
    }

    async fn route_inner(&self, request: &Request, state: &mut WorkflowState) -> FinalResponse {
        let mut run = RouteRun {
            trail: Vec::new(),
            last: None,
            hops: 0,
        };

        // Every exit from a previous run closed its chain.
        debug_assert!(state.active_handler().is_none());

        let mut current = match self.classifier.classify(request, state) {
            Ok(decision) => {
                run.trail.push(TrailEntry::from(&decision));
                match decision.selected_handler {
                    Some(handler) => handler,
                    None => return self.direct(request, state, run),
                }
            }
            Err(err) => return self.fail(request, state, run, err),
        };

        let mut gap_open = false;

        loop {
            let result = match self.dispatch(current, request, state, &mut run).await {
                Ok(result) => result,
                Err(err) => return self.fail(request, state, run, err),
            };

            let handoff = match self.parser.parse(current, &result, state) {
                Ok(Some(handoff)) => handoff,
                Ok(None) if gap_open && current != HandlerId::Compressor => Handoff {
                    from: current,
                    to: HandlerId::Compressor,
                    justification: "research gap resolved".to_string(),
                    kind: HandoffKind::GapResolved,
                },
                Ok(None) => return self.finish(request, state, run, result),
                Err(err) => return self.fail(request, state, run, err),
            };

            if let Err(err) = self.apply_handoff(&handoff, state, &mut run) {
                return self.fail(request, state, run, err);
            }
            if handoff.kind == HandoffKind::ResearchGap {
                gap_open = true;
            }
            let decision = RoutingDecision::handoff_follow(handoff.to);
            run.trail.push(TrailEntry::from(&decision));
            current = handoff.to;
        }
    }

    /// The only place a handler executes
    async fn dispatch(
        &self,
        handler_id: HandlerId,
        request: &Request,
        state: &mut WorkflowState,
        run: &mut RouteRun,
    ) -> Result<HandlerResult, RouterError> {
        let handler = self
            .handlers
            .get(handler_id)
            .cloned()
            .ok_or(RouterError::UnregisteredHandler {
                handler: handler_id,
            })?;

        state.activate(handler_id);

        if handler_id == HandlerId::Compressor && state.stage() == Stage::Research {
            self.change_stage(state, Stage::Compression, run)?;
        }
        state.record_invocation(handler_id);
        run.trail.push(TrailEntry::Invoked {
            handler: handler_id,
            stage: state.stage(),
        });

        debug!(handler = %handler_id, stage = %state.stage(), "Invoking handler");
        metrics().handler_invoked(handler_id);

        let snapshot = state.snapshot();
        let result = handler.invoke(request, &snapshot).await?;

        if handler_id == HandlerId::Compressor
            && state.stage() == Stage::Compression
            && result.content.contains(&self.settings.brief_ready_marker)
        {
            self.change_stage(state, Stage::Implementation, run)?;
        }

        run.last = Some((handler_id, result.content.clone()));
        Ok(result)
    }

    fn apply_handoff(
        &self,
        handoff: &Handoff,
        state: &mut WorkflowState,
        run: &mut RouteRun,
    ) -> Result<(), RouterError> {
        let _span = crate::handoff_span!(
            from = %handoff.from,
            to = %handoff.to,
            kind = ?handoff.kind
        )
        .entered();

        if state.hops() >= self.settings.max_hops {
            return Err(RouterError::chain_length_exceeded(
                state.hops() + 1,
                self.settings.max_hops,
            ));
        }
        if handoff.kind == HandoffKind::GapResolved && state.would_cycle(handoff.from, handoff.to) {
            return Err(RouterError::CyclicHandoff {
                chain: state.chain_path(handoff.from),
                repeated: handoff.to,
            });
        }
        if handoff.kind == HandoffKind::ResearchGap {
            self.change_stage(state, Stage::Research, run)?;
        }

        let event = state.append_handoff(
            handoff.from,
            handoff.to,
            handoff.justification.clone(),
            handoff.kind,
        );
        state.activate(handoff.to);
        run.hops += 1;
        metrics().handoff_followed();

        info!(
            sequence = event.sequence,
            hops = state.hops(),
            justification = %event.justification,
            "Following handoff"
        );
        run.trail.push(TrailEntry::Handoff {
            from: event.from,
            to: event.to,
            kind: event.kind,
            justification: event.justification,
        });
        Ok(())
    }

    fn change_stage(
        &self,
        state: &mut WorkflowState,
        to: Stage,
        run: &mut RouteRun,
    ) -> Result<(), RouterError> {
        let transition = state.transition(to)?;
        metrics().stage_transition();
        run.trail.push(TrailEntry::StageChanged {
            from: transition.from,
            to: transition.to,
        });
        Ok(())
    }

    fn finish(
        &self,
        request: &Request,
        state: &mut WorkflowState,
        run: RouteRun,
        result: HandlerResult,
    ) -> FinalResponse {
        state.resolve_chain();
        let handled_by = run.last.as_ref().map(|(id, _)| *id);
        info!(handler = ?handled_by, hops = run.hops, "Request handled");
        FinalResponse {
            request_id: request.id,
            content: result.content,
            outcome: Outcome::Handled,
            handled_by,
            hops: run.hops,
            decision_trail: run.trail,
            error: None,
        }
    }

    fn direct(&self, request: &Request, state: &mut WorkflowState, run: RouteRun) -> FinalResponse {
        state.resolve_chain();
        info!("No rule matched; answering directly");
        FinalResponse {
            request_id: request.id,
            content: self.settings.direct_reply.clone(),
            outcome: Outcome::Direct,
            handled_by: None,
            hops: 0,
            decision_trail: run.trail,
            error: None,
        }
    }

    /// Degrade a routing error into a response
    fn fail(
        &self,
        request: &Request,
        state: &mut WorkflowState,
        mut run: RouteRun,
        err: RouterError,
    ) -> FinalResponse {
        state.resolve_chain();
        let diagnostic = err.to_diagnostic();
        metrics().routing_error(diagnostic.code);
        run.trail.push(TrailEntry::Failed {
            diagnostic: diagnostic.clone(),
        });

        let (outcome, content) = match &err {
            RouterError::AmbiguousMatch { candidates, .. } => {
                warn!(error = %err, "Ambiguous classification; asking for clarification");
                let names = candidates
                    .iter()
                    .map(HandlerId::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                (
                    Outcome::Clarification,
                    format!(
                        "This request matches several specialists ({names}). \
                         Which one should handle it? Reply with \"route to <name>\"."
                    ),
                )
            }
            _ => {
                error!(error = %err, hops = run.hops, "Routing aborted");
                let content = match &run.last {
                    Some((_, content)) => {
                        format!("{content}\n\n[routing aborted: {}]", diagnostic.message)
                    }
                    None => format!("[routing failed: {}]", diagnostic.message),
                };
                (Outcome::Aborted, content)
            }
        };

        FinalResponse {
            request_id: request.id,
            content,
            outcome,
            handled_by: run.last.as_ref().map(|(id, _)| *id),
            hops: run.hops,
            decision_trail: run.trail,
            error: Some(diagnostic),
        }
    }
}
