//! Handoff directive grammar and validation
//!
//! A handler recommends the next handler through a single-line directive:
//!
//! ```text
//! route to <target>
//! route to <target>: <justification>
//! missing research <target>: <detail>
//! ```
//!
//! Anything that does not match exactly is treated as no handoff. A
//! grammatical directive naming an unregistered handler, or revisiting a
//! handler already acting in the unresolved chain, is a hard error.

use crate::error::{RouterError, RouterResult};
use crate::handler::{HandlerId, HandlerResult};
use crate::routing::rules::RuleTable;
use crate::workflow::{HandoffKind, Stage, WorkflowState};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

static ROUTE_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^route to ([a-z0-9-]+)(?:: (\S.*))?$").expect("route directive regex is valid")
});

static GAP_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^missing research ([a-z0-9-]+): (\S.*)$").expect("gap directive regex is valid")
});

/// Grammatical directive, target not yet resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffDirective {
    RouteTo { target: String, justification: String },
    ResearchGap { target: String, detail: String },
}

/// Parse directive text against the grammar only
pub fn parse_directive(text: &str) -> Option<HandoffDirective> {
    let text = text.trim();
    if let Some(caps) = ROUTE_DIRECTIVE.captures(text) {
        return Some(HandoffDirective::RouteTo {
            target: caps[1].to_string(),
            justification: caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        });
    }
    if let Some(caps) = GAP_DIRECTIVE.captures(text) {
        return Some(HandoffDirective::ResearchGap {
            target: caps[1].to_string(),
            detail: caps[2].trim().to_string(),
        });
    }
    None
}

/// A validated hop, ready to be appended to the handoff chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub from: HandlerId,
    pub to: HandlerId,
    pub justification: String,
    pub kind: HandoffKind,
}

/// Extracts and validates handoffs from handler output
#[derive(Debug, Clone)]
pub struct HandoffParser {
    table: Arc<RuleTable>,
}

impl HandoffParser {
    pub fn new(table: Arc<RuleTable>) -> Self {
        Self { table }
    }

    /// Extract a handoff from `output` produced by `from`.
    ///
    /// `Ok(None)` means the output is final.
    pub fn parse(
        &self,
        from: HandlerId,
        output: &HandlerResult,
        state: &WorkflowState,
    ) -> RouterResult<Option<Handoff>> {
        let Some(text) = output.handoff_directive.as_deref() else {
            return Ok(None);
        };

        let Some(directive) = parse_directive(text) else {
            debug!(
                handler = %from,
                directive = %text,
                "Directive does not match handoff grammar; treating output as final"
            );
            return Ok(None);
        };

        let (target, justification, kind) = match directive {
            HandoffDirective::RouteTo {
                target,
                justification,
            } => (target, justification, HandoffKind::Directive),
            HandoffDirective::ResearchGap { target, detail } => {
                if from != HandlerId::Implementer || state.stage() != Stage::Implementation {
                    debug!(
                        handler = %from,
                        stage = %state.stage(),
                        "Gap report outside implementation stage; treating output as final"
                    );
                    return Ok(None);
                }
                (target, detail, HandoffKind::ResearchGap)
            }
        };

        let to = self.resolve_target(from, &target, kind)?;

        if state.would_cycle(from, to) {
            let chain = state.chain_path(from);
            warn!(
                from = %from,
                to = %to,
                hops = state.hops(),
                "Cyclic handoff rejected"
            );
            return Err(RouterError::CyclicHandoff { chain, repeated: to });
        }

        Ok(Some(Handoff {
            from,
            to,
            justification,
            kind,
        }))
    }

    fn resolve_target(
        &self,
        from: HandlerId,
        target: &str,
        kind: HandoffKind,
    ) -> RouterResult<HandlerId> {
        let resolved = target
            .parse::<HandlerId>()
            .ok()
            .filter(|id| self.table.contains(*id))
            .filter(|id| kind != HandoffKind::ResearchGap || id.is_domain());

        resolved.ok_or_else(|| {
            warn!(from = %from, target = %target, "Handoff names an invalid target");
            RouterError::invalid_handoff_target(from, target)
        })
    }
}
