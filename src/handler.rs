//! Specialist handler seam
//!
//! Handlers are opaque domain experts. The router hands them a request and an
//! immutable workflow snapshot; they hand back content and, optionally, a
//! handoff directive. A handler never receives anything that could invoke
//! another handler: `HandlerResult` is plain data that only the router
//! interprets.

use crate::workflow::WorkflowSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Closed set of known specialists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerId {
    /// Condenses research into an implementation brief
    Compressor,
    /// Executes implementation work against a brief
    Implementer,
    /// Configuration and settings libraries
    Config,
    /// Storage and save-data patterns
    Persistence,
    /// UI layout and widgets
    Ui,
    /// Client/server and replication
    Network,
    /// Generic API signatures
    Api,
    /// Design and analysis
    Architect,
}

impl HandlerId {
    /// Every known handler, in canonical order
    pub const ALL: [HandlerId; 8] = [
        HandlerId::Compressor,
        HandlerId::Implementer,
        HandlerId::Config,
        HandlerId::Persistence,
        HandlerId::Ui,
        HandlerId::Network,
        HandlerId::Api,
        HandlerId::Architect,
    ];

    /// Wire name used in configuration, overrides and handoff directives
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerId::Compressor => "compressor",
            HandlerId::Implementer => "implementer",
            HandlerId::Config => "config",
            HandlerId::Persistence => "persistence",
            HandlerId::Ui => "ui",
            HandlerId::Network => "network",
            HandlerId::Api => "api",
            HandlerId::Architect => "architect",
        }
    }

    /// Workflow handlers drive stage transitions and never count as research
    /// domains.
    pub fn is_workflow(&self) -> bool {
        matches!(self, HandlerId::Compressor | HandlerId::Implementer)
    }

    pub fn is_domain(&self) -> bool {
        !self.is_workflow()
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name that does not belong to the closed handler set
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown handler id '{0}'")]
pub struct UnknownHandlerId(pub String);

impl FromStr for HandlerId {
    type Err = UnknownHandlerId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        HandlerId::ALL
            .into_iter()
            .find(|id| id.as_str() == lowered)
            .ok_or_else(|| UnknownHandlerId(s.to_string()))
    }
}

/// A single free-form request inside a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub session_id: Uuid,
    pub text: String,
}

impl Request {
    pub fn new(session_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            text: text.into(),
        }
    }
}

/// What a handler returns to the router
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerResult {
    /// Work output shown to the caller if this is the last hop
    pub content: String,
    /// Optional directive text, interpreted only by the handoff parser
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_directive: Option<String>,
}

impl HandlerResult {
    /// Final output with no handoff
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            handoff_directive: None,
        }
    }

    /// Output that recommends another handler
    pub fn with_directive(content: impl Into<String>, directive: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            handoff_directive: Some(directive.into()),
        }
    }
}

/// Failure reported by a handler implementation
#[derive(Debug, Clone, Error, PartialEq)]
#[error("handler '{handler}' failed: {message}")]
pub struct HandlerError {
    pub handler: HandlerId,
    pub message: String,
}

impl HandlerError {
    pub fn new<S: Into<String>>(handler: HandlerId, message: S) -> Self {
        Self {
            handler,
            message: message.into(),
        }
    }
}

/// Specialist invocation interface
///
/// Implementations receive the request and a read-only snapshot of the
/// session's workflow state. They communicate state changes solely through
/// the returned directive text.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handler this implementation serves
    fn id(&self) -> HandlerId;

    /// Process one request
    async fn invoke(
        &self,
        request: &Request,
        state: &WorkflowSnapshot,
    ) -> Result<HandlerResult, HandlerError>;
}

/// Binding of handler ids to their implementations
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: BTreeMap<HandlerId, Arc<dyn Handler>>,
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSet")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler under its own id, replacing any earlier binding
    pub fn insert(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.id(), handler);
    }

    /// Builder form of [`HandlerSet::insert`]
    pub fn with(mut self, handler: Arc<dyn Handler>) -> Self {
        self.insert(handler);
        self
    }

    pub fn get(&self, id: HandlerId) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(&id)
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        self.handlers.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = HandlerId> + '_ {
        self.handlers.keys().copied()
    }
}

/// Stand-in specialist that acknowledges the request
///
/// Domain knowledge lives outside this crate; the CLI binds this handler for
/// every id so sessions can be exercised end to end.
#[derive(Debug, Clone)]
pub struct EchoHandler {
    id: HandlerId,
    display_name: String,
    brief_ready_marker: String,
}

impl EchoHandler {
    pub fn new(id: HandlerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            brief_ready_marker: crate::config::DEFAULT_BRIEF_READY_MARKER.to_string(),
        }
    }

    /// Marker appended by the echo compressor so the workflow can advance
    pub fn with_brief_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.brief_ready_marker = marker.into();
        self
    }
}

#[async_trait]
impl Handler for EchoHandler {
    fn id(&self) -> HandlerId {
        self.id
    }

    async fn invoke(
        &self,
        request: &Request,
        state: &WorkflowSnapshot,
    ) -> Result<HandlerResult, HandlerError> {
        let mut content = format!(
            "[{}] stage={} domains={}: {}",
            self.display_name,
            state.stage,
            state.domains_touched.len(),
            request.text.trim()
        );
        if self.id == HandlerId::Compressor {
            content.push('\n');
            content.push_str(&self.brief_ready_marker);
        }
        Ok(HandlerResult::content(content))
    }
}
