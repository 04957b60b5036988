//! Session boundary
//!
//! One [`WorkflowState`] per session. Requests are routed one at a time:
//! `route` takes `&mut self`, so a second request cannot start while a
//! handoff chain is still running.

use crate::error::{RouterError, RouterResult};
use crate::handler::Request;
use crate::routing::{FinalResponse, RouterCore};
use crate::workflow::WorkflowState;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

pub type SessionId = Uuid;

/// Owns the router core and every live session's state
#[derive(Debug)]
pub struct SessionManager {
    core: RouterCore,
    sessions: HashMap<SessionId, WorkflowState>,
}

impl SessionManager {
    pub fn new(core: RouterCore) -> Self {
        Self {
            core,
            sessions: HashMap::new(),
        }
    }

    pub fn core(&self) -> &RouterCore {
        &self.core
    }

    /// Open a session with fresh workflow state
    pub fn start_session(&mut self) -> SessionId {
        let id = Uuid::new_v4();
        self.sessions.insert(id, WorkflowState::new());
        info!(session_id = %id, "Session started");
        id
    }

    /// Close a session and discard its state
    pub fn end_session(&mut self, id: SessionId) -> RouterResult<()> {
        let mut state = self
            .sessions
            .remove(&id)
            .ok_or(RouterError::UnknownSession(id))?;
        info!(
            session_id = %id,
            stage = %state.stage(),
            domains_touched = state.domains_touched().len(),
            handoffs = state.handoff_chain().len(),
            "Session ended"
        );
        state.reset();
        Ok(())
    }

    /// Route one request inside a session
    pub async fn route(&mut self, id: SessionId, text: &str) -> RouterResult<FinalResponse> {
        let state = self
            .sessions
            .get_mut(&id)
            .ok_or(RouterError::UnknownSession(id))?;
        let request = Request::new(id, text);
        Ok(self.core.route(&request, state).await)
    }

    /// Read-only view of a session's state
    pub fn state(&self, id: SessionId) -> RouterResult<&WorkflowState> {
        self.sessions.get(&id).ok_or(RouterError::UnknownSession(id))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
