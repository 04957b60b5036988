//! Specialist Router
//!
//! Deterministic dispatch of free-form requests to exactly one specialist
//! handler, with a three-stage workflow and validated handler-to-handler
//! handoffs.
//!
//! # Overview
//!
//! - Priority-tier classification over an immutable rule table
//! - Pairwise precedence for same-tier conflicts
//! - Research -> Compression -> Implementation workflow state machine
//! - Strict handoff directives with anti-cycle and bounded-chain checks
//! - Router core that degrades every routing error into a response
//!
//! # Quick Start
//!
//! ```rust
//! use specialist_router::config::RouterConfig;
//! use specialist_router::handler::{EchoHandler, HandlerSet};
//! use specialist_router::routing::RouterCore;
//! use specialist_router::session::SessionManager;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = RouterConfig::builtin().unwrap();
//! let mut handlers = HandlerSet::new();
//! for entry in &config.handlers {
//!     handlers.insert(Arc::new(EchoHandler::new(entry.id, &entry.display_name)));
//! }
//!
//! let core = RouterCore::from_config(&config, handlers).unwrap();
//! let mut sessions = SessionManager::new(core);
//! let session = sessions.start_session();
//!
//! let response = sessions.route(session, "where should the menu button go?").await.unwrap();
//! assert_eq!(response.handled_by.map(|id| id.as_str()), Some("ui"));
//! # });
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod observability;
pub mod routing;
pub mod session;
pub mod testing;
pub mod workflow;

pub use config::{ConfigError, RouterConfig};
pub use error::{Diagnostic, ErrorCode, RouterError, RouterResult};
pub use handler::{Handler, HandlerError, HandlerId, HandlerResult, HandlerSet, Request};
pub use routing::{FinalResponse, Outcome, RouterCore, TrailEntry};
pub use session::{SessionId, SessionManager};
pub use workflow::{Stage, WorkflowSnapshot, WorkflowState};
