//! Router configuration
//!
//! The handler registry is the source of truth for the rule table. It is
//! loaded once from TOML:
//!
//! ```toml
//! [router]
//! max_hops = 6
//!
//! [[handlers]]
//! id = "config"
//! display_name = "Configuration Specialist"
//! tier = 3
//! specificity = 80
//! phrases = ["settings", "preferences"]
//!
//! [[precedence]]
//! winner = "ui"
//! over = ["network"]
//! ```

use crate::handler::HandlerId;
use crate::routing::RuleTable;
use crate::workflow::Stage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Marker the compressor emits once an implementation brief is complete
pub const DEFAULT_BRIEF_READY_MARKER: &str = "[BRIEF READY]";

/// Default bound on handoff hops per request
pub const DEFAULT_MAX_HOPS: usize = 6;

/// Largest accepted `max_hops`
pub const MAX_HOPS_LIMIT: usize = 8;

const BUILTIN_REGISTRY: &str = include_str!("../config/router.toml");

/// Top-level router configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    #[serde(default)]
    pub router: RouterSection,
    /// Ordered handler registry
    pub handlers: Vec<HandlerEntry>,
    /// Explicit same-tier conflict winners
    #[serde(default)]
    pub precedence: Vec<PrecedenceEntry>,
}

/// Router behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterSection {
    /// Maximum handoff hops per request (1..=8)
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    /// Text in compressor output that completes the compression stage
    #[serde(default = "default_brief_ready_marker")]
    pub brief_ready_marker: String,
    /// Reply used when no rule matches
    #[serde(default = "default_direct_reply")]
    pub direct_reply: String,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            brief_ready_marker: default_brief_ready_marker(),
            direct_reply: default_direct_reply(),
        }
    }
}

fn default_max_hops() -> usize {
    DEFAULT_MAX_HOPS
}

fn default_brief_ready_marker() -> String {
    DEFAULT_BRIEF_READY_MARKER.to_string()
}

fn default_direct_reply() -> String {
    "No specialist matched this request; answering directly.".to_string()
}

/// One registry entry: a handler and its routing rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerEntry {
    pub id: HandlerId,
    pub display_name: String,
    /// Priority tier, 1 (highest) to 4
    pub tier: u8,
    /// Higher is more specific; breaks same-tier conflicts
    pub specificity: u8,
    /// Case-insensitive phrases matched on word boundaries
    #[serde(default)]
    pub phrases: Vec<String>,
    /// Case-insensitive regular expressions
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Stages in which the rule is live; empty means all
    #[serde(default)]
    pub stages: Vec<Stage>,
    /// Fire once this many research domains have been touched
    #[serde(default)]
    pub domain_threshold: Option<usize>,
    /// Fire while an implementation brief is ready
    #[serde(default)]
    pub brief_ready: bool,
}

impl HandlerEntry {
    fn has_triggers(&self) -> bool {
        !self.phrases.is_empty()
            || !self.patterns.is_empty()
            || self.domain_threshold.is_some()
            || self.brief_ready
    }
}

/// `winner` beats every handler in `over` when they match in the same tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrecedenceEntry {
    pub winner: HandlerId,
    pub over: Vec<HandlerId>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Handler '{0}' is registered more than once")]
    DuplicateHandler(HandlerId),
    #[error("Handler '{handler}' has invalid tier {tier} (expected 1-4)")]
    InvalidTier { handler: HandlerId, tier: u8 },
    #[error("Handler '{handler}' has an invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        handler: HandlerId,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Handler '{0}' has no triggers")]
    EmptyTriggerSet(HandlerId),
    #[error("Precedence entry names unregistered handler '{0}'")]
    UnregisteredPrecedence(HandlerId),
    #[error("Conflicting precedence between '{0}' and '{1}'")]
    ConflictingPrecedence(HandlerId, HandlerId),
    #[error("Precedence table is incomplete; unresolved pairs: {}", format_pairs(.0))]
    IncompletePrecedence(Vec<(HandlerId, HandlerId)>),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn format_pairs(pairs: &[(HandlerId, HandlerId)]) -> String {
    pairs
        .iter()
        .map(|(a, b)| format!("{a}/{b}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl RouterConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RouterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Registry shipped with the crate
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_toml_str(BUILTIN_REGISTRY)
    }

    /// Structural checks plus a full rule-table build (patterns compile,
    /// precedence is total)
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router.max_hops == 0 || self.router.max_hops > MAX_HOPS_LIMIT {
            return Err(ConfigError::InvalidConfig(format!(
                "router.max_hops must be between 1 and {MAX_HOPS_LIMIT}, got {}",
                self.router.max_hops
            )));
        }
        if self.router.brief_ready_marker.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "router.brief_ready_marker must not be empty".to_string(),
            ));
        }
        if self.handlers.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one [[handlers]] entry is required".to_string(),
            ));
        }

        let mut seen = std::collections::BTreeSet::new();
        for entry in &self.handlers {
            if !seen.insert(entry.id) {
                return Err(ConfigError::DuplicateHandler(entry.id));
            }
            if !entry.has_triggers() {
                return Err(ConfigError::EmptyTriggerSet(entry.id));
            }
        }

        RuleTable::from_config(self).map(|_| ())
    }

    /// Look up a registry entry
    pub fn handler(&self, id: HandlerId) -> Option<&HandlerEntry> {
        self.handlers.iter().find(|entry| entry.id == id)
    }
}
