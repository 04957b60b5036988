//! Rule table
//!
//! Static, ordered registry of routing rules compiled once from the handler
//! registry. Every rule belongs to a priority tier and owns a trigger set of
//! phrases, regular expressions and workflow-state conditions.

use crate::config::{ConfigError, HandlerEntry, RouterConfig};
use crate::handler::HandlerId;
use crate::routing::conflict::PrecedenceMatrix;
use crate::workflow::{Stage, WorkflowState};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority tier; lower number is evaluated first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Tier {
    /// Phase-change detection (research -> compression)
    WorkflowTransition,
    /// Explicit code/action requests or a ready brief
    DirectExecution,
    /// Domain specialists
    DomainSpecific,
    /// Design and analysis
    Design,
}

impl Tier {
    pub const ALL: [Tier; 4] = [
        Tier::WorkflowTransition,
        Tier::DirectExecution,
        Tier::DomainSpecific,
        Tier::Design,
    ];

    pub fn number(&self) -> u8 {
        match self {
            Tier::WorkflowTransition => 1,
            Tier::DirectExecution => 2,
            Tier::DomainSpecific => 3,
            Tier::Design => 4,
        }
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.number()
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Tier::WorkflowTransition),
            2 => Ok(Tier::DirectExecution),
            3 => Ok(Tier::DomainSpecific),
            4 => Ok(Tier::Design),
            other => Err(format!("tier must be 1-4, got {other}")),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {}", self.number())
    }
}

/// What made a rule fire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerMatch {
    Phrase { phrase: String },
    Pattern { pattern: String },
    DomainThreshold { touched: usize, threshold: usize },
    BriefReady,
}

impl fmt::Display for TriggerMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMatch::Phrase { phrase } => write!(f, "phrase \"{phrase}\""),
            TriggerMatch::Pattern { pattern } => write!(f, "pattern /{pattern}/"),
            TriggerMatch::DomainThreshold { touched, threshold } => {
                write!(f, "{touched} domains touched (threshold {threshold})")
            }
            TriggerMatch::BriefReady => f.write_str("implementation brief ready"),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledTrigger {
    source: String,
    regex: Regex,
}

/// Declarative predicate of a rule
#[derive(Debug, Clone, Default)]
pub struct TriggerSet {
    phrases: Vec<CompiledTrigger>,
    patterns: Vec<CompiledTrigger>,
    domain_threshold: Option<usize>,
    brief_ready: bool,
}

impl TriggerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a phrase matched case-insensitively on word boundaries
    pub fn with_phrase(mut self, phrase: &str) -> Result<Self, regex::Error> {
        self.phrases.push(CompiledTrigger {
            source: phrase.to_string(),
            regex: phrase_regex(phrase)?,
        });
        Ok(self)
    }

    /// Add a case-insensitive regular expression
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.patterns.push(CompiledTrigger {
            source: pattern.to_string(),
            regex: RegexBuilder::new(pattern).case_insensitive(true).build()?,
        });
        Ok(self)
    }

    pub fn with_domain_threshold(mut self, threshold: usize) -> Self {
        self.domain_threshold = Some(threshold);
        self
    }

    pub fn with_brief_ready(mut self) -> Self {
        self.brief_ready = true;
        self
    }

    /// Evaluate lexical triggers first, then state triggers
    pub fn evaluate(&self, text: &str, state: &WorkflowState) -> Option<TriggerMatch> {
        if let Some(hit) = self.phrases.iter().find(|t| t.regex.is_match(text)) {
            return Some(TriggerMatch::Phrase {
                phrase: hit.source.clone(),
            });
        }
        if let Some(hit) = self.patterns.iter().find(|t| t.regex.is_match(text)) {
            return Some(TriggerMatch::Pattern {
                pattern: hit.source.clone(),
            });
        }
        if let Some(threshold) = self.domain_threshold {
            let touched = state.domains_touched().len();
            if state.stage() == Stage::Research && touched >= threshold {
                return Some(TriggerMatch::DomainThreshold { touched, threshold });
            }
        }
        if self.brief_ready && state.stage() == Stage::Implementation {
            return Some(TriggerMatch::BriefReady);
        }
        None
    }
}

/// Build a word-bounded, whitespace-tolerant regex for a phrase.
/// Boundaries are only asserted next to word characters so phrases such as
/// "c#" still match.
fn phrase_regex(phrase: &str) -> Result<Regex, regex::Error> {
    let trimmed = phrase.trim();
    let body = trimmed
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let start = if is_word(trimmed.chars().next()) { r"\b" } else { "" };
    let end = if is_word(trimmed.chars().last()) { r"\b" } else { "" };
    RegexBuilder::new(&format!("{start}{body}{end}"))
        .case_insensitive(true)
        .build()
}

/// Immutable routing rule
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub tier: Tier,
    pub target: HandlerId,
    pub display_name: String,
    pub specificity: u8,
    pub triggers: TriggerSet,
    /// Stages in which the rule is live; empty means all stages
    pub stages: Vec<Stage>,
}

impl RoutingRule {
    pub fn new(tier: Tier, target: HandlerId, specificity: u8, triggers: TriggerSet) -> Self {
        Self {
            tier,
            target,
            display_name: target.as_str().to_string(),
            specificity,
            triggers,
            stages: Vec::new(),
        }
    }

    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = stages;
        self
    }

    pub fn is_live_in(&self, stage: Stage) -> bool {
        self.stages.is_empty() || self.stages.contains(&stage)
    }

    /// Evaluate this rule against a request
    pub fn matches(&self, text: &str, state: &WorkflowState) -> Option<TriggerMatch> {
        if !self.is_live_in(state.stage()) {
            return None;
        }
        self.triggers.evaluate(text, state)
    }

    fn from_entry(entry: &HandlerEntry) -> Result<Self, ConfigError> {
        let tier = Tier::try_from(entry.tier).map_err(|_| ConfigError::InvalidTier {
            handler: entry.id,
            tier: entry.tier,
        })?;

        let invalid = |pattern: &str, source: regex::Error| ConfigError::InvalidPattern {
            handler: entry.id,
            pattern: pattern.to_string(),
            source,
        };

        let mut triggers = TriggerSet::new();
        for phrase in &entry.phrases {
            triggers = triggers
                .with_phrase(phrase)
                .map_err(|e| invalid(phrase, e))?;
        }
        for pattern in &entry.patterns {
            triggers = triggers
                .with_pattern(pattern)
                .map_err(|e| invalid(pattern, e))?;
        }
        if let Some(threshold) = entry.domain_threshold {
            triggers = triggers.with_domain_threshold(threshold);
        }
        if entry.brief_ready {
            triggers = triggers.with_brief_ready();
        }

        Ok(Self {
            tier,
            target: entry.id,
            display_name: entry.display_name.clone(),
            specificity: entry.specificity,
            triggers,
            stages: entry.stages.clone(),
        })
    }
}

/// Ordered rule registry plus its same-tier precedence matrix
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<RoutingRule>,
    precedence: PrecedenceMatrix,
}

impl RuleTable {
    /// Build a table without checking that precedence is total.
    /// Ambiguities surface at classification time.
    pub fn new(rules: Vec<RoutingRule>, precedence: PrecedenceMatrix) -> Self {
        Self { rules, precedence }
    }

    /// Compile the registry and require a total precedence matrix
    pub fn from_config(config: &RouterConfig) -> Result<Self, ConfigError> {
        let rules = config
            .handlers
            .iter()
            .map(RoutingRule::from_entry)
            .collect::<Result<Vec<_>, _>>()?;

        let precedence = PrecedenceMatrix::build(&rules, &config.precedence)?;
        let missing = precedence.missing_pairs(&rules);
        if !missing.is_empty() {
            return Err(ConfigError::IncompletePrecedence(missing));
        }

        Ok(Self { rules, precedence })
    }

    /// Rules in declaration order
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn rules_in_tier(&self, tier: Tier) -> impl Iterator<Item = &RoutingRule> {
        self.rules.iter().filter(move |rule| rule.tier == tier)
    }

    pub fn precedence(&self) -> &PrecedenceMatrix {
        &self.precedence
    }

    /// Whether `id` is a registered handler
    pub fn contains(&self, id: HandlerId) -> bool {
        self.rules.iter().any(|rule| rule.target == id)
    }

    pub fn rule_for(&self, id: HandlerId) -> Option<&RoutingRule> {
        self.rules.iter().find(|rule| rule.target == id)
    }

    pub fn handler_ids(&self) -> Vec<HandlerId> {
        let mut ids: Vec<HandlerId> = self.rules.iter().map(|rule| rule.target).collect();
        ids.dedup();
        ids
    }
}
