//! Same-tier conflict resolution
//!
//! When several handlers in one tier match a request, the winner comes from
//! an explicit pairwise precedence matrix. The matrix is derived from
//! specificity ranks and overridden by configured `[[precedence]]` entries;
//! registration order never decides.

use crate::config::{ConfigError, PrecedenceEntry};
use crate::error::{RouterError, RouterResult};
use crate::handler::HandlerId;
use crate::routing::rules::{RoutingRule, Tier};
use std::collections::BTreeMap;
use tracing::debug;

/// Pairwise winner table keyed by the unordered handler pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecedenceMatrix {
    winners: BTreeMap<(HandlerId, HandlerId), HandlerId>,
}

fn key(a: HandlerId, b: HandlerId) -> (HandlerId, HandlerId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl PrecedenceMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `winner` beats `loser`, replacing any earlier entry
    pub fn insert(&mut self, winner: HandlerId, loser: HandlerId) {
        if winner != loser {
            self.winners.insert(key(winner, loser), winner);
        }
    }

    /// Builder form of [`PrecedenceMatrix::insert`]
    pub fn with(mut self, winner: HandlerId, loser: HandlerId) -> Self {
        self.insert(winner, loser);
        self
    }

    pub fn winner(&self, a: HandlerId, b: HandlerId) -> Option<HandlerId> {
        if a == b {
            return Some(a);
        }
        self.winners.get(&key(a, b)).copied()
    }

    /// Derive the matrix for same-tier pairs from specificity, then apply
    /// explicit entries
    pub fn build(rules: &[RoutingRule], explicit: &[PrecedenceEntry]) -> Result<Self, ConfigError> {
        let mut matrix = Self::new();

        for (i, a) in rules.iter().enumerate() {
            for b in &rules[i + 1..] {
                if a.tier != b.tier || a.target == b.target {
                    continue;
                }
                if a.specificity > b.specificity {
                    matrix.insert(a.target, b.target);
                } else if b.specificity > a.specificity {
                    matrix.insert(b.target, a.target);
                }
            }
        }

        let registered = |id: HandlerId| rules.iter().any(|rule| rule.target == id);
        let mut pinned: BTreeMap<(HandlerId, HandlerId), HandlerId> = BTreeMap::new();
        for entry in explicit {
            if !registered(entry.winner) {
                return Err(ConfigError::UnregisteredPrecedence(entry.winner));
            }
            for &loser in &entry.over {
                if !registered(loser) {
                    return Err(ConfigError::UnregisteredPrecedence(loser));
                }
                if loser == entry.winner {
                    return Err(ConfigError::ConflictingPrecedence(entry.winner, loser));
                }
                match pinned.insert(key(entry.winner, loser), entry.winner) {
                    Some(previous) if previous != entry.winner => {
                        return Err(ConfigError::ConflictingPrecedence(entry.winner, loser));
                    }
                    _ => matrix.insert(entry.winner, loser),
                }
            }
        }

        Ok(matrix)
    }

    /// Same-tier handler pairs that have no defined winner
    pub fn missing_pairs(&self, rules: &[RoutingRule]) -> Vec<(HandlerId, HandlerId)> {
        let mut missing = Vec::new();
        for (i, a) in rules.iter().enumerate() {
            for b in &rules[i + 1..] {
                if a.tier == b.tier
                    && a.target != b.target
                    && self.winner(a.target, b.target).is_none()
                {
                    missing.push((a.target, b.target));
                }
            }
        }
        missing
    }
}

/// Picks a single rule among same-tier matches
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver<'a> {
    matrix: &'a PrecedenceMatrix,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(matrix: &'a PrecedenceMatrix) -> Self {
        Self { matrix }
    }

    /// Return the candidate that beats every other candidate.
    ///
    /// Fails with `AmbiguousMatch` if some pair has no entry or the entries
    /// do not single out one winner.
    pub fn resolve<'r>(
        &self,
        tier: Tier,
        candidates: &[&'r RoutingRule],
    ) -> RouterResult<&'r RoutingRule> {
        let mut distinct: Vec<&'r RoutingRule> = Vec::with_capacity(candidates.len());
        for rule in candidates {
            if !distinct.iter().any(|seen| seen.target == rule.target) {
                distinct.push(rule);
            }
        }

        let winner = distinct.iter().copied().find(|candidate| {
            distinct.iter().all(|other| {
                self.matrix.winner(candidate.target, other.target) == Some(candidate.target)
            })
        });

        match winner {
            Some(rule) => {
                debug!(
                    tier = tier.number(),
                    winner = %rule.target,
                    candidates = distinct.len(),
                    "Resolved same-tier conflict"
                );
                Ok(rule)
            }
            None => {
                let mut ids: Vec<HandlerId> = distinct.iter().map(|rule| rule.target).collect();
                ids.sort();
                Err(RouterError::AmbiguousMatch {
                    tier: tier.number(),
                    candidates: ids,
                })
            }
        }
    }
}
