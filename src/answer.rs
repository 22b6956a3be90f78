//! Answer buffering and skip votes
//!
//! Answers are buffered while the guess phase runs and resolved all at once
//! when it ends. Resolution happens at most once per round, whether it comes
//! from local comparison (single-player) or from the authority's validated
//! result (multiplayer).

use crate::error::{EngineError, EngineResult};
use crate::types::*;
use std::collections::{BTreeSet, HashMap};

/// Decides whether a submitted answer matches the expected one
pub trait AnswerMatcher: Send + Sync {
    fn matches(&self, submitted: &str, expected: &str) -> bool;
}

/// Normalize text for answer comparison (lowercase, trim, collapse whitespace)
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Exact match after [`normalize`]
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedMatcher;

impl AnswerMatcher for NormalizedMatcher {
    fn matches(&self, submitted: &str, expected: &str) -> bool {
        let submitted = normalize(submitted);
        !submitted.is_empty() && submitted == normalize(expected)
    }
}

/// Outcome of resolving a round's answers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Only players who submitted appear here
    pub validated: HashMap<PlayerId, bool>,
    pub score_deltas: HashMap<PlayerId, i64>,
}

impl Resolution {
    pub fn correct_players(&self) -> Vec<PlayerId> {
        let mut correct: Vec<_> = self
            .validated
            .iter()
            .filter(|(_, ok)| **ok)
            .map(|(id, _)| id.clone())
            .collect();
        correct.sort();
        correct
    }

    /// `Some(true|false)` for submitters, `None` for "no answer"
    pub fn verdict(&self, player_id: &str) -> Option<bool> {
        self.validated.get(player_id).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipOutcome {
    /// Single participant: end the phase now
    ResolveNow,
    /// Vote forwarded; the authority decides
    AwaitAuthority,
    /// Player already voted this phase
    Duplicate,
}

/// Answer and skip state for one round
#[derive(Debug)]
pub struct AnswerCoordinator {
    mode: Mode,
    points_per_correct: i64,
    records: HashMap<PlayerId, AnswerRecord>,
    skip_votes: BTreeSet<PlayerId>,
    resolution: Option<Resolution>,
}

impl AnswerCoordinator {
    pub fn new(mode: Mode, points_per_correct: i64) -> Self {
        Self {
            mode,
            points_per_correct,
            records: HashMap::new(),
            skip_votes: BTreeSet::new(),
            resolution: None,
        }
    }

    /// Buffer (or replace) a player's answer. Never scores.
    pub fn submit(
        &mut self,
        player_id: &str,
        text: &str,
        phase: Phase,
        phase_time_ms: u64,
    ) -> EngineResult<()> {
        if phase != Phase::Playing || self.resolution.is_some() {
            return Err(EngineError::NotAcceptingAnswers(phase));
        }

        self.records.insert(
            player_id.to_string(),
            AnswerRecord {
                player_id: player_id.to_string(),
                submitted_text: text.to_string(),
                submitted_at_phase_time: phase_time_ms,
            },
        );
        Ok(())
    }

    pub fn request_skip(&mut self, player_id: &str) -> SkipOutcome {
        let inserted = self.skip_votes.insert(player_id.to_string());
        match self.mode {
            Mode::SinglePlayer => SkipOutcome::ResolveNow,
            Mode::Multiplayer if inserted => SkipOutcome::AwaitAuthority,
            Mode::Multiplayer => SkipOutcome::Duplicate,
        }
    }

    pub fn clear_skip_votes(&mut self) {
        self.skip_votes.clear();
    }

    /// Replace the local mirror with the authority's voter list
    pub fn mirror_skip_votes(&mut self, ids: impl IntoIterator<Item = PlayerId>) {
        self.skip_votes = ids.into_iter().collect();
    }

    pub fn skip_votes(&self) -> &BTreeSet<PlayerId> {
        &self.skip_votes
    }

    /// Compare every buffered answer against `answer_text`. Returns `None`
    /// if the round was already resolved.
    pub fn resolve(&mut self, answer_text: &str, matcher: &dyn AnswerMatcher) -> Option<Resolution> {
        if self.resolution.is_some() {
            tracing::debug!("Answers already resolved, ignoring");
            return None;
        }

        let mut resolution = Resolution::default();
        for record in self.records.values() {
            let correct = matcher.matches(&record.submitted_text, answer_text);
            resolution
                .validated
                .insert(record.player_id.clone(), correct);
            resolution.score_deltas.insert(
                record.player_id.clone(),
                if correct { self.points_per_correct } else { 0 },
            );
        }

        tracing::info!(
            "Resolved {} answers ({} correct)",
            resolution.validated.len(),
            resolution.correct_players().len()
        );
        self.resolution = Some(resolution.clone());
        Some(resolution)
    }

    /// Take the authority's validated result. Returns false if already resolved.
    pub fn adopt_resolution(&mut self, resolution: Resolution) -> bool {
        if self.resolution.is_some() {
            return false;
        }
        self.resolution = Some(resolution);
        true
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    pub fn record(&self, player_id: &str) -> Option<&AnswerRecord> {
        self.records.get(player_id)
    }
}
