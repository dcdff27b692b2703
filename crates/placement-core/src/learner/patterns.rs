//! Behavioral pattern discovery
//!
//! A pattern says: when the system state satisfies these conditions,
//! placing on this kind of target tends to succeed. Candidates are induced
//! from completed history, scored with a Wilson lower bound on their
//! success rate, and promoted once they have enough samples and a high
//! enough rate. Validated patterns bias later decisions; patterns whose
//! live results fall below the validation threshold are deprecated and
//! pruned at the next merge.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::history::HistoryRecord;
use crate::config::require_range;
use crate::models::{LocationKind, StateField, SystemState};
use crate::toolkit::SequenceMatcher;

/// z for a 95% Wilson interval
const WILSON_Z: f64 = 1.96;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PatternId(pub u64);

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pat-{:04}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    GreaterOrEqual,
    LessOrEqual,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::GreaterOrEqual => ">=",
            Operator::LessOrEqual => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: StateField,
    pub operator: Operator,
    pub value: f64,
}

impl Condition {
    pub fn matches(&self, state: &SystemState) -> bool {
        let v = state.field(self.field);
        match self.operator {
            Operator::GreaterOrEqual => v >= self.value,
            Operator::LessOrEqual => v <= self.value,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:.3}", self.field, self.operator.symbol(), self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternState {
    Discovering,
    Validated,
    Deprecated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSource {
    /// Induced over the whole history
    History,
    /// Induced over records covered by recurring score motifs
    Motif,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPattern {
    pub id: PatternId,
    pub conditions: Vec<Condition>,
    /// Recommended placement
    pub action: LocationKind,
    /// Wilson lower bound of the success rate
    pub confidence: f64,
    pub success_rate: f64,
    pub sample_count: usize,
    pub state: PatternState,
    pub source: PatternSource,
    /// Unix milliseconds
    pub created_at: i64,
    /// Decisions the pattern was applied to, with reported outcomes
    pub applications: u64,
    pub application_successes: u64,
}

impl DiscoveredPattern {
    pub fn matches(&self, state: &SystemState) -> bool {
        self.conditions.iter().all(|c| c.matches(state))
    }

    pub fn is_active(&self) -> bool {
        self.state != PatternState::Deprecated
    }

    pub fn signature(&self) -> String {
        signature(self.action, &self.conditions)
    }

    /// Success rate over the decisions the pattern was applied to
    pub fn live_success_rate(&self) -> Option<f64> {
        (self.applications > 0)
            .then(|| self.application_successes as f64 / self.applications as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Samples required before a candidate may be validated
    pub min_samples: usize,
    pub validation_threshold: f64,
    pub max_active: usize,
    pub motif_min_len: usize,
    pub motif_max_len: usize,
    /// Normalized DTW distance under which two windows recur
    pub dtw_threshold: f64,
    pub dtw_band: Option<usize>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            validation_threshold: 0.8,
            max_active: 50,
            motif_min_len: 3,
            motif_max_len: 8,
            dtw_threshold: 0.1,
            dtw_band: Some(2),
        }
    }
}

impl PatternConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_samples == 0 {
            return Err("patterns.min_samples must be positive".into());
        }
        if self.max_active == 0 {
            return Err("patterns.max_active must be positive".into());
        }
        if self.motif_min_len == 0 || self.motif_min_len > self.motif_max_len {
            return Err(format!(
                "patterns motif lengths [{}, {}] are invalid",
                self.motif_min_len, self.motif_max_len
            ));
        }
        require_range(
            "patterns.validation_threshold",
            self.validation_threshold,
            0.0,
            1.0,
        )?;
        require_range("patterns.dtw_threshold", self.dtw_threshold, 0.0, 10.0)
    }
}

/// A pattern before it is merged into the set
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub conditions: Vec<Condition>,
    pub action: LocationKind,
    pub sample_count: usize,
    pub successes: usize,
    pub source: PatternSource,
}

impl Candidate {
    pub fn success_rate(&self) -> f64 {
        if self.sample_count == 0 {
            0.0
        } else {
            self.successes as f64 / self.sample_count as f64
        }
    }

    pub fn signature(&self) -> String {
        signature(self.action, &self.conditions)
    }
}

fn signature(action: LocationKind, conditions: &[Condition]) -> String {
    let mut parts: Vec<String> = conditions.iter().map(|c| c.to_string()).collect();
    parts.sort();
    format!("{}|{}", action, parts.join("&"))
}

/// Lower bound of the Wilson score interval
pub fn wilson_lower_bound(successes: usize, samples: usize) -> f64 {
    if samples == 0 {
        return 0.0;
    }
    let n = samples as f64;
    let p = successes as f64 / n;
    let z2 = WILSON_Z * WILSON_Z;
    let centre = p + z2 / (2.0 * n);
    let margin = WILSON_Z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt();
    ((centre - margin) / (1.0 + z2 / n)).max(0.0)
}

/// Induce candidates from completed history records.
///
/// Runs without touching learner state so it can be called on a snapshot
/// outside the engine lock.
pub fn discover(
    records: &[HistoryRecord],
    config: &PatternConfig,
    success_reward: f64,
) -> Vec<Candidate> {
    let completed: Vec<&HistoryRecord> = records.iter().filter(|r| r.is_complete()).collect();
    let mut candidates = induce(&completed, success_reward, PatternSource::History);

    let series: Vec<f64> = completed.iter().map(|r| r.selected_score).collect();
    let matcher = SequenceMatcher::new(config.dtw_threshold, config.dtw_band);
    let motifs = matcher.discover_patterns(&series, config.motif_min_len, config.motif_max_len);
    if !motifs.is_empty() {
        let mut covered = vec![false; completed.len()];
        for motif in &motifs {
            for &start in &motif.occurrences {
                covered[start..start + motif.length]
                    .iter_mut()
                    .for_each(|c| *c = true);
            }
        }
        let subset: Vec<&HistoryRecord> = completed
            .iter()
            .zip(&covered)
            .filter(|(_, c)| **c)
            .map(|(r, _)| *r)
            .collect();
        candidates.extend(induce(&subset, success_reward, PatternSource::Motif));
    }

    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert(c.signature()));
    candidates
}

/// One candidate per action group: bounds of the successful records'
/// fields that exclude at least one unsuccessful record. When the group
/// has no failures, the other groups' records serve as the contrast.
fn induce(records: &[&HistoryRecord], success_reward: f64, source: PatternSource) -> Vec<Candidate> {
    let mut groups: BTreeMap<LocationKind, Vec<&HistoryRecord>> = BTreeMap::new();
    for r in records {
        groups.entry(r.kind).or_default().push(r);
    }

    let mut candidates = Vec::new();
    for (&action, group) in &groups {
        let succeeded = |r: &HistoryRecord| r.succeeded(success_reward) == Some(true);
        let successes: Vec<&HistoryRecord> =
            group.iter().copied().filter(|r| succeeded(*r)).collect();
        if successes.is_empty() {
            continue;
        }
        let mut contrast: Vec<&HistoryRecord> =
            group.iter().copied().filter(|r| !succeeded(*r)).collect();
        if contrast.is_empty() {
            contrast = records.iter().copied().filter(|r| r.kind != action).collect();
        }

        let mut conditions = Vec::new();
        for field in StateField::ALL {
            let (lo, hi) = successes
                .iter()
                .map(|r| r.state.field(field))
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            if contrast.iter().any(|r| r.state.field(field) < lo) {
                conditions.push(Condition {
                    field,
                    operator: Operator::GreaterOrEqual,
                    value: lo,
                });
            }
            if contrast.iter().any(|r| r.state.field(field) > hi) {
                conditions.push(Condition {
                    field,
                    operator: Operator::LessOrEqual,
                    value: hi,
                });
            }
        }
        if conditions.is_empty() {
            continue;
        }

        let matched: Vec<&HistoryRecord> = group
            .iter()
            .copied()
            .filter(|r| conditions.iter().all(|c| c.matches(&r.state)))
            .collect();
        candidates.push(Candidate {
            sample_count: matched.len(),
            successes: matched.iter().filter(|r| succeeded(*r)).count(),
            conditions,
            action,
            source,
        });
    }
    candidates
}

/// Changes made by one merge
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PatternMerge {
    pub promoted: Vec<PatternId>,
    pub deprecated: Vec<PatternId>,
    pub pruned: usize,
}

/// Active and recently deprecated patterns
#[derive(Debug)]
pub struct PatternSet {
    config: PatternConfig,
    patterns: Vec<DiscoveredPattern>,
    next_id: u64,
}

impl PatternSet {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            patterns: Vec::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    pub fn all(&self) -> &[DiscoveredPattern] {
        &self.patterns
    }

    pub fn get(&self, id: PatternId) -> Option<&DiscoveredPattern> {
        self.patterns.iter().find(|p| p.id == id)
    }

    pub fn active_count(&self) -> usize {
        self.patterns.iter().filter(|p| p.is_active()).count()
    }

    /// Highest-confidence validated pattern matching `state`; ties go to
    /// the lowest id
    pub fn best_match(&self, state: &SystemState) -> Option<&DiscoveredPattern> {
        self.patterns
            .iter()
            .filter(|p| p.state == PatternState::Validated && p.matches(state))
            .fold(None, |best: Option<&DiscoveredPattern>, p| match best {
                Some(b) if b.confidence >= p.confidence => Some(b),
                _ => Some(p),
            })
    }

    /// Record the result of a decision the pattern was applied to.
    /// Returns true when this deprecated the pattern.
    pub fn record_result(&mut self, id: PatternId, success: bool) -> bool {
        let min_samples = self.config.min_samples as u64;
        let threshold = self.config.validation_threshold;
        let Some(pattern) = self.patterns.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        pattern.applications += 1;
        if success {
            pattern.application_successes += 1;
        }
        let failing = pattern.applications >= min_samples
            && pattern.live_success_rate().map_or(false, |r| r < threshold);
        if failing && pattern.state == PatternState::Validated {
            pattern.state = PatternState::Deprecated;
            return true;
        }
        false
    }

    /// Fold candidates into the set, then prune.
    ///
    /// A candidate matching an existing signature refreshes that pattern's
    /// statistics; otherwise it is added. Previously deprecated patterns
    /// are dropped, validated patterns that no longer meet the threshold
    /// are deprecated, and the active set is capped at `max_active`
    /// keeping validated, higher-rate, newer patterns first.
    pub fn merge(&mut self, candidates: Vec<Candidate>, now: i64) -> PatternMerge {
        let mut merge = PatternMerge::default();
        let before = self.patterns.len();
        self.patterns.retain(|p| p.is_active());
        merge.pruned += before - self.patterns.len();

        for candidate in candidates {
            let rate = candidate.success_rate();
            let confidence = wilson_lower_bound(candidate.successes, candidate.sample_count);
            let passes = candidate.sample_count >= self.config.min_samples
                && rate >= self.config.validation_threshold;
            let signature = candidate.signature();

            if let Some(existing) = self.patterns.iter_mut().find(|p| p.signature() == signature) {
                existing.sample_count = candidate.sample_count;
                existing.success_rate = rate;
                existing.confidence = confidence;
                match (existing.state, passes) {
                    (PatternState::Discovering, true) => {
                        existing.state = PatternState::Validated;
                        merge.promoted.push(existing.id);
                    }
                    (PatternState::Validated, false) => {
                        existing.state = PatternState::Deprecated;
                        merge.deprecated.push(existing.id);
                    }
                    _ => {}
                }
                continue;
            }

            if candidate.sample_count < 2 {
                continue;
            }
            let id = PatternId(self.next_id);
            self.next_id += 1;
            let state = if passes {
                merge.promoted.push(id);
                PatternState::Validated
            } else {
                PatternState::Discovering
            };
            self.patterns.push(DiscoveredPattern {
                id,
                conditions: candidate.conditions,
                action: candidate.action,
                confidence,
                success_rate: rate,
                sample_count: candidate.sample_count,
                state,
                source: candidate.source,
                created_at: now,
                applications: 0,
                application_successes: 0,
            });
        }

        let mut active: Vec<usize> = (0..self.patterns.len())
            .filter(|&i| self.patterns[i].is_active())
            .collect();
        if active.len() > self.config.max_active {
            let patterns = &self.patterns;
            active.sort_by(|&a, &b| {
                let (a, b) = (&patterns[a], &patterns[b]);
                let validated = |p: &DiscoveredPattern| p.state == PatternState::Validated;
                validated(b)
                    .cmp(&validated(a))
                    .then_with(|| b.success_rate.total_cmp(&a.success_rate))
                    .then_with(|| b.created_at.cmp(&a.created_at))
                    .then_with(|| b.id.cmp(&a.id))
            });
            for &i in &active[self.config.max_active..] {
                let pattern = &mut self.patterns[i];
                if pattern.state == PatternState::Validated {
                    merge.deprecated.push(pattern.id);
                }
                pattern.state = PatternState::Deprecated;
            }
            merge.pruned += active.len() - self.config.max_active;
        }
        merge
    }
}
