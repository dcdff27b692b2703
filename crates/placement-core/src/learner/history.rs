//! Bounded decision/outcome history
//!
//! Records are created when a decision selects a target and completed when
//! its outcome arrives. The oldest record is evicted once the buffer is
//! full. Processed decision ids are remembered separately, for longer than
//! the records themselves, so late duplicates are still recognized.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::learner::PatternId;
use crate::models::{DecisionId, LocationKind, ObjectiveKind, Outcome, SystemState};
use crate::toolkit::{RlAction, RlState, Strategy};

/// Processed-id memory relative to the history capacity
const DEDUP_FACTOR: usize = 10;

/// One decision and, once reported, its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub decision_id: DecisionId,
    pub process_id: String,
    pub timestamp: i64,
    pub state: SystemState,
    pub rl_state: RlState,
    pub target_id: String,
    pub kind: LocationKind,
    /// Action the placement amounts to
    pub action: RlAction,
    pub strategy: Strategy,
    pub applied_pattern: Option<PatternId>,
    pub selected_score: f64,
    /// Magnitude of each objective's weighted contribution to the score
    pub contributions: BTreeMap<ObjectiveKind, f64>,
    /// Predicted compute cost of the placement, in cost units
    pub predicted_compute_cost: f64,
    pub deadline_ms: Option<f64>,
    pub outcome: Option<Outcome>,
}

impl HistoryRecord {
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    /// Success as counted by patterns and statistics
    pub fn succeeded(&self, success_reward: f64) -> Option<bool> {
        self.outcome
            .as_ref()
            .map(|o| o.success && o.reward > success_reward)
    }
}

#[derive(Debug)]
pub struct DecisionHistory {
    records: VecDeque<HistoryRecord>,
    capacity: usize,
    processed: HashSet<DecisionId>,
    processed_order: VecDeque<DecisionId>,
    dedup_capacity: usize,
    evicted: u64,
}

impl DecisionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            processed: HashSet::new(),
            processed_order: VecDeque::new(),
            dedup_capacity: capacity * DEDUP_FACTOR,
            evicted: 0,
        }
    }

    pub fn push(&mut self, record: HistoryRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
            self.evicted += 1;
        }
        self.records.push_back(record);
    }

    pub fn get(&self, id: DecisionId) -> Option<&HistoryRecord> {
        self.position(id).map(|i| &self.records[i])
    }

    pub fn get_mut(&mut self, id: DecisionId) -> Option<&mut HistoryRecord> {
        self.position(id).map(move |i| &mut self.records[i])
    }

    /// RL state captured by the first later decision on the same target
    pub fn next_state_on_target(&self, id: DecisionId) -> Option<RlState> {
        let i = self.position(id)?;
        let target = &self.records[i].target_id;
        self.records
            .iter()
            .skip(i + 1)
            .find(|r| &r.target_id == target)
            .map(|r| r.rl_state)
    }

    pub fn is_processed(&self, id: DecisionId) -> bool {
        self.processed.contains(&id)
    }

    pub fn mark_processed(&mut self, id: DecisionId) {
        if !self.processed.insert(id) {
            return;
        }
        self.processed_order.push_back(id);
        while self.processed_order.len() > self.dedup_capacity {
            if let Some(old) = self.processed_order.pop_front() {
                self.processed.remove(&old);
            }
        }
    }

    /// Completed records, oldest first
    pub fn completed(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.iter().filter(|r| r.is_complete())
    }

    /// Owned copy of the completed records for work done outside the lock
    pub fn snapshot(&self) -> Vec<HistoryRecord> {
        self.completed().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    fn position(&self, id: DecisionId) -> Option<usize> {
        // Ids are assigned in increasing order, so the deque is sorted
        self.records
            .binary_search_by(|r| r.decision_id.cmp(&id))
            .ok()
    }
}
