use crate::detection::{ClassificationOutcome, Detection};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};

/// One recorded cycle as shown in the history list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub detections: Vec<Detection>,
    pub attempts: u32,
    /// Rendered error message for failed cycles
    pub error: Option<String>,
}

impl From<&ClassificationOutcome> for HistoryEntry {
    fn from(outcome: &ClassificationOutcome) -> Self {
        Self {
            timestamp: outcome.timestamp,
            success: outcome.success,
            detections: outcome.detections.clone(),
            attempts: outcome.attempts,
            error: outcome.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Immutable snapshot of the running session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Outcomes recorded
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    /// Requests made across all recorded outcomes
    pub attempts: u64,
    /// Detections per category
    pub categories: BTreeMap<String, u64>,
    /// Most recent first, bounded by the history capacity
    pub history: Vec<HistoryEntry>,
}

impl SessionSummary {
    pub fn detections(&self) -> u64 {
        self.categories.values().sum()
    }
}

#[derive(Debug, Default)]
struct SessionState {
    total: u64,
    successes: u64,
    failures: u64,
    attempts: u64,
    categories: BTreeMap<String, u64>,
    history: VecDeque<HistoryEntry>,
}

/// Accumulates classification outcomes for the lifetime of a session
#[derive(Debug)]
pub struct SessionAggregator {
    capacity: usize,
    state: Mutex<SessionState>,
}

impl SessionAggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, outcome: &ClassificationOutcome) {
        let mut state = self.state.lock();

        state.total += 1;
        state.attempts += u64::from(outcome.attempts);
        if outcome.success {
            state.successes += 1;
        } else {
            state.failures += 1;
        }

        for category in outcome.categories() {
            *state.categories.entry(category.to_string()).or_insert(0) += 1;
        }

        if state.history.len() == self.capacity {
            state.history.pop_back();
        }
        state.history.push_front(HistoryEntry::from(outcome));

        debug!(
            "Session recorded outcome #{} ({} detections)",
            state.total,
            outcome.detections.len()
        );
    }

    pub fn summary(&self) -> SessionSummary {
        let state = self.state.lock();
        SessionSummary {
            total: state.total,
            successes: state.successes,
            failures: state.failures,
            attempts: state.attempts,
            categories: state.categories.clone(),
            history: state.history.iter().cloned().collect(),
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = SessionState::default();
        info!("Session counters and history cleared");
    }
}
