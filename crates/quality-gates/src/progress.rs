//! Progress Tracking
//!
//! Records overall and per-gate progress of one validation run and
//! broadcasts every update to subscribed listeners.
//!
//! Listeners are invoked synchronously, outside the state lock, in
//! subscription order. A panicking listener is caught and logged; the
//! remaining listeners are still notified.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::GateExecutionState;

// ============================================================================
// State
// ============================================================================

/// Progress of a single gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateProgress {
    pub status: GateExecutionState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl Default for GateProgress {
    fn default() -> Self {
        Self {
            status: GateExecutionState::Pending,
            started_at: None,
            finished_at: None,
            duration_ms: None,
        }
    }
}

/// Snapshot of a run's progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub current_step: String,
    pub gates: BTreeMap<String, GateProgress>,
}

impl ProgressState {
    /// Completion percentage (0-100).
    pub fn percent(&self) -> f64 {
        if self.total_steps == 0 {
            0.0
        } else {
            (self.completed_steps as f64 / self.total_steps as f64 * 100.0).min(100.0)
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Kind of progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    Started,
    Step,
    GateStarted,
    GateFinished,
    Completed,
}

/// Payload delivered to listeners on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub kind: ProgressEventKind,
    /// Gate the event relates to (if any)
    pub gate: Option<String>,
    /// Gate state after the update (if any)
    pub status: Option<GateExecutionState>,
    pub completed: usize,
    pub total: usize,
    pub progress_pct: f64,
    pub label: String,
}

/// Progress callback.
pub type ProgressListener = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// ============================================================================
// ProgressTracker
// ============================================================================

/// Thread-safe progress recorder with listener fan-out.
#[derive(Default)]
pub struct ProgressTracker {
    state: RwLock<ProgressState>,
    listeners: RwLock<Vec<(ListenerId, ProgressListener)>>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("state", &self.snapshot())
            .finish()
    }
}

impl ProgressTracker {
    /// Create an idle tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn subscribe(&self, listener: ProgressListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        before != listeners.len()
    }

    /// Reset for a new run over the given gates.
    pub fn start<I, S>(&self, gates: I, label: impl Into<String>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let event = self.update(|state| {
            state.gates = gates
                .into_iter()
                .map(|g| (g.into(), GateProgress::default()))
                .collect();
            state.total_steps = state.gates.len();
            state.completed_steps = 0;
            state.current_step = label.into();
            (ProgressEventKind::Started, None, None)
        });
        self.notify(&event);
    }

    /// Change the label of the active step.
    pub fn set_step(&self, label: impl Into<String>) {
        let event = self.update(|state| {
            state.current_step = label.into();
            (ProgressEventKind::Step, None, None)
        });
        self.notify(&event);
    }

    /// Record a gate leaving `Pending` without finishing (e.g. `Ready`).
    pub fn mark_gate(&self, gate: &str, status: GateExecutionState) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.gates.entry(gate.to_string()).or_default().status = status;
    }

    /// Record a gate starting to run.
    pub fn gate_started(&self, gate: &str) {
        let event = self.update(|state| {
            let entry = state.gates.entry(gate.to_string()).or_default();
            entry.status = GateExecutionState::Running;
            entry.started_at = Some(Utc::now());
            state.current_step = format!("Running {}", gate);
            (
                ProgressEventKind::GateStarted,
                Some(gate.to_string()),
                Some(GateExecutionState::Running),
            )
        });
        self.notify(&event);
    }

    /// Record a gate reaching a terminal state.
    pub fn gate_finished(&self, gate: &str, status: GateExecutionState, duration_ms: u64) {
        let event = self.update(|state| {
            let now = Utc::now();
            let entry = state.gates.entry(gate.to_string()).or_default();
            let newly_finished = !entry.status.is_terminal();
            entry.status = status;
            entry.finished_at = Some(now);
            entry.duration_ms = Some(duration_ms);
            if entry.started_at.is_none() {
                entry.started_at = Some(now);
            }
            if newly_finished {
                state.completed_steps += 1;
            }
            state.total_steps = state.total_steps.max(state.gates.len());
            state.current_step = format!("Finished {}", gate);
            (
                ProgressEventKind::GateFinished,
                Some(gate.to_string()),
                Some(status),
            )
        });
        self.notify(&event);
    }

    /// Mark the run complete.
    pub fn complete(&self, label: impl Into<String>) {
        let event = self.update(|state| {
            state.current_step = label.into();
            (ProgressEventKind::Completed, None, None)
        });
        self.notify(&event);
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> ProgressState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Completion percentage (0-100).
    pub fn percent(&self) -> f64 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).percent()
    }

    fn update<F>(&self, apply: F) -> ProgressEvent
    where
        F: FnOnce(&mut ProgressState) -> (ProgressEventKind, Option<String>, Option<GateExecutionState>),
    {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let (kind, gate, status) = apply(&mut state);
        ProgressEvent {
            kind,
            gate,
            status,
            completed: state.completed_steps,
            total: state.total_steps,
            progress_pct: state.percent(),
            label: state.current_step.clone(),
        }
    }

    fn notify(&self, event: &ProgressEvent) {
        let listeners: Vec<ProgressListener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(kind = ?event.kind, "progress listener panicked; continuing");
            }
        }
    }
}
