//! Metrics collaborator seam.
//!
//! The core only emits; aggregation and export belong to the receiver.
//! Tests and the binary use the in-memory aggregate.

use mend_core::TaskState;
use std::sync::Mutex;

pub trait Metrics: Send + Sync {
    fn start_task(&self, task_id: &str);
    fn end_task(&self, task_id: &str, state: TaskState);
    fn record_verification_attempt(&self);
    fn record_replan(&self);
    fn record_scout_query(&self, scout_name: &str, duration_ms: u64);
    fn record_verifier_execution(&self, duration_ms: u64);
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn start_task(&self, _task_id: &str) {}
    fn end_task(&self, _task_id: &str, _state: TaskState) {}
    fn record_verification_attempt(&self) {}
    fn record_replan(&self) {}
    fn record_scout_query(&self, _scout_name: &str, _duration_ms: u64) {}
    fn record_verifier_execution(&self, _duration_ms: u64) {}
}

/// Simple aggregate counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub verification_attempts: u64,
    pub replans: u64,
    pub scout_queries: u64,
    pub scout_query_ms_total: u64,
    pub verifier_executions: u64,
    pub verifier_ms_total: u64,
}

/// In-memory metrics aggregate.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    snapshot: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot.lock().unwrap().clone()
    }
}

impl Metrics for InMemoryMetrics {
    fn start_task(&self, _task_id: &str) {
        self.snapshot.lock().unwrap().tasks_started += 1;
    }

    fn end_task(&self, _task_id: &str, state: TaskState) {
        let mut snapshot = self.snapshot.lock().unwrap();
        if state == TaskState::Success {
            snapshot.tasks_succeeded += 1;
        } else {
            snapshot.tasks_failed += 1;
        }
    }

    fn record_verification_attempt(&self) {
        self.snapshot.lock().unwrap().verification_attempts += 1;
    }

    fn record_replan(&self) {
        self.snapshot.lock().unwrap().replans += 1;
    }

    fn record_scout_query(&self, _scout_name: &str, duration_ms: u64) {
        let mut snapshot = self.snapshot.lock().unwrap();
        snapshot.scout_queries += 1;
        snapshot.scout_query_ms_total += duration_ms;
    }

    fn record_verifier_execution(&self, duration_ms: u64) {
        let mut snapshot = self.snapshot.lock().unwrap();
        snapshot.verifier_executions += 1;
        snapshot.verifier_ms_total += duration_ms;
    }
}
