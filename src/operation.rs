//! The `TaskStatus` / operation tree (§3, §6 observability interface).
//!
//! Each task owns a root `Operation`, which may open child `Step`s with
//! `(current, total, message, state)`. The tree is observable externally
//! (dashboards poll it) but the core never reads it back to make decisions
//! — it is pure reporting, never control flow.

use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Running,
    Done,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub name: String,
    pub current: u64,
    pub total: u64,
    pub message: String,
    pub state: StepState,
}

/// An in-memory, append-only record of a single task's progress. Not
/// persisted: if the process restarts mid-task the task itself is retried
/// from scratch (handlers are idempotent), and its progress record starts
/// fresh too.
#[derive(Debug, Default)]
pub struct Operation {
    steps: Mutex<Vec<Step>>,
}

impl Operation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_step(&self, name: impl Into<String>, total: u64) -> usize {
        let mut steps = self.steps.lock().unwrap();
        steps.push(Step {
            name: name.into(),
            current: 0,
            total,
            message: String::new(),
            state: StepState::Running,
        });
        steps.len() - 1
    }

    pub fn advance(&self, index: usize, current: u64, message: impl Into<String>) {
        let mut steps = self.steps.lock().unwrap();
        if let Some(step) = steps.get_mut(index) {
            step.current = current;
            step.message = message.into();
        }
    }

    pub fn finish(&self, index: usize, state: StepState) {
        let mut steps = self.steps.lock().unwrap();
        if let Some(step) = steps.get_mut(index) {
            step.state = state;
        }
    }

    pub fn snapshot(&self) -> Vec<Step> {
        self.steps.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_lifecycle() {
        let op = Operation::new();
        let idx = op.open_step("scan", 10);
        op.advance(idx, 5, "halfway");
        op.finish(idx, StepState::Done);

        let snap = op.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].current, 5);
        assert_eq!(snap[0].state, StepState::Done);
    }
}
