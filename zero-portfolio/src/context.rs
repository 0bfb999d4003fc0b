//! Run-scoped context.
//!
//! Every long-running operation receives a `RunContext` by reference. It
//! carries the cancellation signal, the progress sink and an optional step
//! budget. There is no process-wide state: two runs never share a context.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Cooperative cancellation signal shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a fresh, un-cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Progress notification emitted at coarse milestones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Phase or component name
    pub phase: String,
    /// Completion in percent (0-100)
    pub percent_complete: f64,
    /// Items finished so far
    pub current_item: usize,
    /// Items in this phase
    pub total_items: usize,
    /// Free-form message
    pub message: String,
}

/// Callback receiving progress updates.
pub type ProgressSink = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Context for a single engine run.
#[derive(Clone)]
pub struct RunContext {
    run_id: Uuid,
    cancel: CancellationToken,
    progress: Option<ProgressSink>,
    step_budget: Option<u64>,
    steps_used: Arc<AtomicU64>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("has_progress_sink", &self.progress.is_some())
            .field("step_budget", &self.step_budget)
            .field("steps_used", &self.steps_used.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// Create a context with a fresh run id and no budget
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            progress: None,
            step_budget: None,
            steps_used: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Attach a progress sink
    pub fn with_progress<F>(mut self, sink: F) -> Self
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(sink));
        self
    }

    /// Limit the number of work units this run may consume
    pub fn with_step_budget(mut self, steps: u64) -> Self {
        self.step_budget = Some(steps);
        self
    }

    /// Run identifier
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Cancellation token (clone to hand to another thread)
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Units of work consumed so far
    pub fn steps_used(&self) -> u64 {
        self.steps_used.load(Ordering::Relaxed)
    }

    /// Whether the run must stop before the next unit of work.
    ///
    /// True once cancelled or once the step budget is spent.
    pub fn should_stop(&self) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        match self.step_budget {
            Some(budget) => self.steps_used() >= budget,
            None => false,
        }
    }

    /// Record one completed unit of work
    pub fn consume_step(&self) {
        self.steps_used.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit a progress update if a sink is attached
    pub fn report(
        &self,
        phase: &str,
        current_item: usize,
        total_items: usize,
        message: impl Into<String>,
    ) {
        let Some(sink) = &self.progress else {
            return;
        };

        let percent_complete = if total_items == 0 {
            100.0
        } else {
            (current_item as f64 / total_items as f64 * 100.0).min(100.0)
        };

        sink(&ProgressUpdate {
            phase: phase.to_string(),
            percent_complete,
            current_item,
            total_items,
            message: message.into(),
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_cancellation_shared_between_clones() {
        let ctx = RunContext::new();
        let token = ctx.cancellation().clone();
        assert!(!ctx.should_stop());

        token.cancel();
        assert!(ctx.should_stop());
    }

    #[test]
    fn test_step_budget_stops_run() {
        let ctx = RunContext::new().with_step_budget(2);
        ctx.consume_step();
        assert!(!ctx.should_stop());
        ctx.consume_step();
        assert!(ctx.should_stop());
        assert_eq!(ctx.steps_used(), 2);
    }

    #[test]
    fn test_progress_sink_receives_percent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let ctx = RunContext::new().with_progress(move |u| {
            sink_seen.lock().unwrap().push(u.clone());
        });

        ctx.report("SIMULATING", 1, 4, "EURUSD done");
        ctx.report("ANALYZING", 0, 0, "nothing to do");

        let updates = seen.lock().unwrap();
        assert_eq!(updates.len(), 2);
        assert!((updates[0].percent_complete - 25.0).abs() < 1e-9);
        assert!((updates[1].percent_complete - 100.0).abs() < 1e-9);
        assert_eq!(updates[0].message, "EURUSD done");
    }
}
