//! Debug loop with iteration controls.
//!
//! Implements the fix-forward strategy: keep iterating on the same tree
//! after a failure, REPLAN after three consecutive failures, hard stop at
//! twelve total verification attempts.

use serde::{Deserialize, Serialize};

/// Consecutive failures that trigger a REPLAN.
pub const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 3;
/// Total verification attempts that trigger a hard stop.
pub const TOTAL_VERIFY_LOOP_THRESHOLD: u32 = 12;
/// Maximum number of REPLANs (at attempts 3, 6, 9).
pub const MAX_REPLANS: u32 = 3;

/// Action to take after a verification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopAction {
    /// Continue with fix-forward.
    Continue,
    /// Formulate a new strategy, then call `trigger_replan`.
    Replan,
    /// Stop iterating; the task is stuck.
    HardStop,
    /// Verification passed.
    Success,
}

impl LoopAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Replan => "replan",
            Self::HardStop => "hard_stop",
            Self::Success => "success",
        }
    }
}

/// Record of a single verification attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyAttempt {
    pub run_id: String,
    pub passed: bool,
    pub failure_summary: String,
    /// 1-indexed position in the attempt sequence.
    pub attempt_number: u32,
}

/// State of the debug loop.
///
/// Invariants: `total_verify_loops == attempts.len()` at all times; a
/// success resets `consecutive_failures`; a REPLAN resets
/// `consecutive_failures` and increments `replan_count`; nothing ever
/// decreases `total_verify_loops`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugLoopState {
    pub consecutive_failures: u32,
    pub total_verify_loops: u32,
    pub replan_count: u32,
    pub attempts: Vec<VerifyAttempt>,
    pub current_hypothesis: String,
    /// Append-only history of REPLAN strategies.
    pub strategy_history: Vec<String>,
}

impl DebugLoopState {
    /// Run ids of all attempts, in execution order.
    pub fn all_run_ids(&self) -> Vec<String> {
        self.attempts.iter().map(|a| a.run_id.clone()).collect()
    }
}

/// Manages the fix-forward debug loop.
#[derive(Debug, Default)]
pub struct DebugLoop {
    state: DebugLoopState,
}

impl DebugLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DebugLoopState {
        &self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.consecutive_failures
    }

    pub fn total_verify_loops(&self) -> u32 {
        self.state.total_verify_loops
    }

    pub fn replan_count(&self) -> u32 {
        self.state.replan_count
    }

    /// Reset for a new task.
    pub fn reset(&mut self) {
        self.state = DebugLoopState::default();
    }

    /// Record a successful verification. Always returns `Success`.
    ///
    /// The total counter keeps incrementing even after a terminal action
    /// has already been returned; the attempt list stays complete for
    /// forensics.
    pub fn record_success(&mut self, run_id: impl Into<String>) -> LoopAction {
        self.state.total_verify_loops += 1;
        let attempt = VerifyAttempt {
            run_id: run_id.into(),
            passed: true,
            failure_summary: String::new(),
            attempt_number: self.state.total_verify_loops,
        };
        self.state.attempts.push(attempt);
        self.state.consecutive_failures = 0;
        LoopAction::Success
    }

    /// Record a failed verification and decide the next action.
    ///
    /// Hard stop takes precedence over REPLAN at the twelfth attempt; the
    /// consecutive counter still reflects its real value in that case.
    pub fn record_failure(
        &mut self,
        run_id: impl Into<String>,
        failure_summary: impl Into<String>,
    ) -> LoopAction {
        self.state.total_verify_loops += 1;
        self.state.consecutive_failures += 1;
        let attempt = VerifyAttempt {
            run_id: run_id.into(),
            passed: false,
            failure_summary: failure_summary.into(),
            attempt_number: self.state.total_verify_loops,
        };
        self.state.attempts.push(attempt);

        if self.state.total_verify_loops >= TOTAL_VERIFY_LOOP_THRESHOLD {
            return LoopAction::HardStop;
        }
        if self.state.consecutive_failures >= CONSECUTIVE_FAILURE_THRESHOLD {
            return LoopAction::Replan;
        }
        LoopAction::Continue
    }

    /// Apply a REPLAN: reset the consecutive counter, keep the total,
    /// append the strategy.
    pub fn trigger_replan(&mut self, new_strategy: impl Into<String>) {
        let strategy = new_strategy.into();
        self.state.consecutive_failures = 0;
        self.state.replan_count += 1;
        self.state.strategy_history.push(strategy.clone());
        self.state.current_hypothesis = strategy;
    }

    pub fn set_hypothesis(&mut self, hypothesis: impl Into<String>) {
        self.state.current_hypothesis = hypothesis.into();
    }

    /// Hint for REPLAN: should the Scouts be consulted again?
    ///
    /// Lexical heuristic over the observed failure pattern. Wrong-file and
    /// missing-dependency signatures point at Scout A; build/test
    /// misconfiguration signatures point at Scout B.
    pub fn should_requery_scouts(&self, failure_pattern: &str) -> bool {
        let lower = failure_pattern.to_lowercase();

        const SCOUT_A_KEYWORDS: [&str; 6] = [
            "import",
            "module",
            "dependency",
            "not found",
            "undefined",
            "missing",
        ];
        const SCOUT_B_KEYWORDS: [&str; 5] =
            ["build", "compile", "test setup", "environment", "timeout"];

        SCOUT_A_KEYWORDS.iter().any(|k| lower.contains(k))
            || SCOUT_B_KEYWORDS.iter().any(|k| lower.contains(k))
    }

    /// Markdown summary of all failed attempts.
    pub fn failure_summary_markdown(&self) -> String {
        if self.state.attempts.is_empty() {
            return "No verification attempts recorded.".to_string();
        }

        let failed: Vec<&VerifyAttempt> =
            self.state.attempts.iter().filter(|a| !a.passed).collect();
        if failed.is_empty() {
            return "All attempts passed.".to_string();
        }

        let mut lines = vec![format!("## Failure Summary ({} failures)\n", failed.len())];
        for attempt in failed {
            lines.push(format!("### Attempt {}", attempt.attempt_number));
            lines.push(format!("- Run ID: {}", attempt.run_id));
            if !attempt.failure_summary.is_empty() {
                lines.push(format!("- Summary: {}", attempt.failure_summary));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }

    /// Display string like `Attempt 3/12`.
    pub fn attempt_display(&self) -> String {
        format!(
            "Attempt {}/{}",
            self.state.total_verify_loops, TOTAL_VERIFY_LOOP_THRESHOLD
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failures_continue() {
        let mut debug_loop = DebugLoop::new();
        assert_eq!(debug_loop.record_failure("r1", "boom"), LoopAction::Continue);
        assert_eq!(debug_loop.record_failure("r2", "boom"), LoopAction::Continue);
        assert_eq!(debug_loop.consecutive_failures(), 2);
        assert_eq!(debug_loop.total_verify_loops(), 2);
    }

    #[test]
    fn third_consecutive_failure_triggers_replan() {
        let mut debug_loop = DebugLoop::new();
        debug_loop.record_failure("r1", "");
        debug_loop.record_failure("r2", "");
        assert_eq!(debug_loop.record_failure("r3", ""), LoopAction::Replan);

        debug_loop.trigger_replan("new strategy");
        assert_eq!(debug_loop.consecutive_failures(), 0);
        assert_eq!(debug_loop.replan_count(), 1);
        assert_eq!(debug_loop.total_verify_loops(), 3);
        assert_eq!(debug_loop.state().current_hypothesis, "new strategy");
        assert_eq!(debug_loop.state().strategy_history, vec!["new strategy"]);
    }

    #[test]
    fn success_resets_consecutive_but_counts_attempt() {
        let mut debug_loop = DebugLoop::new();
        debug_loop.record_failure("r1", "");
        debug_loop.record_failure("r2", "");
        assert_eq!(debug_loop.record_success("r3"), LoopAction::Success);
        assert_eq!(debug_loop.consecutive_failures(), 0);
        assert_eq!(debug_loop.total_verify_loops(), 3);
        assert!(debug_loop.state().attempts[2].passed);
    }

    #[test]
    fn twelve_failures_walk_the_documented_trace() {
        let mut debug_loop = DebugLoop::new();

        for attempt in 1..=12u32 {
            let action = debug_loop.record_failure(format!("r{attempt}"), "fail");
            match attempt {
                12 => assert_eq!(action, LoopAction::HardStop),
                3 | 6 | 9 => {
                    assert_eq!(action, LoopAction::Replan);
                    debug_loop.trigger_replan(format!("strategy {attempt}"));
                }
                _ => assert_eq!(action, LoopAction::Continue),
            }
        }

        assert_eq!(debug_loop.total_verify_loops(), 12);
        assert_eq!(debug_loop.replan_count(), 3);
        // Hard stop takes precedence over the fourth REPLAN; the
        // consecutive counter still reads 3.
        assert_eq!(debug_loop.consecutive_failures(), 3);
        assert_eq!(debug_loop.state().attempts.len(), 12);
    }

    #[test]
    fn nine_failures_yield_three_replans_and_no_hard_stop() {
        let mut debug_loop = DebugLoop::new();
        for attempt in 1..=9u32 {
            let action = debug_loop.record_failure(format!("r{attempt}"), "");
            if attempt % 3 == 0 {
                assert_eq!(action, LoopAction::Replan);
                debug_loop.trigger_replan("again");
            }
        }
        assert_eq!(debug_loop.replan_count(), 3);
        assert_eq!(debug_loop.total_verify_loops(), 9);
    }

    #[test]
    fn success_after_ten_failures() {
        let mut debug_loop = DebugLoop::new();
        for attempt in 1..=10u32 {
            let action = debug_loop.record_failure(format!("r{attempt}"), "");
            if action == LoopAction::Replan {
                debug_loop.trigger_replan("next");
            }
        }
        assert_eq!(debug_loop.record_success("r11"), LoopAction::Success);
        assert_eq!(debug_loop.consecutive_failures(), 0);
        assert_eq!(debug_loop.total_verify_loops(), 11);
    }

    #[test]
    fn post_terminal_records_keep_counting() {
        let mut debug_loop = DebugLoop::new();
        for attempt in 1..=12u32 {
            let action = debug_loop.record_failure(format!("r{attempt}"), "");
            if action == LoopAction::Replan {
                debug_loop.trigger_replan("next");
            }
        }

        // Past the hard stop, further failures keep returning HardStop and
        // the total keeps incrementing for forensics.
        assert_eq!(debug_loop.record_failure("r13", ""), LoopAction::HardStop);
        assert_eq!(debug_loop.total_verify_loops(), 13);
        assert_eq!(debug_loop.state().attempts.len(), 13);
    }

    #[test]
    fn total_always_equals_attempt_count() {
        let mut debug_loop = DebugLoop::new();
        debug_loop.record_failure("r1", "");
        debug_loop.record_success("r2");
        debug_loop.record_failure("r3", "");
        assert_eq!(
            debug_loop.total_verify_loops() as usize,
            debug_loop.state().attempts.len()
        );
    }

    #[test]
    fn requery_heuristic_matches_keywords() {
        let debug_loop = DebugLoop::new();
        assert!(debug_loop.should_requery_scouts("ModuleNotFoundError: no module named x"));
        assert!(debug_loop.should_requery_scouts("Build failed with 3 errors"));
        assert!(debug_loop.should_requery_scouts("test timed out: TIMEOUT after 30s"));
        assert!(!debug_loop.should_requery_scouts("assertion failed: expected 2 got 3"));
    }

    #[test]
    fn all_run_ids_preserves_order() {
        let mut debug_loop = DebugLoop::new();
        debug_loop.record_failure("r1", "");
        debug_loop.record_success("r2");
        assert_eq!(debug_loop.state().all_run_ids(), vec!["r1", "r2"]);
    }

    #[test]
    fn failure_summary_lists_only_failures() {
        let mut debug_loop = DebugLoop::new();
        assert_eq!(
            debug_loop.failure_summary_markdown(),
            "No verification attempts recorded."
        );

        debug_loop.record_failure("r1", "tests exploded");
        debug_loop.record_success("r2");

        let summary = debug_loop.failure_summary_markdown();
        assert!(summary.contains("1 failures"));
        assert!(summary.contains("r1"));
        assert!(summary.contains("tests exploded"));
        assert!(!summary.contains("r2"));
    }

    #[test]
    fn attempt_display_format() {
        let mut debug_loop = DebugLoop::new();
        debug_loop.record_failure("r1", "");
        assert_eq!(debug_loop.attempt_display(), "Attempt 1/12");
    }

    #[test]
    fn reset_clears_everything() {
        let mut debug_loop = DebugLoop::new();
        debug_loop.record_failure("r1", "");
        debug_loop.trigger_replan("s");
        debug_loop.reset();
        assert_eq!(debug_loop.total_verify_loops(), 0);
        assert_eq!(debug_loop.replan_count(), 0);
        assert!(debug_loop.state().attempts.is_empty());
        assert!(debug_loop.state().strategy_history.is_empty());
    }
}
