//! Result state machine for case-run-configurations.
//!
//! A [`CaseResult`] pairs a [`State`] (how far execution progressed) with a
//! [`Verdict`] (how bad the outcome is) and a `final` flag. Both enums are
//! totally ordered by declaration order:
//!
//! ```text
//! State:   not started < queued < started < running < canceled < DNF < complete
//! Verdict: UNSET < PASS < INFO < WARN < FAIL < ERROR
//! ```
//!
//! Aggregating a group of units takes the *least progressed* state and the
//! *most severe* verdict present, so a group is only "complete" once every
//! member is and a single `ERROR` marks the whole group.
//!
//! Once a result is final, [`CaseResult::update`] refuses any further change.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Execution progress of a case-run-configuration.
///
/// Variants are declared from least to most progressed; the derived
/// ordering is the state machine's total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum State {
    #[serde(rename = "not started")]
    NotStarted,
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "canceled")]
    Canceled,
    /// Did not finish.
    #[serde(rename = "DNF")]
    Dnf,
    #[serde(rename = "complete")]
    Complete,
}

impl State {
    /// All states, least progressed first.
    pub const ALL: [State; 7] = [
        State::NotStarted,
        State::Queued,
        State::Started,
        State::Running,
        State::Canceled,
        State::Dnf,
        State::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::NotStarted => "not started",
            State::Queued => "queued",
            State::Started => "started",
            State::Running => "running",
            State::Canceled => "canceled",
            State::Dnf => "DNF",
            State::Complete => "complete",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome severity of a case-run-configuration.
///
/// Variants are declared from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// No verdict yet.
    #[default]
    Unset,
    Pass,
    Info,
    Warn,
    Fail,
    Error,
}

impl Verdict {
    /// All verdicts, least severe first.
    pub const ALL: [Verdict; 6] = [
        Verdict::Unset,
        Verdict::Pass,
        Verdict::Info,
        Verdict::Warn,
        Verdict::Fail,
        Verdict::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Unset => "UNSET",
            Verdict::Pass => "PASS",
            Verdict::Info => "INFO",
            Verdict::Warn => "WARN",
            Verdict::Fail => "FAIL",
            Verdict::Error => "ERROR",
        }
    }

    /// Returns `true` for verdicts that should fail a run.
    pub fn is_failure(&self) -> bool {
        matches!(self, Verdict::Fail | Verdict::Error)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State/verdict pair tracked per case-run-configuration.
///
/// `CaseResult` is a plain value: cloning it yields an independent copy and
/// equality compares every field.
///
/// # Example
///
/// ```
/// use testpipeline::result::{CaseResult, State, Verdict};
///
/// let mut result = CaseResult::new(State::NotStarted);
/// result.update(&CaseResult::new(State::Running)).unwrap();
/// result.update(&CaseResult::finished(State::Complete, Verdict::Pass)).unwrap();
///
/// assert!(result.is_final());
/// assert!(result.update(&CaseResult::new(State::Running)).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    state: State,
    #[serde(rename = "result", default)]
    verdict: Verdict,
    #[serde(rename = "final", default)]
    is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl CaseResult {
    /// Creates a non-final result with no verdict.
    pub fn new(state: State) -> Self {
        Self {
            state,
            verdict: Verdict::Unset,
            is_final: false,
            message: None,
        }
    }

    /// Creates a non-final result carrying a verdict.
    pub fn with_verdict(state: State, verdict: Verdict) -> Self {
        Self {
            verdict,
            ..Self::new(state)
        }
    }

    /// Creates a final result. No update is accepted after this one.
    pub fn finished(state: State, verdict: Verdict) -> Self {
        Self {
            state,
            verdict,
            is_final: true,
            message: None,
        }
    }

    /// The result forced onto units whose workflow ended without a final result.
    pub fn did_not_finish() -> Self {
        Self::finished(State::Dnf, Verdict::Error)
    }

    /// Attaches a free-text message (e.g. a cancel reason).
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Applies `new` on top of this result.
    ///
    /// State, verdict and message are overwritten and `final` takes the value
    /// carried by `new`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StateChange`] and leaves `self` untouched if
    /// this result is already final.
    pub fn update(&mut self, new: &CaseResult) -> PipelineResult<()> {
        if self.is_final {
            return Err(PipelineError::StateChange {
                current: self.clone(),
                requested: new.clone(),
            });
        }
        self.state = new.state;
        self.verdict = new.verdict;
        self.is_final = new.is_final;
        self.message = new.message.clone();
        Ok(())
    }
}

impl Default for CaseResult {
    fn default() -> Self {
        Self::new(State::NotStarted)
    }
}

/// Least progressed state among `results`, or `None` when empty.
pub fn least_progressed<'a>(results: impl IntoIterator<Item = &'a CaseResult>) -> Option<State> {
    results.into_iter().map(CaseResult::state).min()
}

/// Most severe verdict among `results`, or `None` when empty.
pub fn most_severe<'a>(results: impl IntoIterator<Item = &'a CaseResult>) -> Option<Verdict> {
    results.into_iter().map(CaseResult::verdict).max()
}

impl fmt::Display for CaseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Result({}, {}, final={})", self.state, self.verdict, self.is_final)?;
        if let Some(message) = &self.message {
            write!(f, " [{}]", message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_order_is_total() {
        for pair in State::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(State::ALL.iter().min(), Some(&State::NotStarted));
        assert_eq!(State::ALL.iter().max(), Some(&State::Complete));
    }

    #[test]
    fn test_verdict_severity_order() {
        assert!(Verdict::Unset < Verdict::Pass);
        assert!(Verdict::Pass < Verdict::Fail);
        assert!(Verdict::Fail < Verdict::Error);
        assert!(Verdict::Error.is_failure());
        assert!(!Verdict::Warn.is_failure());
    }

    #[test]
    fn test_update_overwrites_non_final() {
        let mut result = CaseResult::new(State::Queued);
        result
            .update(&CaseResult::with_verdict(State::Running, Verdict::Warn))
            .unwrap();
        assert_eq!(result.state(), State::Running);
        assert_eq!(result.verdict(), Verdict::Warn);
        assert!(!result.is_final());
    }

    #[test]
    fn test_final_result_rejects_updates() {
        let mut result = CaseResult::finished(State::Complete, Verdict::Pass);
        let err = result
            .update(&CaseResult::finished(State::Dnf, Verdict::Error))
            .unwrap_err();

        assert!(matches!(err, PipelineError::StateChange { .. }));
        assert_eq!(result.state(), State::Complete);
        assert_eq!(result.verdict(), Verdict::Pass);
        assert!(result.is_final());
    }

    #[test]
    fn test_copy_is_independent() {
        let original = CaseResult::new(State::Running);
        let mut copy = original.clone();
        copy.update(&CaseResult::did_not_finish()).unwrap();

        assert_eq!(original.state(), State::Running);
        assert_ne!(original, copy);
    }

    #[test]
    fn test_aggregates() {
        let results = [
            CaseResult::with_verdict(State::Running, Verdict::Pass),
            CaseResult::finished(State::Complete, Verdict::Fail),
        ];
        assert_eq!(least_progressed(&results), Some(State::Running));
        assert_eq!(most_severe(&results), Some(Verdict::Fail));
        assert_eq!(least_progressed(std::iter::empty()), None);
    }

    #[test]
    fn test_display() {
        let result = CaseResult::did_not_finish().with_message("worker crashed");
        assert_eq!(
            result.to_string(),
            "Result(DNF, ERROR, final=true) [worker crashed]"
        );
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&CaseResult::new(State::NotStarted)).unwrap();
        assert_eq!(json, r#"{"state":"not started","result":"UNSET","final":false}"#);

        let parsed: CaseResult =
            serde_json::from_str(r#"{"state":"DNF","result":"ERROR","final":true}"#).unwrap();
        assert_eq!(parsed, CaseResult::did_not_finish());
    }
}
