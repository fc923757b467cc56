//! Error types shared by the pipeline core.
//!
//! Most operations in this crate return [`PipelineResult<T>`]. The variants
//! are split by who is expected to act on them:
//!
//! - **Input errors**: `MalformedEvent`, `UnknownMergeMethod`, `Template`
//! - **Programming errors** in workflow back-ends or callers: `IdentityMismatch`,
//!   `WorkflowReassigned`, `NotReady`, `NotFound`
//! - **Run invariants**: `UnexpectedState` (fatal during setup)
//! - **Result races**: `StateChange`, normally logged and absorbed by the
//!   orchestrator rather than propagated

use crate::caserun::CrcId;
use crate::result::CaseResult;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised by the pipeline core.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The wire event could not be parsed or lacks a string `type`.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// A configuration merge method name is not recognised.
    ///
    /// Valid names are `intersection` and `extension`.
    #[error("Unknown test configuration merge method: {0:?}")]
    UnknownMergeMethod(String),

    /// Attempted to update a result that is already final.
    #[error("Cannot change state of result {current} to {requested}")]
    StateChange {
        current: CaseResult,
        requested: CaseResult,
    },

    /// An invariant of the run was violated.
    ///
    /// Raised, for example, when a unit is left without a workflow after
    /// assignment or when a unit no test plan wants is canceled.
    #[error("Unexpected state: {0}")]
    UnexpectedState(String),

    /// An operation was invoked before its prerequisite step.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Two case-run-configurations that are not the same unit were merged.
    #[error("Cannot merge different case-run-configurations: {left} and {right}")]
    IdentityMismatch { left: String, right: String },

    /// A unit already handled by one workflow instance was handed to another.
    #[error("Case-run-configuration {0} is already assigned to a different workflow")]
    WorkflowReassigned(CrcId),

    /// No case-run-configuration with the requested id exists in the run.
    #[error("No caseRunConfiguration of id \"{0}\" found")]
    NotFound(CrcId),

    /// An event template could not be rendered.
    #[error("Template error: {0}")]
    Template(String),
}
