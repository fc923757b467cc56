//! Workflows: the execution strategies that run case-run-configurations.
//!
//! A [`Workflow`] is the back-end doing the actual work. Every instance is
//! wrapped in a [`WorkflowHandle`] which gives it an identity, tracks the
//! units it owns and drives it as one tokio task:
//!
//! ```text
//!   WorkflowFactory ──► WorkflowHandle ──claim──► units (workflow = handle)
//!                             │
//!   TestRuns::start() ────────┤ start(): spawn execute(units, ctx) once
//!                             │
//!                             │      ResultSink::report(unit, result)
//!                             │ ─────────────────────────────────► TestRuns::update()
//!                             │
//!   TestRuns::wait() ─────────┘ join(): await the task once
//! ```
//!
//! Workflows never touch the orchestrator's units directly. They work on
//! copies and send `unit.with_result(..)` through the [`ResultSink`]; the
//! orchestrator validates and forwards each update.
//!
//! # Cancellation
//!
//! [`WorkflowHandle::cancel`] records a canceled unit. Once every member of
//! the handle is canceled, the handle fires its [`CancellationToken`] and
//! calls [`Workflow::terminate`]. A grouped workflow therefore keeps running
//! while any of its units is still wanted.

pub mod builtin;
pub mod command;
pub mod factory;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::caserun::{CaseRunConfiguration, CrcId, lock};
use crate::error::PipelineResult;
use crate::event::Event;
use crate::result::CaseResult;
use crate::settings::Settings;

pub use factory::{Grouped, Isolated, WorkflowClass, WorkflowFactory, WorkflowRegistry};

/// Run-wide inputs available to workflows.
#[derive(Clone)]
pub struct RunContext {
    event: Arc<dyn Event>,
    settings: Arc<Settings>,
}

impl RunContext {
    pub fn new(event: Arc<dyn Event>, settings: Arc<Settings>) -> Self {
        Self { event, settings }
    }

    pub fn event(&self) -> &dyn Event {
        self.event.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// Channel through which workflows report result updates to the orchestrator.
#[derive(Clone)]
pub struct ResultSink {
    tx: mpsc::UnboundedSender<CaseRunConfiguration>,
}

impl ResultSink {
    pub fn new(tx: mpsc::UnboundedSender<CaseRunConfiguration>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CaseRunConfiguration>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Reports `result` for `unit`.
    ///
    /// Returns `false` when the orchestrator is gone.
    pub fn report(&self, unit: &CaseRunConfiguration, result: CaseResult) -> bool {
        self.send(unit.with_result(result))
    }

    /// Sends an already updated copy of a unit.
    pub fn send(&self, unit: CaseRunConfiguration) -> bool {
        self.tx.send(unit).is_ok()
    }
}

/// Everything a running workflow instance gets from its handle.
#[derive(Clone)]
pub struct WorkflowContext {
    run: RunContext,
    sink: ResultSink,
    cancellation: CancellationToken,
}

impl WorkflowContext {
    pub fn event(&self) -> &dyn Event {
        self.run.event()
    }

    pub fn settings(&self) -> &Settings {
        self.run.settings()
    }

    /// Reports `result` for `unit`. See [`ResultSink::report`].
    pub fn report(&self, unit: &CaseRunConfiguration, result: CaseResult) -> bool {
        self.sink.report(unit, result)
    }

    /// Token fired when the whole workflow instance should stop.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// An execution back-end for one or more case-run-configurations.
///
/// # Implementing a Workflow
///
/// ```no_run
/// use async_trait::async_trait;
/// use testpipeline::caserun::CaseRunConfiguration;
/// use testpipeline::result::{CaseResult, State, Verdict};
/// use testpipeline::workflow::{Workflow, WorkflowContext};
///
/// struct AlwaysPass;
///
/// #[async_trait]
/// impl Workflow for AlwaysPass {
///     async fn execute(
///         &self,
///         units: Vec<CaseRunConfiguration>,
///         ctx: WorkflowContext,
///     ) -> anyhow::Result<()> {
///         for unit in &units {
///             ctx.report(unit, CaseResult::finished(State::Complete, Verdict::Pass));
///         }
///         Ok(())
///     }
///
///     fn display_status(&self) -> String {
///         "always passing".to_string()
///     }
/// }
/// ```
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Runs `units` to completion, reporting progress through `ctx`.
    ///
    /// Units left without a final result when this returns are forced to
    /// `DNF`/`ERROR` by the orchestrator.
    ///
    /// # Errors
    ///
    /// An error is logged; it does not abort the run.
    async fn execute(
        &self,
        units: Vec<CaseRunConfiguration>,
        ctx: WorkflowContext,
    ) -> anyhow::Result<()>;

    /// Called once every unit of the instance has been canceled.
    fn terminate(&self) {}

    /// Human-readable status line.
    fn display_status(&self) -> String;
}

struct HandleInner {
    id: Uuid,
    kind: String,
    workflow: Arc<dyn Workflow>,
    members: Mutex<BTreeSet<CrcId>>,
    canceled: Mutex<BTreeSet<CrcId>>,
    cancellation: CancellationToken,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Shared handle identifying one workflow instance.
///
/// Clones refer to the same instance; [`same`](Self::same) compares identity.
#[derive(Clone)]
pub struct WorkflowHandle {
    inner: Arc<HandleInner>,
}

impl WorkflowHandle {
    /// Wraps `workflow`, registered under the workflow type `kind`.
    pub fn new(kind: impl Into<String>, workflow: Arc<dyn Workflow>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                kind: kind.into(),
                workflow,
                members: Mutex::new(BTreeSet::new()),
                canceled: Mutex::new(BTreeSet::new()),
                cancellation: CancellationToken::new(),
                started: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn workflow_type(&self) -> &str {
        &self.inner.kind
    }

    /// Ids of the units this instance handles.
    pub fn members(&self) -> BTreeSet<CrcId> {
        lock(&self.inner.members).clone()
    }

    pub fn same(&self, other: &WorkflowHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Assigns this instance to every unit in `units`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowReassigned`](crate::error::PipelineError::WorkflowReassigned)
    /// if a unit is already handled by another instance.
    pub fn claim(&self, units: &mut [&mut CaseRunConfiguration]) -> PipelineResult<()> {
        for unit in units.iter_mut() {
            unit.assign_workflow(self)?;
            lock(&self.inner.members).insert(unit.id().clone());
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Spawns the workflow task. Only the first call has an effect.
    ///
    /// Returns whether this call started the instance. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, units: Vec<CaseRunConfiguration>, run: RunContext, sink: ResultSink) -> bool {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!(
            "Starting {} workflow {} with {} unit(s)",
            self.inner.kind,
            self.inner.id,
            units.len()
        );
        let ctx = WorkflowContext {
            run,
            sink,
            cancellation: self.inner.cancellation.clone(),
        };
        let workflow = Arc::clone(&self.inner.workflow);
        let kind = self.inner.kind.clone();
        let id = self.inner.id;
        let task = tokio::spawn(async move {
            match workflow.execute(units, ctx).await {
                Ok(()) => debug!("{} workflow {} finished", kind, id),
                Err(e) => error!("{} workflow {} failed: {:#}", kind, id, e),
            }
        });
        *lock(&self.inner.task) = Some(task);
        true
    }

    /// Waits for the workflow task. Returns immediately if it was never
    /// started or has already been joined.
    pub async fn join(&self) {
        let task = lock(&self.inner.task).take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!("{} workflow {} panicked: {}", self.inner.kind, self.inner.id, e);
        }
    }

    /// Records that `unit` is no longer wanted.
    ///
    /// Returns `true` when this made every member canceled and the instance
    /// was terminated.
    pub fn cancel(&self, unit: &CrcId) -> bool {
        let all_canceled = {
            let mut canceled = lock(&self.inner.canceled);
            canceled.insert(unit.clone());
            lock(&self.inner.members).is_subset(&canceled)
        };
        if all_canceled {
            self.terminate();
        } else {
            debug!(
                "{} workflow {} keeps running for its remaining units",
                self.inner.kind, self.inner.id
            );
        }
        all_canceled
    }

    /// Stops the whole instance regardless of per-unit state.
    pub fn terminate(&self) {
        if self.inner.cancellation.is_cancelled() {
            return;
        }
        info!("Terminating {} workflow {}", self.inner.kind, self.inner.id);
        self.inner.cancellation.cancel();
        self.inner.workflow.terminate();
    }

    pub fn display_status(&self) -> String {
        self.inner.workflow.display_status()
    }
}

impl fmt::Debug for WorkflowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .finish()
    }
}
