//! Test run orchestration.
//!
//! [`TestRuns`] is the top-level coordinator of one run:
//!
//! ```text
//!   ┌────────────────────────────────────────────────────────────────┐
//!   │ TestRuns::new()                                                │
//!   │   event.generate_case_run_configurations(library, settings)    │
//!   │   WorkflowFactory::assign()      every unit gets a workflow    │
//!   │   ReportSenderFactory::assign()  every plan gets a sender      │
//!   └──────────────────────────┬─────────────────────────────────────┘
//!                              ▼
//!   start()   senders.start(), then each distinct workflow once
//!                              ▼
//!   wait()    ┌──────────────────────────────────────────────┐
//!             │ per workflow: join() while draining updates  │
//!             │ update(unit) ──► validate ──► senders        │
//!             │ unfinished units forced to DNF/ERROR         │
//!             └──────────────────────────────────────────────┘
//!                              ▼
//!             senders.join()
//! ```
//!
//! Workflows report through a [`ResultSink`] whose receiving end is drained
//! only here, so each unit's result has a single writer. The forced
//! `DNF`/`ERROR` of [`wait`](TestRuns::wait) goes through the same
//! [`update`](TestRuns::update) path after the owning workflow has returned.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::caserun::{CaseRunConfiguration, CaseRunConfigurationList, CaseRunSnapshot, CrcId};
use crate::error::{PipelineError, PipelineResult};
use crate::event::Event;
use crate::library::Library;
use crate::report::{PlanSummary, ReportSender, ReportSenderFactory};
use crate::result::{CaseResult, State, Verdict};
use crate::settings::Settings;
use crate::workflow::{ResultSink, RunContext, WorkflowFactory, WorkflowHandle};

/// One test run: its units, their workflows and the report senders.
pub struct TestRuns {
    id: Uuid,
    run: RunContext,
    units: CaseRunConfigurationList,
    senders: Vec<Box<dyn ReportSender>>,
    sink: ResultSink,
    updates: mpsc::UnboundedReceiver<CaseRunConfiguration>,
    started_workflows: HashSet<Uuid>,
    started: bool,
}

impl TestRuns {
    /// Builds the run for `event`: populates the units, assigns workflows
    /// and creates the report senders.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownMergeMethod`] from unit generation and
    /// [`PipelineError::UnexpectedState`] when a unit is left without a
    /// workflow. No workflow is started in either case.
    pub fn new(
        library: &dyn Library,
        event: Arc<dyn Event>,
        settings: Arc<Settings>,
        workflows: &WorkflowFactory,
        senders: &ReportSenderFactory,
    ) -> PipelineResult<Self> {
        let id = Uuid::new_v4();
        let run = RunContext::new(event, Arc::clone(&settings));

        let mut units = run
            .event()
            .generate_case_run_configurations(library, &settings)?;
        for unit in units.iter_mut() {
            unit.set_testrun(id);
        }
        info!(
            "Test run {} for {:?}: {} case-run-configuration(s)",
            id,
            run.event().event_type(),
            units.len()
        );

        workflows.assign(&mut units, &run)?;
        let senders = senders.assign(library, &units, &settings);
        debug!("Test run {} has {} report sender(s)", id, senders.len());

        let (sink, updates) = ResultSink::channel();
        Ok(Self {
            id,
            run,
            units,
            senders,
            sink,
            updates,
            started_workflows: HashSet::new(),
            started: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event(&self) -> &dyn Event {
        self.run.event()
    }

    pub fn settings(&self) -> &Settings {
        self.run.settings()
    }

    pub fn units(&self) -> &CaseRunConfigurationList {
        &self.units
    }

    pub fn items(&self) -> impl Iterator<Item = &CaseRunConfiguration> {
        self.units.iter()
    }

    pub fn ids(&self) -> Vec<CrcId> {
        self.units.ids()
    }

    /// Looks up a unit by id.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotFound`] naming `id`.
    pub fn get(&self, id: &CrcId) -> PipelineResult<&CaseRunConfiguration> {
        self.units.find(id)
    }

    pub fn senders(&self) -> &[Box<dyn ReportSender>] {
        &self.senders
    }

    /// Units grouped by the test plans wanting them.
    pub fn testplans_mapping(&self) -> BTreeMap<String, Vec<&CaseRunConfiguration>> {
        self.units.by_testplan()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Least progressed state of the run.
    pub fn status(&self) -> Option<State> {
        self.units.status()
    }

    /// Most severe result of the run.
    pub fn result(&self) -> Option<Verdict> {
        self.units.result()
    }

    /// Per-plan roll-up, ordered by plan id.
    pub fn summary(&self) -> Vec<PlanSummary> {
        self.testplans_mapping()
            .into_iter()
            .map(|(plan, units)| PlanSummary::new(plan, units.into_iter().map(|u| u.result())))
            .collect()
    }

    /// Distinct workflow instances in unit order.
    fn workflows(&self) -> Vec<WorkflowHandle> {
        let mut seen = HashSet::new();
        self.units
            .iter()
            .filter_map(|unit| unit.workflow())
            .filter(|handle| seen.insert(handle.id()))
            .cloned()
            .collect()
    }

    fn members_of(&self, handle: &WorkflowHandle) -> Vec<CaseRunConfiguration> {
        self.units
            .iter()
            .filter(|unit| unit.workflow().is_some_and(|w| w.same(handle)))
            .cloned()
            .collect()
    }

    /// Starts every report sender, then every distinct workflow once.
    ///
    /// Calls after the first do nothing.
    pub async fn start(&mut self) {
        if self.started {
            debug!("Test run {} already started", self.id);
            return;
        }
        self.started = true;

        join_all(self.senders.iter().map(|sender| sender.start())).await;

        for handle in self.workflows() {
            if !self.started_workflows.insert(handle.id()) {
                continue;
            }
            let members = self.members_of(&handle);
            handle.start(members, self.run.clone(), self.sink.clone());
        }
        info!(
            "Test run {} started {} workflow(s)",
            self.id,
            self.started_workflows.len()
        );
    }

    /// Waits for every workflow, applying their updates as they arrive,
    /// then joins every report sender.
    ///
    /// Units without a final result once their workflow has returned are
    /// forced to `DNF`/`ERROR`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotReady`] when called before
    /// [`start`](Self::start).
    pub async fn wait(&mut self) -> PipelineResult<()> {
        if !self.started {
            return Err(PipelineError::NotReady(
                "wait() called before start()".to_string(),
            ));
        }

        for handle in self.workflows() {
            self.join_workflow(&handle).await;

            let unfinished: Vec<CaseRunConfiguration> = self
                .members_of(&handle)
                .into_iter()
                .filter(|unit| !unit.result().is_final())
                .collect();
            for unit in unfinished {
                warn!("{} did not finish, its workflow has returned", unit);
                self.apply(unit.with_result(CaseResult::did_not_finish())).await;
            }
        }

        join_all(self.senders.iter().map(|sender| sender.join())).await;
        info!(
            "Test run {} finished: {}",
            self.id,
            self.result().map_or("-", |verdict| verdict.as_str())
        );
        Ok(())
    }

    async fn join_workflow(&mut self, handle: &WorkflowHandle) {
        enum Step {
            Joined,
            Update(CaseRunConfiguration),
        }

        let join = handle.join();
        tokio::pin!(join);
        loop {
            let step = select! {
                _ = &mut join => Step::Joined,
                Some(update) = self.updates.recv() => Step::Update(update),
            };
            match step {
                Step::Update(update) => self.apply(update).await,
                Step::Joined => break,
            }
        }
        while let Ok(update) = self.updates.try_recv() {
            self.apply(update).await;
        }
    }

    async fn apply(&mut self, update: CaseRunConfiguration) {
        if let Err(e) = self.update(&update).await {
            error!("Dropping update of {}: {}", update, e);
        }
    }

    /// Applies the result carried by `crc` to the owned unit of the same id
    /// and notifies every report sender.
    ///
    /// Returns `false` when the transition was rejected; the update is then
    /// logged and dropped without notifying anyone.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotFound`] when no unit has `crc`'s id.
    pub async fn update(&mut self, crc: &CaseRunConfiguration) -> PipelineResult<bool> {
        let unit = self
            .units
            .get_mut(crc.id())
            .ok_or_else(|| PipelineError::NotFound(crc.id().clone()))?;

        if let Err(e) = unit.try_update_result(crc.result()) {
            error!("Ignoring update of {}: {}", unit, e);
            return Ok(false);
        }
        debug!("{} is now {}", unit, unit.result());

        let snapshot = unit.read_only_copy();
        self.notify(&snapshot).await;
        Ok(true)
    }

    /// Cancels unit `id` for `testplan`, or for every plan when unset.
    ///
    /// Returns whether the workflow-level cancel fired; senders are notified
    /// in that case.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotFound`] for an unknown id and propagates
    /// [`CaseRunConfiguration::cancel`] errors.
    pub async fn cancel(
        &mut self,
        id: &CrcId,
        reason: &str,
        testplan: Option<&str>,
    ) -> PipelineResult<bool> {
        let unit = self
            .units
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(id.clone()))?;
        if !unit.cancel(reason, testplan)? {
            return Ok(false);
        }
        info!("{} canceled: {}", unit, reason);

        let snapshot = unit.read_only_copy();
        self.notify(&snapshot).await;
        Ok(true)
    }

    async fn notify(&self, snapshot: &CaseRunSnapshot) {
        for sender in &self.senders {
            sender.result_update(snapshot).await;
        }
    }
}
