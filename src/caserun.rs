//! Case-run-configurations: the unit of work of a test run.
//!
//! A [`CaseRunConfiguration`] is one test case under one resolved
//! configuration, wanted by one or more test plans. Its identity is a
//! content hash over the test case id and the sorted configuration pairs,
//! so the same unit produced by two plans collapses into one entry when
//! appended to a [`CaseRunConfigurationList`]:
//!
//! ```text
//!   plan A ──► (tc1, {arch: x86_64}) ─┐
//!                                     ├──► one unit, running_for = {A, B}
//!   plan B ──► (tc1, {arch: x86_64}) ─┘
//! ```
//!
//! Cloning a unit yields a *copy*: `running_for` and the workflow handle are
//! shared, the result is independent. [`CaseRunConfiguration::read_only_copy`]
//! turns a unit into a [`CaseRunSnapshot`], which has no mutators at all.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use tracing::{debug, error};
use uuid::Uuid;

use crate::configuration::{Configuration, Scalar};
use crate::error::{PipelineError, PipelineResult};
use crate::library::TestCase;
use crate::result::{self, CaseResult, State, Verdict};
use crate::workflow::WorkflowHandle;

/// Stable identity of a case-run-configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CrcId(String);

impl CrcId {
    /// Computes the identity of `testcase_id` under `configuration`.
    pub fn compute(testcase_id: &str, configuration: &Configuration) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(testcase_id.as_bytes());
        hasher.update(b":");
        hasher.update(configuration.canonical().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CrcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Test plan id -> "still wanted" flag, shared between copies of a unit.
type RunningFor = Arc<Mutex<BTreeMap<String, bool>>>;

/// Locks `mutex`, recovering the guard if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One test case under one resolved configuration.
#[derive(Clone)]
pub struct CaseRunConfiguration {
    id: CrcId,
    testcase: Arc<TestCase>,
    configuration: Configuration,
    running_for: RunningFor,
    workflow: Option<WorkflowHandle>,
    result: CaseResult,
    testrun: Option<Uuid>,
}

impl CaseRunConfiguration {
    /// Creates a unit wanted by every plan in `testplans`.
    pub fn new<I, S>(testcase: Arc<TestCase>, configuration: Configuration, testplans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let running_for = testplans.into_iter().map(|id| (id.into(), true)).collect();
        Self {
            id: CrcId::compute(&testcase.id, &configuration),
            testcase,
            configuration,
            running_for: Arc::new(Mutex::new(running_for)),
            workflow: None,
            result: CaseResult::default(),
            testrun: None,
        }
    }

    pub fn id(&self) -> &CrcId {
        &self.id
    }

    pub fn testcase(&self) -> &Arc<TestCase> {
        &self.testcase
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn result(&self) -> &CaseResult {
        &self.result
    }

    pub fn workflow(&self) -> Option<&WorkflowHandle> {
        self.workflow.as_ref()
    }

    /// Id of the test run owning this unit, once populated.
    pub fn testrun(&self) -> Option<Uuid> {
        self.testrun
    }

    pub(crate) fn set_testrun(&mut self, testrun: Uuid) {
        self.testrun = Some(testrun);
    }

    /// Snapshot of the plans this unit runs for.
    pub fn running_for(&self) -> BTreeMap<String, bool> {
        lock(&self.running_for).clone()
    }

    /// Ids of every plan that requested this unit, wanted or not.
    pub fn testplans(&self) -> Vec<String> {
        lock(&self.running_for).keys().cloned().collect()
    }

    /// Returns whether at least one plan still wants this unit.
    pub fn is_wanted(&self) -> bool {
        lock(&self.running_for).values().any(|wanted| *wanted)
    }

    /// Marks `handle` as the workflow handling this unit.
    ///
    /// Assigning the same handle again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WorkflowReassigned`] if a different workflow
    /// instance already handles this unit.
    pub fn assign_workflow(&mut self, handle: &WorkflowHandle) -> PipelineResult<()> {
        match &self.workflow {
            Some(current) if !current.same(handle) => {
                Err(PipelineError::WorkflowReassigned(self.id.clone()))
            }
            Some(_) => Ok(()),
            None => {
                debug!("Assigning {} workflow to {}", handle.workflow_type(), self);
                self.workflow = Some(handle.clone());
                Ok(())
            }
        }
    }

    /// Returns whether `other` is the same logical unit.
    pub fn same_unit(&self, other: &CaseRunConfiguration) -> bool {
        self.testcase.id == other.testcase.id && self.configuration == other.configuration
    }

    /// Adds the plans of `other` to this unit.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::IdentityMismatch`] when `other` is a
    /// different unit.
    pub fn merge(&mut self, other: &CaseRunConfiguration) -> PipelineResult<()> {
        if !self.same_unit(other) {
            return Err(PipelineError::IdentityMismatch {
                left: self.to_string(),
                right: other.to_string(),
            });
        }
        if Arc::ptr_eq(&self.running_for, &other.running_for) {
            return Ok(());
        }
        let incoming = other.running_for();
        lock(&self.running_for).extend(incoming);
        Ok(())
    }

    /// Applies `result` through the result state machine.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StateChange`] when the current result is final.
    pub fn try_update_result(&mut self, result: &CaseResult) -> PipelineResult<()> {
        debug!(
            "Attempting to change result of {:?} from {} to {}",
            self.id.as_str(),
            self.result,
            result
        );
        self.result.update(result)
    }

    /// Applies `result`, logging and discarding an invalid transition.
    pub fn update_result(&mut self, result: &CaseResult) -> &mut Self {
        if let Err(e) = self.try_update_result(result) {
            error!("Cannot change state of result: {}", e);
        }
        self
    }

    /// Returns a copy of this unit carrying `result`.
    pub fn with_result(&self, result: CaseResult) -> Self {
        Self {
            result,
            ..self.clone()
        }
    }

    /// Returns an immutable snapshot of this unit.
    pub fn read_only_copy(&self) -> CaseRunSnapshot {
        CaseRunSnapshot {
            id: self.id.clone(),
            testcase: Arc::clone(&self.testcase),
            configuration: self.configuration.clone(),
            running_for: self.running_for(),
            workflow_type: self.workflow.as_ref().map(|w| w.workflow_type().to_string()),
            result: self.result.clone(),
            testrun: self.testrun,
        }
    }

    /// Withdraws this unit for one plan or, with `testplan` unset, for
    /// every plan in turn.
    ///
    /// The workflow is asked to cancel the unit once no plan wants it any
    /// more, and the result is forced to a final `canceled` carrying
    /// `reason`. Returns whether that workflow-level cancel fired.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnexpectedState`] when `testplan` is unset
    /// and the unit runs for no plan at all.
    pub fn cancel(&mut self, reason: &str, testplan: Option<&str>) -> PipelineResult<bool> {
        let Some(testplan) = testplan else {
            for testplan in self.testplans() {
                if self.cancel(reason, Some(&testplan))? {
                    return Ok(true);
                }
            }
            return Err(PipelineError::UnexpectedState(format!(
                "cancel requested on {} which no test plan wants",
                self
            )));
        };

        {
            let mut running_for = lock(&self.running_for);
            running_for.insert(testplan.to_string(), false);
            if running_for.values().any(|wanted| *wanted) {
                debug!("{} still wanted after cancel for {:?}", self, testplan);
                return Ok(false);
            }
        }

        if let Some(workflow) = &self.workflow {
            workflow.cancel(&self.id);
        }
        self.update_result(
            &CaseResult::finished(State::Canceled, Verdict::Unset).with_message(reason),
        );
        Ok(true)
    }
}

impl fmt::Display for CaseRunConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<CaseRunConfiguration({}:{})>",
            self.testcase.name, self.configuration
        )
    }
}

impl fmt::Debug for CaseRunConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaseRunConfiguration")
            .field("id", &self.id)
            .field("testcase", &self.testcase.id)
            .field("configuration", &self.configuration)
            .field("running_for", &self.running_for())
            .field("workflow", &self.workflow)
            .field("result", &self.result)
            .finish()
    }
}

/// Immutable view of a unit handed to report senders.
#[derive(Debug, Clone, Serialize)]
pub struct CaseRunSnapshot {
    id: CrcId,
    #[serde(serialize_with = "serialize_testcase_id")]
    testcase: Arc<TestCase>,
    configuration: Configuration,
    running_for: BTreeMap<String, bool>,
    workflow_type: Option<String>,
    result: CaseResult,
    testrun: Option<Uuid>,
}

fn serialize_testcase_id<S: Serializer>(
    testcase: &Arc<TestCase>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&testcase.id)
}

impl CaseRunSnapshot {
    pub fn id(&self) -> &CrcId {
        &self.id
    }

    pub fn testcase(&self) -> &TestCase {
        &self.testcase
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn running_for(&self) -> &BTreeMap<String, bool> {
        &self.running_for
    }

    /// Returns whether this unit runs for `testplan`, wanted or not.
    pub fn runs_for(&self, testplan: &str) -> bool {
        self.running_for.contains_key(testplan)
    }

    pub fn workflow_type(&self) -> Option<&str> {
        self.workflow_type.as_deref()
    }

    pub fn result(&self) -> &CaseResult {
        &self.result
    }

    pub fn testrun(&self) -> Option<Uuid> {
        self.testrun
    }
}

impl fmt::Display for CaseRunSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<CaseRunConfiguration({}:{})>",
            self.testcase.name, self.configuration
        )
    }
}

/// Ordered list of units deduplicating on insert.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use testpipeline::caserun::{CaseRunConfiguration, CaseRunConfigurationList};
/// use testpipeline::configuration::Configuration;
/// use testpipeline::library::TestCase;
///
/// let testcase = Arc::new(TestCase::new("tc1", "testcase 1"));
/// let config = Configuration::new().with("arch", "x86_64");
///
/// let mut list = CaseRunConfigurationList::new();
/// list.push(CaseRunConfiguration::new(testcase.clone(), config.clone(), ["tp1"]));
/// list.push(CaseRunConfiguration::new(testcase, config, ["tp2"]));
///
/// assert_eq!(list.len(), 1);
/// assert_eq!(list.iter().next().unwrap().testplans(), vec!["tp1", "tp2"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CaseRunConfigurationList {
    items: Vec<CaseRunConfiguration>,
}

impl CaseRunConfigurationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `unit`, or merges its plans into an existing entry for the
    /// same test case and configuration.
    pub fn push(&mut self, unit: CaseRunConfiguration) {
        match self.items.iter_mut().find(|existing| existing.same_unit(&unit)) {
            Some(existing) => {
                // same_unit was checked above
                let _ = existing.merge(&unit);
            }
            None => self.items.push(unit),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CaseRunConfiguration> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, CaseRunConfiguration> {
        self.items.iter_mut()
    }

    pub fn get(&self, id: &CrcId) -> Option<&CaseRunConfiguration> {
        self.items.iter().find(|unit| unit.id() == id)
    }

    pub fn get_mut(&mut self, id: &CrcId) -> Option<&mut CaseRunConfiguration> {
        self.items.iter_mut().find(|unit| unit.id() == id)
    }

    /// Looks up a unit by id.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotFound`] naming `id` when absent.
    pub fn find(&self, id: &CrcId) -> PipelineResult<&CaseRunConfiguration> {
        self.get(id).ok_or_else(|| PipelineError::NotFound(id.clone()))
    }

    pub fn ids(&self) -> Vec<CrcId> {
        self.items.iter().map(|unit| unit.id().clone()).collect()
    }

    /// Groups units by the value `key` computes for each of them.
    pub fn by_key<K, F>(&self, key: F) -> BTreeMap<K, Vec<&CaseRunConfiguration>>
    where
        K: Ord,
        F: Fn(&CaseRunConfiguration) -> K,
    {
        let mut groups: BTreeMap<K, Vec<&CaseRunConfiguration>> = BTreeMap::new();
        for unit in &self.items {
            groups.entry(key(unit)).or_default().push(unit);
        }
        groups
    }

    pub fn by_testcase(&self) -> BTreeMap<String, Vec<&CaseRunConfiguration>> {
        self.by_key(|unit| unit.testcase.id.clone())
    }

    /// Groups by declared execution type; `None` collects manual test cases.
    pub fn by_workflow_type(&self) -> BTreeMap<Option<String>, Vec<&CaseRunConfiguration>> {
        self.by_key(|unit| unit.testcase.execution_type().map(str::to_string))
    }

    /// Groups by the values of `keys` in each unit's configuration.
    pub fn by_configuration(
        &self,
        keys: &[&str],
    ) -> BTreeMap<Vec<Option<Scalar>>, Vec<&CaseRunConfiguration>> {
        self.by_key(|unit| {
            keys.iter()
                .map(|key| unit.configuration.get(key).cloned())
                .collect()
        })
    }

    /// Groups by test plan. A unit wanted by several plans appears in each group.
    pub fn by_testplan(&self) -> BTreeMap<String, Vec<&CaseRunConfiguration>> {
        let mut groups: BTreeMap<String, Vec<&CaseRunConfiguration>> = BTreeMap::new();
        for unit in &self.items {
            for testplan in unit.testplans() {
                groups.entry(testplan).or_default().push(unit);
            }
        }
        groups
    }

    /// Least progressed state of all units, `None` when empty.
    pub fn status(&self) -> Option<State> {
        result::least_progressed(self.items.iter().map(CaseRunConfiguration::result))
    }

    /// Most severe verdict of all units, `None` when empty.
    pub fn result(&self) -> Option<Verdict> {
        result::most_severe(self.items.iter().map(CaseRunConfiguration::result))
    }
}

impl FromIterator<CaseRunConfiguration> for CaseRunConfigurationList {
    fn from_iter<I: IntoIterator<Item = CaseRunConfiguration>>(iter: I) -> Self {
        let mut list = Self::new();
        list.extend(iter);
        list
    }
}

impl Extend<CaseRunConfiguration> for CaseRunConfigurationList {
    fn extend<I: IntoIterator<Item = CaseRunConfiguration>>(&mut self, iter: I) {
        for unit in iter {
            self.push(unit);
        }
    }
}

impl<'a> IntoIterator for &'a CaseRunConfigurationList {
    type Item = &'a CaseRunConfiguration;
    type IntoIter = std::slice::Iter<'a, CaseRunConfiguration>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::builtin::ManualWorkflow;

    fn testcase(id: &str) -> Arc<TestCase> {
        Arc::new(TestCase::new(id, format!("testcase {}", id)))
    }

    fn unit(tc: &Arc<TestCase>, arch: &str, plans: &[&str]) -> CaseRunConfiguration {
        CaseRunConfiguration::new(
            Arc::clone(tc),
            Configuration::new().with("arch", arch),
            plans.iter().copied(),
        )
    }

    fn handle() -> WorkflowHandle {
        WorkflowHandle::new("manual", Arc::new(ManualWorkflow))
    }

    #[test]
    fn test_identity_ignores_key_order() {
        let tc = testcase("tc1");
        let a = CaseRunConfiguration::new(
            Arc::clone(&tc),
            Configuration::new().with("arch", "x86_64").with("variant", "server"),
            ["tp1"],
        );
        let b = CaseRunConfiguration::new(
            Arc::clone(&tc),
            [("variant", "server"), ("arch", "x86_64")].into_iter().collect(),
            ["tp2"],
        );
        assert_eq!(a.id(), b.id());
        assert!(a.same_unit(&b));
    }

    #[test]
    fn test_identity_differs_by_testcase_and_configuration() {
        let a = unit(&testcase("tc1"), "x86_64", &["tp"]);
        let b = unit(&testcase("tc2"), "x86_64", &["tp"]);
        let c = unit(&testcase("tc1"), "aarch64", &["tp"]);
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.id().as_str().len(), 64);
    }

    #[test]
    fn test_list_dedup_merges_running_for() {
        let tc = testcase("tc1");
        let mut list = CaseRunConfigurationList::new();
        list.push(unit(&tc, "x86_64", &["tp1"]));
        list.push(unit(&tc, "x86_64", &["tp2"]));
        list.push(unit(&tc, "aarch64", &["tp2"]));

        assert_eq!(list.len(), 2);
        let shared = list.iter().next().unwrap();
        assert_eq!(shared.testplans(), vec!["tp1", "tp2"]);
        assert!(shared.running_for().values().all(|wanted| *wanted));
    }

    #[test]
    fn test_merge_rejects_different_units() {
        let tc = testcase("tc1");
        let mut a = unit(&tc, "x86_64", &["tp1"]);
        let b = unit(&tc, "aarch64", &["tp2"]);
        let err = a.merge(&b).unwrap_err();
        assert!(matches!(err, PipelineError::IdentityMismatch { .. }));
        assert_eq!(a.testplans(), vec!["tp1"]);
    }

    #[test]
    fn test_merge_with_own_copy() {
        let mut a = unit(&testcase("tc1"), "x86_64", &["tp1"]);
        let copy = a.clone();
        a.merge(&copy).unwrap();
        assert_eq!(a.testplans(), vec!["tp1"]);
    }

    #[test]
    fn test_copy_shares_running_for_but_not_result() {
        let original = unit(&testcase("tc1"), "x86_64", &["tp1", "tp2"]);
        let mut copy = original.clone();

        copy.update_result(&CaseResult::new(State::Running));
        copy.cancel("not needed", Some("tp1")).unwrap();

        assert_eq!(original.result().state(), State::NotStarted);
        assert_eq!(original.running_for().get("tp1"), Some(&false));
    }

    #[test]
    fn test_read_only_copy_is_detached() {
        let mut original = unit(&testcase("tc1"), "x86_64", &["tp1"]);
        let snapshot = original.read_only_copy();
        original.update_result(&CaseResult::finished(State::Complete, Verdict::Pass));

        assert_eq!(snapshot.result().state(), State::NotStarted);
        assert_eq!(snapshot.id(), original.id());
        assert!(snapshot.runs_for("tp1"));
    }

    #[test]
    fn test_cancel_after_poisoned_lock() {
        let mut crc = unit(&testcase("tc1"), "x86_64", &["tp1"]);
        let shared = Arc::clone(&crc.running_for);
        let poisoned = std::thread::spawn(move || {
            let _guard = lock(&shared);
            panic!("holder panicked");
        })
        .join();
        assert!(poisoned.is_err());

        assert!(crc.cancel("not needed", Some("tp1")).unwrap());
        assert_eq!(crc.running_for().get("tp1"), Some(&false));
    }

    #[test]
    fn test_snapshot_serializes_testcase_id() {
        let snapshot = unit(&testcase("tc1"), "x86_64", &["tp1"]).read_only_copy();
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["testcase"], "tc1");
        assert_eq!(json["configuration"]["arch"], "x86_64");
        assert_eq!(json["running_for"]["tp1"], true);
    }

    #[test]
    fn test_update_result_swallows_invalid_transition() {
        let mut crc = unit(&testcase("tc1"), "x86_64", &["tp1"]);
        crc.update_result(&CaseResult::finished(State::Complete, Verdict::Pass))
            .update_result(&CaseResult::did_not_finish());

        assert_eq!(crc.result().state(), State::Complete);
        assert_eq!(crc.result().verdict(), Verdict::Pass);
        assert!(crc.try_update_result(&CaseResult::did_not_finish()).is_err());
    }

    #[test]
    fn test_assign_workflow_once() {
        let mut crc = unit(&testcase("tc1"), "x86_64", &["tp1"]);
        let first = handle();
        crc.assign_workflow(&first).unwrap();
        crc.assign_workflow(&first).unwrap();

        let err = crc.assign_workflow(&handle()).unwrap_err();
        assert!(matches!(err, PipelineError::WorkflowReassigned(id) if &id == crc.id()));
        assert!(crc.workflow().unwrap().same(&first));
    }

    #[test]
    fn test_cancel_waits_for_every_plan() {
        let mut crc = unit(&testcase("tc1"), "x86_64", &["tp1", "tp2"]);
        crc.assign_workflow(&handle()).unwrap();

        assert!(!crc.cancel("tp1 dropped it", Some("tp1")).unwrap());
        assert!(!crc.result().is_final());

        assert!(crc.cancel("tp2 dropped it", Some("tp2")).unwrap());
        assert_eq!(crc.result().state(), State::Canceled);
        assert!(crc.result().is_final());
        assert_eq!(crc.result().message(), Some("tp2 dropped it"));
    }

    #[test]
    fn test_cancel_without_plan_cancels_for_all() {
        let mut crc = unit(&testcase("tc1"), "x86_64", &["tp1", "tp2"]);
        crc.assign_workflow(&handle()).unwrap();
        assert!(crc.cancel("abort", None).unwrap());
        assert!(!crc.is_wanted());
        assert_eq!(crc.result().state(), State::Canceled);
    }

    #[test]
    fn test_cancel_without_plans_is_unexpected() {
        let mut crc = CaseRunConfiguration::new(
            testcase("tc1"),
            Configuration::new(),
            std::iter::empty::<String>(),
        );
        let err = crc.cancel("abort", None).unwrap_err();
        assert!(matches!(err, PipelineError::UnexpectedState(_)));
    }

    #[test]
    fn test_aggregate_status_and_result() {
        let tc = testcase("tc1");
        let list: CaseRunConfigurationList = [
            unit(&tc, "x86_64", &["tp"])
                .with_result(CaseResult::with_verdict(State::Running, Verdict::Pass)),
            unit(&tc, "aarch64", &["tp"])
                .with_result(CaseResult::finished(State::Complete, Verdict::Fail)),
        ]
        .into_iter()
        .collect();

        assert_eq!(list.status(), Some(State::Running));
        assert_eq!(list.result(), Some(Verdict::Fail));
        assert_eq!(CaseRunConfigurationList::new().status(), None);
    }

    #[test]
    fn test_grouping() {
        let tc1 = Arc::new(TestCase::new("tc1", "one").with_execution("command"));
        let tc2 = testcase("tc2");
        let list: CaseRunConfigurationList = [
            unit(&tc1, "x86_64", &["tp1"]),
            unit(&tc1, "aarch64", &["tp1", "tp2"]),
            unit(&tc2, "x86_64", &["tp2"]),
        ]
        .into_iter()
        .collect();

        let by_testcase = list.by_testcase();
        assert_eq!(by_testcase["tc1"].len(), 2);
        assert_eq!(by_testcase["tc2"].len(), 1);

        let by_type = list.by_workflow_type();
        assert_eq!(by_type[&Some("command".to_string())].len(), 2);
        assert_eq!(by_type[&None].len(), 1);

        let by_arch = list.by_configuration(&["arch"]);
        assert_eq!(by_arch[&vec![Some(Scalar::from("x86_64"))]].len(), 2);

        let by_plan = list.by_testplan();
        assert_eq!(by_plan["tp1"].len(), 2);
        assert_eq!(by_plan["tp2"].len(), 2);
    }

    #[test]
    fn test_find_reports_missing_id() {
        let list = CaseRunConfigurationList::new();
        let missing = CrcId::compute("nope", &Configuration::new());
        let err = list.find(&missing).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("No caseRunConfiguration of id \"{}\" found", missing)
        );
    }
}
