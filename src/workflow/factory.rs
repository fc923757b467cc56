//! Workflow registry and assignment.
//!
//! A [`WorkflowClass`] is the class-level constructor of a workflow type: it
//! receives every unit declaring that type, partitions them by its own
//! policy and creates one [`WorkflowHandle`] per partition. Two shapes cover
//! most back-ends:
//!
//! | Shape | Partitioning | Instances |
//! |-------|--------------|-----------|
//! | [`Isolated`] | one unit per group | one per unit |
//! | [`Grouped`] | caller-defined key | one per key |
//!
//! [`WorkflowFactory::assign`] resolves each unit's declared execution type
//! through the [`WorkflowRegistry`]:
//!
//! - no execution declared: `manual`
//! - type not registered: `unknown`
//!
//! and fails with [`PipelineError::UnexpectedState`] if any unit is left
//! without a workflow.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use super::builtin::{ManualWorkflow, UnknownWorkflow};
use super::command::CommandWorkflow;
use super::{RunContext, Workflow, WorkflowHandle};
use crate::caserun::{CaseRunConfiguration, CaseRunConfigurationList};
use crate::error::{PipelineError, PipelineResult};

/// Workflow type used for test cases without a declared execution.
pub const MANUAL: &str = "manual";

/// Workflow type used for declared but unregistered execution types.
pub const UNKNOWN: &str = "unknown";

/// Class-level constructor of a workflow type.
pub trait WorkflowClass: Send + Sync {
    /// Creates workflow instances for `units` and assigns each unit to one.
    ///
    /// `kind` is the registry name the class was resolved under.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WorkflowReassigned`] if a unit already has a
    /// different workflow.
    fn factory(
        &self,
        kind: &str,
        units: &mut [&mut CaseRunConfiguration],
        run: &RunContext,
    ) -> PipelineResult<()>;
}

/// One workflow instance per unit.
pub struct Isolated<F> {
    ctor: F,
}

impl<F> Isolated<F>
where
    F: Fn(&CaseRunConfiguration, &RunContext) -> Arc<dyn Workflow> + Send + Sync,
{
    pub fn new(ctor: F) -> Self {
        Self { ctor }
    }
}

impl<F> WorkflowClass for Isolated<F>
where
    F: Fn(&CaseRunConfiguration, &RunContext) -> Arc<dyn Workflow> + Send + Sync,
{
    fn factory(
        &self,
        kind: &str,
        units: &mut [&mut CaseRunConfiguration],
        run: &RunContext,
    ) -> PipelineResult<()> {
        for unit in units.iter_mut() {
            let handle = WorkflowHandle::new(kind, (self.ctor)(&**unit, run));
            handle.claim(std::slice::from_mut(unit))?;
        }
        Ok(())
    }
}

/// One workflow instance per group of units sharing a key.
pub struct Grouped<K, F> {
    key: K,
    ctor: F,
}

/// Key function of [`Grouped::all`].
pub type GroupKey = fn(&CaseRunConfiguration) -> String;

fn single_group(_: &CaseRunConfiguration) -> String {
    String::new()
}

impl<K, F> Grouped<K, F>
where
    K: Fn(&CaseRunConfiguration) -> String + Send + Sync,
    F: Fn(&[&mut CaseRunConfiguration], &RunContext) -> Arc<dyn Workflow> + Send + Sync,
{
    /// Groups units by the value of `key`.
    pub fn new(key: K, ctor: F) -> Self {
        Self { key, ctor }
    }
}

impl<F> Grouped<GroupKey, F>
where
    F: Fn(&[&mut CaseRunConfiguration], &RunContext) -> Arc<dyn Workflow> + Send + Sync,
{
    /// Puts every unit in a single group.
    pub fn all(ctor: F) -> Self {
        Self {
            key: single_group,
            ctor,
        }
    }
}

impl<K, F> WorkflowClass for Grouped<K, F>
where
    K: Fn(&CaseRunConfiguration) -> String + Send + Sync,
    F: Fn(&[&mut CaseRunConfiguration], &RunContext) -> Arc<dyn Workflow> + Send + Sync,
{
    fn factory(
        &self,
        kind: &str,
        units: &mut [&mut CaseRunConfiguration],
        run: &RunContext,
    ) -> PipelineResult<()> {
        let mut groups: BTreeMap<String, Vec<&mut CaseRunConfiguration>> = BTreeMap::new();
        for unit in units.iter_mut() {
            let key = (self.key)(&**unit);
            groups.entry(key).or_default().push(&mut **unit);
        }

        for (key, mut group) in groups {
            debug!("Creating {} workflow for group {:?} of {} unit(s)", kind, key, group.len());
            let handle = WorkflowHandle::new(kind, (self.ctor)(group.as_slice(), run));
            handle.claim(&mut group)?;
        }
        Ok(())
    }
}

/// Name -> workflow class table, built once at startup.
#[derive(Clone)]
pub struct WorkflowRegistry {
    classes: HashMap<String, Arc<dyn WorkflowClass>>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    /// Creates a registry holding only the `manual` and `unknown` fallbacks.
    pub fn new() -> Self {
        Self {
            classes: HashMap::new(),
        }
        .register(MANUAL, Grouped::all(ManualWorkflow::create))
        .register(UNKNOWN, Isolated::new(UnknownWorkflow::create))
    }

    /// Creates a registry with every workflow shipped in this crate.
    pub fn with_builtins() -> Self {
        Self::new().register("command", Isolated::new(CommandWorkflow::create))
    }

    /// Registers `class` under `name`, replacing any previous entry.
    pub fn register(mut self, name: impl Into<String>, class: impl WorkflowClass + 'static) -> Self {
        self.classes.insert(name.into(), Arc::new(class));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn WorkflowClass>> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.classes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Assigns workflows to the units of a run.
#[derive(Clone, Default)]
pub struct WorkflowFactory {
    registry: WorkflowRegistry,
}

impl WorkflowFactory {
    pub fn new(registry: WorkflowRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Registry name handling a unit with the declared execution type `declared`.
    pub fn resolve<'a>(&'a self, declared: Option<&'a str>) -> &'a str {
        match declared {
            None => MANUAL,
            Some(kind) if self.registry.contains(kind) => kind,
            Some(kind) => {
                debug!("Workflow type {:?} is not registered", kind);
                UNKNOWN
            }
        }
    }

    /// Groups `units` by workflow type and lets each type's class create
    /// and assign its instances.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnexpectedState`] when a unit is left
    /// without a workflow, and propagates errors from workflow classes.
    pub fn assign(
        &self,
        units: &mut CaseRunConfigurationList,
        run: &RunContext,
    ) -> PipelineResult<()> {
        let mut groups: BTreeMap<String, Vec<&mut CaseRunConfiguration>> = BTreeMap::new();
        for unit in units.iter_mut() {
            let kind = self.resolve(unit.testcase().execution_type()).to_string();
            groups.entry(kind).or_default().push(unit);
        }

        for (kind, mut group) in groups {
            let class = self.registry.get(&kind).ok_or_else(|| {
                PipelineError::UnexpectedState(format!("workflow type {:?} is not registered", kind))
            })?;
            debug!("Assigning {} unit(s) to {} workflows", group.len(), kind);
            class.factory(&kind, &mut group, run)?;
        }

        let unassigned: Vec<String> = units
            .iter()
            .filter(|unit| unit.workflow().is_none())
            .map(ToString::to_string)
            .collect();
        if !unassigned.is_empty() {
            return Err(PipelineError::UnexpectedState(format!(
                "no workflow assigned to {}",
                unassigned.join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Configuration;
    use crate::event::{EventData, GenericEvent};
    use crate::library::TestCase;
    use crate::settings::Settings;
    use std::collections::HashSet;

    struct Noop;

    impl WorkflowClass for Noop {
        fn factory(
            &self,
            _kind: &str,
            _units: &mut [&mut CaseRunConfiguration],
            _run: &RunContext,
        ) -> PipelineResult<()> {
            Ok(())
        }
    }

    fn run_context() -> RunContext {
        RunContext::new(
            Arc::new(GenericEvent::new("test", EventData::new("test"))),
            Arc::new(Settings::default()),
        )
    }

    fn units(kind: Option<&str>, arches: &[&str]) -> Vec<CaseRunConfiguration> {
        let mut testcase = TestCase::new(format!("tc-{:?}", kind), "testcase");
        if let Some(kind) = kind {
            testcase = testcase.with_execution(kind);
        }
        let testcase = Arc::new(testcase);
        arches
            .iter()
            .map(|arch| {
                CaseRunConfiguration::new(
                    Arc::clone(&testcase),
                    Configuration::new().with("arch", *arch),
                    ["tp1"],
                )
            })
            .collect()
    }

    fn distinct_handles(list: &CaseRunConfigurationList) -> usize {
        list.iter()
            .filter_map(|unit| unit.workflow().map(WorkflowHandle::id))
            .collect::<HashSet<_>>()
            .len()
    }

    #[test]
    fn test_resolve_fallbacks() {
        let factory = WorkflowFactory::new(WorkflowRegistry::with_builtins());
        assert_eq!(factory.resolve(None), MANUAL);
        assert_eq!(factory.resolve(Some("command")), "command");
        assert_eq!(factory.resolve(Some("beaker")), UNKNOWN);
    }

    #[test]
    fn test_every_unit_gets_a_workflow() {
        let factory = WorkflowFactory::new(WorkflowRegistry::with_builtins());
        let mut list: CaseRunConfigurationList = units(None, &["a", "b"])
            .into_iter()
            .chain(units(Some("beaker"), &["a"]))
            .chain(units(Some("command"), &["a", "b"]))
            .collect();

        factory.assign(&mut list, &run_context()).unwrap();

        assert!(list.iter().all(|unit| unit.workflow().is_some()));
        let types: Vec<&str> = list
            .iter()
            .map(|unit| unit.workflow().unwrap().workflow_type())
            .collect();
        assert_eq!(types, vec![MANUAL, MANUAL, UNKNOWN, "command", "command"]);
        // one grouped manual instance, one unknown, two isolated command instances
        assert_eq!(distinct_handles(&list), 4);
    }

    #[test]
    fn test_unassigned_units_are_unexpected() {
        let factory = WorkflowFactory::new(WorkflowRegistry::new().register("noop", Noop));
        let mut list: CaseRunConfigurationList = units(Some("noop"), &["a"])
            .into_iter()
            .chain(units(None, &["a"]))
            .collect();

        let err = factory.assign(&mut list, &run_context()).unwrap_err();
        assert!(matches!(err, PipelineError::UnexpectedState(_)));
        assert!(list.iter().all(|unit| !unit.workflow().is_some_and(WorkflowHandle::is_started)));
    }

    #[test]
    fn test_grouped_by_configuration_key() {
        let registry = WorkflowRegistry::new().register(
            "grouped",
            Grouped::new(
                |unit: &CaseRunConfiguration| {
                    unit.configuration()
                        .get("arch")
                        .map(ToString::to_string)
                        .unwrap_or_default()
                },
                |_units: &[&mut CaseRunConfiguration], _run: &RunContext| -> Arc<dyn Workflow> {
                    Arc::new(ManualWorkflow)
                },
            ),
        );
        let factory = WorkflowFactory::new(registry);

        let testcase = Arc::new(TestCase::new("tc", "tc").with_execution("grouped"));
        let mut list: CaseRunConfigurationList = [
            ("x86_64", "server"),
            ("x86_64", "workstation"),
            ("aarch64", "server"),
        ]
        .into_iter()
        .map(|(arch, variant)| {
            CaseRunConfiguration::new(
                Arc::clone(&testcase),
                Configuration::new().with("arch", arch).with("variant", variant),
                ["tp1"],
            )
        })
        .collect();

        factory.assign(&mut list, &run_context()).unwrap();
        assert_eq!(distinct_handles(&list), 2);

        let by_arch = list.by_configuration(&["arch"]);
        for group in by_arch.values() {
            let first = group[0].workflow().unwrap();
            assert!(group.iter().all(|unit| unit.workflow().unwrap().same(first)));
            assert_eq!(first.members().len(), group.len());
        }
    }
}
