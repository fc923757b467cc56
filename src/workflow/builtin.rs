//! Fallback workflows every registry carries.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{RunContext, Workflow, WorkflowContext};
use crate::caserun::CaseRunConfiguration;
use crate::result::{CaseResult, State, Verdict};

/// Placeholder for test cases that declare an unregistered execution type.
///
/// Finishes its unit immediately as `DNF`/`ERROR`.
#[derive(Debug, Clone)]
pub struct UnknownWorkflow {
    declared: String,
}

impl UnknownWorkflow {
    pub fn new(declared: impl Into<String>) -> Self {
        Self {
            declared: declared.into(),
        }
    }

    pub(crate) fn create(unit: &CaseRunConfiguration, _run: &RunContext) -> Arc<dyn Workflow> {
        Arc::new(Self::new(unit.testcase().execution_type().unwrap_or_default()))
    }
}

#[async_trait]
impl Workflow for UnknownWorkflow {
    async fn execute(
        &self,
        units: Vec<CaseRunConfiguration>,
        ctx: WorkflowContext,
    ) -> anyhow::Result<()> {
        for unit in &units {
            warn!("No workflow registered for {:?}, cannot run {}", self.declared, unit);
            ctx.report(
                unit,
                CaseResult::finished(State::Dnf, Verdict::Error)
                    .with_message(format!("Unknown workflow type {:?}", self.declared)),
            );
        }
        Ok(())
    }

    fn display_status(&self) -> String {
        format!("unknown workflow type {:?}", self.declared)
    }
}

/// Placeholder for test cases without a declared execution.
///
/// Nothing runs them automatically, so their units end as `DNF` without a
/// verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualWorkflow;

impl ManualWorkflow {
    pub(crate) fn create(_units: &[&mut CaseRunConfiguration], _run: &RunContext) -> Arc<dyn Workflow> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Workflow for ManualWorkflow {
    async fn execute(
        &self,
        units: Vec<CaseRunConfiguration>,
        ctx: WorkflowContext,
    ) -> anyhow::Result<()> {
        for unit in &units {
            ctx.report(
                unit,
                CaseResult::finished(State::Dnf, Verdict::Unset)
                    .with_message("Manual test case, not executed automatically"),
            );
        }
        Ok(())
    }

    fn display_status(&self) -> String {
        "manual".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Configuration;
    use crate::event::{EventData, GenericEvent};
    use crate::library::TestCase;
    use crate::settings::Settings;
    use crate::workflow::{ResultSink, WorkflowHandle};

    fn run_context() -> RunContext {
        RunContext::new(
            Arc::new(GenericEvent::new("test", EventData::new("test"))),
            Arc::new(Settings::default()),
        )
    }

    #[tokio::test]
    async fn test_unknown_reports_error() {
        let unit = CaseRunConfiguration::new(
            Arc::new(TestCase::new("tc", "tc").with_execution("beaker")),
            Configuration::new(),
            ["tp"],
        );
        let handle = WorkflowHandle::new("unknown", UnknownWorkflow::create(&unit, &run_context()));
        let (sink, mut rx) = ResultSink::channel();
        handle.start(vec![unit], run_context(), sink);
        handle.join().await;

        let update = rx.recv().await.unwrap();
        assert_eq!(update.result().state(), State::Dnf);
        assert_eq!(update.result().verdict(), Verdict::Error);
        assert!(update.result().message().unwrap().contains("beaker"));
    }

    #[tokio::test]
    async fn test_manual_reports_unset() {
        let units: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|arch| {
                CaseRunConfiguration::new(
                    Arc::new(TestCase::new("tc", "tc")),
                    Configuration::new().with("arch", arch),
                    ["tp"],
                )
            })
            .collect();
        let handle = WorkflowHandle::new("manual", Arc::new(ManualWorkflow));
        let (sink, mut rx) = ResultSink::channel();
        handle.start(units, run_context(), sink);
        handle.join().await;

        for _ in 0..2 {
            let update = rx.recv().await.unwrap();
            assert_eq!(update.result().verdict(), Verdict::Unset);
            assert!(update.result().is_final());
        }
    }
}
