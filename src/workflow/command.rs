//! Local shell command workflow.
//!
//! Runs a test case's `execution.data.command` as a child process on the
//! local machine, one instance per case-run-configuration.
//!
//! # Characteristics
//!
//! | Feature | Support |
//! |---------|---------|
//! | Isolation | None (shared filesystem and network) |
//! | Templates | `{{ event.* }}` placeholders rendered from the event |
//! | Timeout | `commandWorkflow.timeout` seconds, or `data.timeout` |
//! | Cancellation | Child process is killed |
//!
//! # Example Test Case
//!
//! ```toml
//! [[testcases]]
//! id = "smoke"
//! name = "Smoke test"
//! configurations = [{ arch = "x86_64" }]
//!
//! [testcases.execution]
//! type = "command"
//! data = { command = "./smoke.sh {{ event.build.nvr }}", cwd = "tests", timeout = 60 }
//! ```
//!
//! The process sees the unit through its environment:
//!
//! | Variable | Value |
//! |----------|-------|
//! | `PIPELINE_TESTCASE` | test case id |
//! | `PIPELINE_CRC_ID` | case-run-configuration id |
//! | `PIPELINE_CONFIG_<KEY>` | one per configuration key, upper-cased |
//!
//! Exit code 0 completes the unit as `PASS`, any other code as `FAIL`.
//! Spawn failures, template errors and timeouts end it as `DNF`/`ERROR`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::select;
use tracing::{debug, info, warn};

use super::{RunContext, Workflow, WorkflowContext};
use crate::caserun::{CaseRunConfiguration, lock};
use crate::result::{CaseResult, State, Verdict};

const DEFAULT_SHELL: &str = "/bin/sh";
const DEFAULT_TIMEOUT_SECS: u64 = 900;

/// Workflow running a shell command per unit.
pub struct CommandWorkflow {
    command: Option<String>,
    cwd: Option<PathBuf>,
    timeout: Option<u64>,
    status: Mutex<String>,
}

impl CommandWorkflow {
    /// Creates a workflow running `command`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            cwd: None,
            timeout: None,
            status: Mutex::new("not started".to_string()),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Overrides the `commandWorkflow.timeout` setting.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub(crate) fn create(unit: &CaseRunConfiguration, _run: &RunContext) -> Arc<dyn Workflow> {
        let data = unit.testcase().execution.as_ref().map(|execution| &execution.data);
        let field = |key: &str| data.and_then(|data| data.get(key));

        Arc::new(Self {
            command: field("command").and_then(|v| v.as_str()).map(str::to_string),
            cwd: field("cwd").and_then(|v| v.as_str()).map(PathBuf::from),
            timeout: field("timeout").and_then(|v| v.as_u64()),
            status: Mutex::new("not started".to_string()),
        })
    }

    fn set_status(&self, status: impl Into<String>) {
        *lock(&self.status) = status.into();
    }

    fn timeout(&self, ctx: &WorkflowContext) -> Duration {
        let secs = self.timeout.unwrap_or_else(|| {
            ctx.settings()
                .get_integer("commandWorkflow", "timeout")
                .and_then(|secs| u64::try_from(secs).ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS)
        });
        Duration::from_secs(secs)
    }

    async fn run_unit(&self, unit: &CaseRunConfiguration, ctx: &WorkflowContext) -> CaseResult {
        let Some(template) = &self.command else {
            return error_result("No command given in execution data");
        };
        let command = match ctx.event().render(template) {
            Ok(command) => command,
            Err(e) => return error_result(e.to_string()),
        };

        let shell = ctx
            .settings()
            .get_str("commandWorkflow", "shell")
            .unwrap_or(DEFAULT_SHELL);

        let mut process = tokio::process::Command::new(shell);
        process.arg("-c").arg(&command);
        process.env("PIPELINE_TESTCASE", &unit.testcase().id);
        process.env("PIPELINE_CRC_ID", unit.id().as_str());
        for (key, value) in unit.configuration().iter() {
            process.env(format!("PIPELINE_CONFIG_{}", key.to_uppercase()), value.to_string());
        }
        if let Some(cwd) = &self.cwd {
            process.current_dir(cwd);
        }
        process.stdin(Stdio::null());
        process.stdout(Stdio::piped());
        process.stderr(Stdio::piped());
        process.kill_on_drop(true);

        let child = match process.spawn() {
            Ok(child) => child,
            Err(e) => return error_result(format!("Failed to spawn {:?}: {}", shell, e)),
        };

        ctx.report(unit, CaseResult::new(State::Running));
        self.set_status(format!("running: {}", command));
        debug!("Running {} for {}", command, unit);

        let timeout = self.timeout(ctx);
        select! {
            _ = ctx.cancellation().cancelled() => {
                info!("Command for {} canceled", unit);
                CaseResult::finished(State::Canceled, Verdict::Unset)
                    .with_message("Command killed on cancel")
            }
            _ = tokio::time::sleep(timeout) => {
                warn!("Command for {} timed out after {:?}", unit, timeout);
                error_result(format!("Command timed out after {}s", timeout.as_secs()))
            }
            output = child.wait_with_output() => match output {
                Ok(output) if output.status.success() => {
                    CaseResult::finished(State::Complete, Verdict::Pass)
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let mut message = match output.status.code() {
                        Some(code) => format!("Command exited with code {}", code),
                        None => "Command terminated by signal".to_string(),
                    };
                    if let Some(line) = stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                        message.push_str(": ");
                        message.push_str(line.trim());
                    }
                    CaseResult::finished(State::Complete, Verdict::Fail).with_message(message)
                }
                Err(e) => error_result(format!("Failed to wait for command: {}", e)),
            },
        }
    }
}

fn error_result(message: impl Into<String>) -> CaseResult {
    CaseResult::finished(State::Dnf, Verdict::Error).with_message(message)
}

#[async_trait]
impl Workflow for CommandWorkflow {
    async fn execute(
        &self,
        units: Vec<CaseRunConfiguration>,
        ctx: WorkflowContext,
    ) -> anyhow::Result<()> {
        for unit in &units {
            if ctx.is_cancelled() {
                break;
            }
            let result = self.run_unit(unit, &ctx).await;
            self.set_status(result.to_string());
            ctx.report(unit, result);
        }
        Ok(())
    }

    fn display_status(&self) -> String {
        lock(&self.status).clone()
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

    fn run_context(settings: Settings) -> RunContext {
        let data = EventData::new("compose.finished").with_attribute("compose", serde_json::json!({"id": "C-1"}));
        RunContext::new(
            Arc::new(GenericEvent::new("compose", data)),
            Arc::new(settings),
        )
    }

    fn unit(command: &str) -> CaseRunConfiguration {
        CaseRunConfiguration::new(
            Arc::new(
                TestCase::new("tc1", "testcase 1")
                    .with_execution("command")
                    .with_execution_data("command", command),
            ),
            Configuration::new().with("arch", "x86_64"),
            ["tp1"],
        )
    }

    async fn run(unit: CaseRunConfiguration, settings: Settings) -> Vec<CaseResult> {
        let run = run_context(settings);
        let handle = WorkflowHandle::new("command", CommandWorkflow::create(&unit, &run));
        let (sink, mut rx) = ResultSink::channel();
        handle.start(vec![unit], run, sink);
        handle.join().await;

        let mut results = Vec::new();
        while let Ok(update) = rx.try_recv() {
            results.push(update.result().clone());
        }
        results
    }

    #[tokio::test]
    async fn test_exit_zero_passes() {
        let results = run(unit("exit 0"), Settings::default()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].state(), State::Running);
        assert_eq!(results[1], CaseResult::finished(State::Complete, Verdict::Pass));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let results = run(unit("echo broken >&2; exit 3"), Settings::default()).await;
        let last = results.last().unwrap();
        assert_eq!(last.verdict(), Verdict::Fail);
        assert_eq!(last.message(), Some("Command exited with code 3: broken"));
    }

    #[tokio::test]
    async fn test_renders_event_and_exports_configuration() {
        let command = r#"test "{{ event.compose.id }}" = C-1 && test "$PIPELINE_CONFIG_ARCH" = x86_64 && test "$PIPELINE_TESTCASE" = tc1"#;
        let results = run(unit(command), Settings::default()).await;
        assert_eq!(results.last().unwrap().verdict(), Verdict::Pass);
    }

    #[tokio::test]
    async fn test_template_error_is_reported() {
        let results = run(unit("echo {{ event.missing }}"), Settings::default()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state(), State::Dnf);
        assert_eq!(results[0].verdict(), Verdict::Error);
    }

    #[tokio::test]
    async fn test_timeout() {
        let settings = Settings::default().with("commandWorkflow", "timeout", 1_i64);
        let results = run(unit("sleep 10"), settings).await;
        let last = results.last().unwrap();
        assert_eq!(last.verdict(), Verdict::Error);
        assert!(last.message().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_shell() {
        let settings = Settings::default().with("commandWorkflow", "shell", "/nonexistent/shell");
        let results = run(unit("exit 0"), settings).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].verdict(), Verdict::Error);
    }

    #[tokio::test]
    async fn test_terminate_kills_command() {
        let unit = unit("sleep 30");
        let run = run_context(Settings::default());
        let handle = WorkflowHandle::new("command", CommandWorkflow::create(&unit, &run));
        let (sink, mut rx) = ResultSink::channel();
        handle.start(vec![unit], run, sink);

        assert_eq!(rx.recv().await.unwrap().result().state(), State::Running);
        handle.terminate();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();

        let last = rx.recv().await.unwrap();
        assert_eq!(last.result().state(), State::Canceled);
    }
}
