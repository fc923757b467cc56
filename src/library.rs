//! Test library model consumed by the pipeline.
//!
//! The pipeline does not author or store test libraries; it only enumerates
//! test plans and, per plan, `(test case, configurations, merge method)`
//! entries through the [`Library`] trait. [`StaticLibrary`] is an in-memory
//! implementation loadable from TOML, used by the CLI and by tests.
//!
//! # TOML Format
//!
//! ```toml
//! [[testcases]]
//! id = "install-default"
//! name = "Default installation"
//! configurations = [{ arch = "x86_64" }, { arch = "aarch64" }]
//!
//! [testcases.execution]
//! type = "command"
//! data = { command = "./install.sh {{ event.compose.id }}" }
//!
//! [[testplans]]
//! id = "installer-gating"
//! name = "Installer gating"
//! artifact_type = "compose"
//! merge_method = "extension"
//! configurations = [{ variant = "server" }]
//! testcases = ["install-default"]
//!
//! [[testplans.reporting]]
//! type = "junit"
//! data = { path = "results/gating.xml" }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::configuration::Configuration;

/// How a test case is meant to be executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Workflow type handling the test case (e.g. `"command"`).
    #[serde(rename = "type")]
    pub kind: String,

    /// Workflow-specific data.
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// A single test definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique identifier within the library.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Declared execution. Test cases without one are manual.
    #[serde(default)]
    pub execution: Option<Execution>,

    /// Configurations the test case can run in.
    #[serde(default)]
    pub configurations: Vec<Configuration>,
}

impl TestCase {
    /// Creates a test case without execution or configurations.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            execution: None,
            configurations: Vec::new(),
        }
    }

    /// Sets the workflow type handling this test case.
    pub fn with_execution(mut self, kind: impl Into<String>) -> Self {
        self.execution = Some(Execution {
            kind: kind.into(),
            data: Map::new(),
        });
        self
    }

    /// Adds a value to the execution data. Requires an execution to be set.
    pub fn with_execution_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Some(execution) = self.execution.as_mut() {
            execution.data.insert(key.into(), value.into());
        }
        self
    }

    /// Adds a supported configuration.
    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configurations.push(configuration);
        self
    }

    /// Returns the declared workflow type, if any.
    pub fn execution_type(&self) -> Option<&str> {
        self.execution.as_ref().map(|e| e.kind.as_str())
    }
}

/// Reporting configuration bound to a test plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Report sender type (e.g. `"junit"`).
    #[serde(rename = "type")]
    pub kind: String,

    /// Sender-specific data.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ReportingConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A named grouping of desired test cases plus scoping configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    pub id: String,

    pub name: String,

    /// Event type this plan applies to. Plans without one apply to every event.
    #[serde(default)]
    pub artifact_type: Option<String>,

    /// Merge method name; settings provide the default when absent.
    #[serde(default)]
    pub merge_method: Option<String>,

    /// Plan-level configurations merged against each test case's configurations.
    #[serde(default)]
    pub configurations: Vec<Configuration>,

    /// Ids of the test cases verified by this plan.
    #[serde(default)]
    pub testcases: Vec<String>,

    #[serde(default)]
    pub reporting: Vec<ReportingConfig>,
}

impl TestPlan {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            artifact_type: None,
            merge_method: None,
            configurations: Vec::new(),
            testcases: Vec::new(),
            reporting: Vec::new(),
        }
    }

    pub fn with_artifact_type(mut self, artifact_type: impl Into<String>) -> Self {
        self.artifact_type = Some(artifact_type.into());
        self
    }

    pub fn with_merge_method(mut self, method: impl Into<String>) -> Self {
        self.merge_method = Some(method.into());
        self
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configurations.push(configuration);
        self
    }

    pub fn with_testcase(mut self, testcase_id: impl Into<String>) -> Self {
        self.testcases.push(testcase_id.into());
        self
    }

    pub fn with_reporting(mut self, reporting: ReportingConfig) -> Self {
        self.reporting.push(reporting);
        self
    }

    /// Returns whether this plan is relevant to an event of the given type.
    ///
    /// Matches when no artifact type is declared, or when the artifact type
    /// equals the event type or is one of its dot-separated prefixes.
    pub fn applies_to(&self, event_type: &str) -> bool {
        match &self.artifact_type {
            None => true,
            Some(artifact) => {
                event_type == artifact
                    || event_type
                        .strip_prefix(artifact.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            }
        }
    }
}

/// One `(test case, configurations, merge method)` triple of a test plan.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub testcase: Arc<TestCase>,
    /// Plan-level configurations applied to the test case.
    pub configurations: Vec<Configuration>,
    /// Merge method name, `None` to use the settings default.
    pub merge_method: Option<String>,
}

/// Source of test plans and test cases.
pub trait Library: Send + Sync {
    /// All test plans in the library.
    fn testplans(&self) -> Vec<Arc<TestPlan>>;

    /// Entries of the given plan.
    fn entries(&self, plan: &TestPlan) -> Vec<PlanEntry>;

    /// Looks up a test plan by id.
    fn testplan(&self, id: &str) -> Option<Arc<TestPlan>> {
        self.testplans().into_iter().find(|plan| plan.id == id)
    }
}

#[derive(Debug, Default, Deserialize)]
struct LibraryDocument {
    #[serde(default)]
    testcases: Vec<TestCase>,
    #[serde(default)]
    testplans: Vec<TestPlan>,
}

/// In-memory library.
#[derive(Debug, Clone, Default)]
pub struct StaticLibrary {
    testcases: BTreeMap<String, Arc<TestCase>>,
    testplans: Vec<Arc<TestPlan>>,
}

impl StaticLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a library from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid library.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read library file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse library file: {}", path.display()))
    }

    /// Parses a library from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let document: LibraryDocument =
            toml::from_str(content).context("Failed to parse library")?;
        Ok(document
            .testcases
            .into_iter()
            .fold(Self::new(), Self::with_testcase)
            .with_testplans(document.testplans))
    }

    pub fn with_testcase(mut self, testcase: TestCase) -> Self {
        self.testcases
            .insert(testcase.id.clone(), Arc::new(testcase));
        self
    }

    pub fn with_testplan(mut self, testplan: TestPlan) -> Self {
        self.testplans.push(Arc::new(testplan));
        self
    }

    fn with_testplans(self, testplans: Vec<TestPlan>) -> Self {
        testplans.into_iter().fold(self, Self::with_testplan)
    }

    pub fn testcase(&self, id: &str) -> Option<Arc<TestCase>> {
        self.testcases.get(id).cloned()
    }

    pub fn testcase_count(&self) -> usize {
        self.testcases.len()
    }
}

impl Library for StaticLibrary {
    fn testplans(&self) -> Vec<Arc<TestPlan>> {
        self.testplans.clone()
    }

    fn entries(&self, plan: &TestPlan) -> Vec<PlanEntry> {
        plan.testcases
            .iter()
            .filter_map(|id| {
                let testcase = self.testcase(id);
                if testcase.is_none() {
                    warn!("Test plan {:?} references unknown test case {:?}", plan.id, id);
                }
                testcase
            })
            .map(|testcase| PlanEntry {
                testcase,
                configurations: plan.configurations.clone(),
                merge_method: plan.merge_method.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIBRARY: &str = r#"
        [[testcases]]
        id = "tc1"
        name = "testcase 1"
        configurations = [{ arch = "x86_64" }, { arch = "aarch64" }]

        [testcases.execution]
        type = "command"
        data = { command = "true" }

        [[testcases]]
        id = "tc2"
        name = "testcase 2"

        [[testplans]]
        id = "tp1"
        name = "testplan 1"
        artifact_type = "compose"
        merge_method = "extension"
        testcases = ["tc1", "tc2", "missing"]

        [[testplans.reporting]]
        type = "junit"
        data = { path = "out.xml" }
    "#;

    #[test]
    fn test_load_from_toml() {
        let library = StaticLibrary::from_toml(LIBRARY).unwrap();
        assert_eq!(library.testcase_count(), 2);

        let tc1 = library.testcase("tc1").unwrap();
        assert_eq!(tc1.execution_type(), Some("command"));
        assert_eq!(tc1.configurations.len(), 2);
        assert_eq!(library.testcase("tc2").unwrap().execution_type(), None);

        let plan = library.testplan("tp1").unwrap();
        assert_eq!(plan.merge_method.as_deref(), Some("extension"));
        assert_eq!(plan.reporting[0].kind, "junit");
        assert_eq!(plan.reporting[0].data["path"], "out.xml");
    }

    #[test]
    fn test_entries_skip_unknown_testcases() {
        let library = StaticLibrary::from_toml(LIBRARY).unwrap();
        let plan = library.testplan("tp1").unwrap();
        let entries = library.entries(&plan);

        let ids: Vec<_> = entries.iter().map(|e| e.testcase.id.as_str()).collect();
        assert_eq!(ids, vec!["tc1", "tc2"]);
        assert_eq!(entries[0].merge_method.as_deref(), Some("extension"));
    }

    #[test]
    fn test_applies_to_prefixes() {
        let plan = TestPlan::new("tp", "tp").with_artifact_type("koji.build");
        assert!(plan.applies_to("koji.build"));
        assert!(plan.applies_to("koji.build.tag"));
        assert!(!plan.applies_to("koji.buildroot"));
        assert!(!plan.applies_to("koji"));
        assert!(TestPlan::new("any", "any").applies_to("whatever"));
    }

    #[test]
    fn test_invalid_library() {
        assert!(StaticLibrary::from_toml("[[testcases]]\nname = 1").is_err());
    }
}
