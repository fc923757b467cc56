//! Events: why a test run happens.
//!
//! An event has a dot-separated hierarchical `type` (e.g. `koji.build.tag`)
//! and an open bag of attributes. It decides which case-run-configurations
//! a run contains through
//! [`Event::generate_case_run_configurations`]; the default implementation
//! walks every test plan relevant to the event type:
//!
//! ```text
//!   for plan in library.testplans() where plan.applies_to(event.type):
//!       for (testcase, plan configurations, merge method) in plan:
//!           for configuration in merge(plan configurations, testcase configurations):
//!               list.push(CaseRunConfiguration(testcase, configuration, [plan]))
//! ```
//!
//! Identical units from different plans collapse on push, so the list ends
//! up with one unit per `(testcase, configuration)` listing every plan.
//!
//! # Templates
//!
//! [`Event::render`] substitutes `{{ event.<path> }}` placeholders, where the
//! path is evaluated against `{"type": ..., <attributes>}`:
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `{{ event.type }}` | the event type |
//! | `{{ event.build.nvr }}` | nested object field |
//! | `{{ event.tags[0] }}` | array element |
//! | `{{ event.labels["os-release"] }}` | field with a non-identifier name |
//!
//! Strings are inserted verbatim, other values as JSON.

pub mod factory;

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::caserun::{CaseRunConfiguration, CaseRunConfigurationList};
use crate::configuration::ConfigurationList;
use crate::error::{PipelineError, PipelineResult};
use crate::library::Library;
use crate::settings::Settings;

pub use factory::{EventFactory, EventRegistry};

/// Merge method used when neither the plan nor the settings name one.
pub const DEFAULT_MERGE_METHOD: &str = "intersection";

/// Type and attributes of an event, as received on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    event_type: String,
    attributes: Map<String, Value>,
}

impl EventData {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            attributes: Map::new(),
        }
    }

    /// Creates event data from a type and the remaining wire fields.
    pub fn with_attributes(event_type: impl Into<String>, attributes: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            attributes,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// The object templates are evaluated against.
    pub fn to_value(&self) -> Value {
        let mut object = self.attributes.clone();
        object.insert("type".to_string(), Value::String(self.event_type.clone()));
        Value::Object(object)
    }

    /// Renders `{{ event.<path> }}` placeholders in `template`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Template`] when a path is malformed or does
    /// not resolve.
    pub fn render(&self, template: &str) -> PipelineResult<String> {
        let root = self.to_value();

        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;
        for captures in PLACEHOLDER_REGEX.captures_iter(template) {
            let (Some(whole), Some(path)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            rendered.push_str(&template[last..whole.start()]);
            let value = lookup(&root, path.as_str())?;
            match value {
                Value::String(s) => rendered.push_str(s),
                other => rendered.push_str(&other.to_string()),
            }
            last = whole.end();
        }
        rendered.push_str(&template[last..]);
        Ok(rendered)
    }
}

/// `{{ event<path> }}`, capturing the path.
static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*event((?:\.[^\s}\[]+|\[[^\]]*\])*)\s*\}\}").expect("Invalid regex")
});

/// One leading `.key`, `[0]`, `["key"]` or `['key']` segment of a path.
static SEGMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?:\.([A-Za-z_][A-Za-z0-9_-]*)|\[\s*(\d+)\s*\]|\[\s*"([^"]*)"\s*\]|\[\s*'([^']*)'\s*\])"#,
    )
    .expect("Invalid regex")
});

#[derive(Debug, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> PipelineResult<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = path;
    while !rest.is_empty() {
        let captures = SEGMENT_REGEX
            .captures(rest)
            .ok_or_else(|| PipelineError::Template(format!("invalid path event{}", path)))?;
        let parsed = if let Some(key) = captures.get(1).or(captures.get(3)).or(captures.get(4)) {
            Segment::Key(key.as_str().to_string())
        } else if let Some(index) = captures.get(2) {
            let index = index
                .as_str()
                .parse()
                .map_err(|_| PipelineError::Template(format!("invalid index in event{}", path)))?;
            Segment::Index(index)
        } else {
            return Err(PipelineError::Template(format!("invalid path event{}", path)));
        };
        segments.push(parsed);
        let consumed = captures.get(0).map_or(rest.len(), |m| m.end());
        rest = &rest[consumed..];
    }
    Ok(segments)
}

fn lookup<'a>(root: &'a Value, path: &str) -> PipelineResult<&'a Value> {
    let mut current = root;
    for segment in parse_path(path)? {
        let next = match (&segment, current) {
            (Segment::Key(key), Value::Object(object)) => object.get(key),
            (Segment::Index(index), Value::Array(items)) => items.get(*index),
            _ => None,
        };
        current = next.ok_or_else(|| {
            PipelineError::Template(format!("event{} is not defined", path))
        })?;
    }
    Ok(current)
}

/// A typed trigger of a test run.
pub trait Event: Send + Sync + fmt::Debug {
    /// Name of the registered variant that produced this event.
    fn variant(&self) -> &str;

    fn data(&self) -> &EventData;

    fn event_type(&self) -> &str {
        self.data().event_type()
    }

    /// See [`EventData::render`].
    fn render(&self, template: &str) -> PipelineResult<String> {
        self.data().render(template)
    }

    /// Builds the units of a run triggered by this event.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownMergeMethod`] when a plan or the
    /// settings name an unknown merge method.
    fn generate_case_run_configurations(
        &self,
        library: &dyn Library,
        settings: &Settings,
    ) -> PipelineResult<CaseRunConfigurationList> {
        generate_case_run_configurations(self.event_type(), library, settings)
    }
}

/// Default unit generation shared by the built-in event variants.
///
/// # Errors
///
/// Returns [`PipelineError::UnknownMergeMethod`] when a plan or the settings
/// name an unknown merge method.
pub fn generate_case_run_configurations(
    event_type: &str,
    library: &dyn Library,
    settings: &Settings,
) -> PipelineResult<CaseRunConfigurationList> {
    let default_method = settings
        .get_str("library", "defaultCaseConfigMergeMethod")
        .unwrap_or(DEFAULT_MERGE_METHOD);

    let mut list = CaseRunConfigurationList::new();
    for plan in library.testplans() {
        if !plan.applies_to(event_type) {
            debug!("Test plan {:?} does not apply to {:?}", plan.id, event_type);
            continue;
        }
        for entry in library.entries(&plan) {
            let method = entry.merge_method.as_deref().unwrap_or(default_method);
            let plan_configurations =
                ConfigurationList::with_method_name(entry.configurations, method)?;
            for configuration in plan_configurations.merge(&entry.testcase.configurations) {
                list.push(CaseRunConfiguration::new(
                    Arc::clone(&entry.testcase),
                    configuration,
                    [plan.id.as_str()],
                ));
            }
        }
    }
    debug!("Event {:?} yields {} case-run-configuration(s)", event_type, list.len());
    Ok(list)
}

/// Event of a registered type without specialised behaviour.
#[derive(Debug, Clone)]
pub struct GenericEvent {
    variant: String,
    data: EventData,
}

impl GenericEvent {
    /// Creates an event resolved through the registry entry `variant`.
    pub fn new(variant: impl Into<String>, data: EventData) -> Self {
        Self {
            variant: variant.into(),
            data,
        }
    }
}

impl Event for GenericEvent {
    fn variant(&self) -> &str {
        &self.variant
    }

    fn data(&self) -> &EventData {
        &self.data
    }
}

/// Event whose type matches no registry entry. Keeps the type verbatim.
#[derive(Debug, Clone)]
pub struct UnknownEvent {
    data: EventData,
}

impl UnknownEvent {
    /// Registry-independent variant name of unknown events.
    pub const VARIANT: &'static str = "unknown";

    pub fn new(data: EventData) -> Self {
        Self { data }
    }
}

impl Event for UnknownEvent {
    fn variant(&self) -> &str {
        Self::VARIANT
    }

    fn data(&self) -> &EventData {
        &self.data
    }
}
