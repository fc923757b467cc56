//! testpipeline: event-driven test orchestration.
//!
//! Given a library of test plans and test cases, an event describing why
//! testing is triggered and settings, this crate works out the exact set of
//! (test case, configuration) units to run, hands each unit to a workflow,
//! drives the workflows concurrently and forwards validated result updates
//! to report senders.
//!
//! # Architecture
//!
//! - **Event**: typed trigger resolved from JSON wire input ([`event`])
//! - **Configuration**: merge policies for plan and case configurations ([`configuration`])
//! - **CaseRunConfiguration**: the deduplicated unit of work ([`caserun`])
//! - **Result**: validated state/verdict pairs ([`result`])
//! - **Workflow**: execution back-ends and their assignment ([`workflow`])
//! - **Report**: notification sinks per test plan ([`report`])
//! - **TestRuns**: the orchestrator tying them together ([`testruns`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use testpipeline::event::{EventFactory, EventRegistry};
//! use testpipeline::library::StaticLibrary;
//! use testpipeline::report::{ReportSenderFactory, ReportSenderRegistry};
//! use testpipeline::settings::Settings;
//! use testpipeline::testruns::TestRuns;
//! use testpipeline::workflow::{WorkflowFactory, WorkflowRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Arc::new(Settings::load(std::path::Path::new("settings.toml"))?);
//!     let library = StaticLibrary::load(std::path::Path::new("library.toml"))?;
//!     let events = EventFactory::new(EventRegistry::new().register_generic("compose"));
//!     let event = events.make(&settings, r#"{"type": "compose.finished", "id": "C-1"}"#)?;
//!
//!     let mut testruns = TestRuns::new(
//!         &library,
//!         event,
//!         settings,
//!         &WorkflowFactory::new(WorkflowRegistry::with_builtins()),
//!         &ReportSenderFactory::new(ReportSenderRegistry::with_builtins()),
//!     )?;
//!     testruns.start().await;
//!     testruns.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod caserun;
pub mod configuration;
pub mod error;
pub mod event;
pub mod library;
pub mod report;
pub mod result;
pub mod settings;
pub mod testruns;
pub mod workflow;

// Re-export commonly used types
pub use caserun::{CaseRunConfiguration, CaseRunConfigurationList, CaseRunSnapshot, CrcId};
pub use configuration::{Configuration, ConfigurationList, MergeMethod};
pub use error::{PipelineError, PipelineResult};
pub use event::{Event, EventData, EventFactory, EventRegistry};
pub use library::{Library, StaticLibrary, TestCase, TestPlan};
pub use report::{ReportSender, ReportSenderFactory, ReportSenderRegistry};
pub use result::{CaseResult, State, Verdict};
pub use settings::Settings;
pub use testruns::TestRuns;
pub use workflow::{Workflow, WorkflowFactory, WorkflowHandle, WorkflowRegistry};
