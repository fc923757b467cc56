//! JUnit XML report sender.
//!
//! Writes one file per test plan when the run completes. Each
//! case-run-configuration of the plan becomes a `<testcase>`:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="3" failures="1" errors="0" skipped="1">
//!   <testsuite name="Smoke" id="smoke" tests="3" failures="1" errors="0" skipped="1" timestamp="...">
//!     <testcase classname="tc1" name="{arch: x86_64}"/>
//!     <testcase classname="tc1" name="{arch: aarch64}">
//!       <failure message="Command exited with code 1" type="FAIL"/>
//!     </testcase>
//!     <testcase classname="tc2" name="{}">
//!       <skipped message="Manual test case, not executed automatically"/>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! | Verdict | Element |
//! |---------|---------|
//! | `PASS`, `INFO`, `WARN` | none |
//! | `FAIL` | `<failure>` |
//! | `ERROR` | `<error>` |
//! | `UNSET` | `<skipped>` |
//!
//! The file goes to `reporting.data.path`, or `<junit.outputDir>/<plan id>.xml`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tracing::{error, info};

use super::{PlanResults, ReportSender, SenderContext};
use crate::caserun::CaseRunSnapshot;
use crate::library::{ReportingConfig, TestPlan};
use crate::result::Verdict;

const DEFAULT_OUTPUT_DIR: &str = "results";

/// Sender that writes a JUnit XML file for its test plan.
pub struct JUnitReportSender {
    testplan: Arc<TestPlan>,
    reporting: ReportingConfig,
    output_path: PathBuf,
    results: PlanResults,
}

impl JUnitReportSender {
    pub fn new(ctx: SenderContext) -> Self {
        let output_path = match ctx.reporting.data.get("path").and_then(|v| v.as_str()) {
            Some(path) => PathBuf::from(path),
            None => {
                let dir = ctx
                    .settings
                    .get_str("junit", "outputDir")
                    .unwrap_or(DEFAULT_OUTPUT_DIR);
                PathBuf::from(dir).join(format!("{}.xml", ctx.testplan.id))
            }
        };
        Self {
            results: PlanResults::new(ctx.testplan.id.clone(), &ctx.units),
            testplan: ctx.testplan,
            reporting: ctx.reporting,
            output_path,
        }
    }

    pub fn output_path(&self) -> &PathBuf {
        &self.output_path
    }

    fn generate_xml(&self) -> anyhow::Result<String> {
        let units = self.results.snapshots();
        let summary = self.results.summary();
        let failures = summary.count(Verdict::Fail).to_string();
        let errors = summary.count(Verdict::Error).to_string();
        let skipped = summary.count(Verdict::Unset).to_string();
        let tests = summary.total.to_string();

        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("tests", tests.as_str()));
        testsuites.push_attribute(("failures", failures.as_str()));
        testsuites.push_attribute(("errors", errors.as_str()));
        testsuites.push_attribute(("skipped", skipped.as_str()));
        writer.write_event(Event::Start(testsuites))?;

        let name = strip_invalid(&self.testplan.name);
        let id = strip_invalid(&self.testplan.id);
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let mut testsuite = BytesStart::new("testsuite");
        testsuite.push_attribute(("name", name.as_str()));
        testsuite.push_attribute(("id", id.as_str()));
        testsuite.push_attribute(("tests", tests.as_str()));
        testsuite.push_attribute(("failures", failures.as_str()));
        testsuite.push_attribute(("errors", errors.as_str()));
        testsuite.push_attribute(("skipped", skipped.as_str()));
        testsuite.push_attribute(("timestamp", timestamp.as_str()));
        writer.write_event(Event::Start(testsuite))?;

        for unit in &units {
            write_testcase(&mut writer, unit)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        Ok(String::from_utf8(writer.into_inner())?)
    }
}

fn write_testcase<W: std::io::Write>(
    writer: &mut Writer<W>,
    unit: &CaseRunSnapshot,
) -> anyhow::Result<()> {
    let classname = strip_invalid(&unit.testcase().id);
    let name = strip_invalid(&unit.configuration().to_string());
    let mut testcase = BytesStart::new("testcase");
    testcase.push_attribute(("classname", classname.as_str()));
    testcase.push_attribute(("name", name.as_str()));

    let result = unit.result();
    let element = match result.verdict() {
        Verdict::Fail => Some("failure"),
        Verdict::Error => Some("error"),
        Verdict::Unset => Some("skipped"),
        Verdict::Pass | Verdict::Info | Verdict::Warn => None,
    };

    let Some(element) = element else {
        match result.message() {
            Some(message) => {
                writer.write_event(Event::Start(testcase))?;
                write_text_element(writer, "system-out", message)?;
                writer.write_event(Event::End(BytesEnd::new("testcase")))?;
            }
            None => writer.write_event(Event::Empty(testcase))?,
        }
        return Ok(());
    };

    writer.write_event(Event::Start(testcase))?;
    let mut child = BytesStart::new(element);
    let message = result.message().map(strip_invalid);
    if let Some(message) = &message {
        child.push_attribute(("message", message.as_str()));
    }
    if element != "skipped" {
        child.push_attribute(("type", result.verdict().as_str()));
    }
    writer.write_event(Event::Empty(child))?;
    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    element: &str,
    text: &str,
) -> anyhow::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(element)))?;
    writer.write_event(Event::Text(BytesText::new(&strip_invalid(text))))?;
    writer.write_event(Event::End(BytesEnd::new(element)))?;
    Ok(())
}

/// Drops characters XML 1.0 cannot carry. Escaping is left to the writer.
fn strip_invalid(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}'))
        .collect()
}

#[async_trait]
impl ReportSender for JUnitReportSender {
    fn testplan(&self) -> &TestPlan {
        &self.testplan
    }

    fn reporting(&self) -> &ReportingConfig {
        &self.reporting
    }

    async fn result_update(&self, update: &CaseRunSnapshot) {
        self.results.record(update);
    }

    async fn join(&self) {
        match self.generate_xml() {
            Ok(xml) => {
                if let Some(parent) = self.output_path.parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                    && let Err(e) = std::fs::create_dir_all(parent)
                {
                    error!("Failed to create output directory: {}", e);
                    return;
                }

                if let Err(e) = std::fs::write(&self.output_path, xml) {
                    error!("Failed to write JUnit XML: {}", e);
                } else {
                    info!("JUnit XML written to: {}", self.output_path.display());
                }
            }
            Err(e) => error!("Failed to generate JUnit XML: {}", e),
        }
    }
}
