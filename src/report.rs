//! Report senders: notification sinks of a test run.
//!
//! Every test plan present in a run gets at least one [`ReportSender`],
//! bound to a `(test plan, reporting config)` pair. The orchestrator drives
//! all of them the same way:
//!
//! ```text
//!   TestRuns::start()  ──► sender.start()
//!   TestRuns::update() ──► sender.result_update(snapshot)   (every accepted update)
//!   TestRuns::wait()   ──► sender.join()
//! ```
//!
//! Senders receive updates of every unit in the run and keep those of their
//! own plan, usually through a [`PlanResults`] tracker.
//!
//! # Selection
//!
//! [`ReportSenderFactory::assign`] picks, per plan:
//!
//! 1. the plan's own `reporting` configs, or one config of type
//!    `reportSenders.default` when it declares none;
//! 2. plus every config listed in `reportSenders.additional`.
//!
//! A config whose type is not registered is handled by the default sender
//! type, keeping the config as given.
//!
//! | Type | Sender |
//! |------|--------|
//! | `log` | [`LogReportSender`] |
//! | `console` | [`ConsoleReportSender`] |
//! | `junit` | [`JUnitReportSender`] |

pub mod console;
pub mod junit;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indicatif::MultiProgress;
use serde::Serialize;
use tracing::{info, warn};

use crate::caserun::{CaseRunConfigurationList, CaseRunSnapshot, CrcId, lock};
use crate::library::{Library, ReportingConfig, TestPlan};
use crate::result::{self, CaseResult, State, Verdict};
use crate::settings::Settings;

pub use console::ConsoleReportSender;
pub use junit::JUnitReportSender;

/// Sender type used when neither the plan nor the settings name one.
pub const DEFAULT_SENDER: &str = "log";

/// A notification sink for one `(test plan, reporting config)` pair.
#[async_trait]
pub trait ReportSender: Send + Sync {
    fn testplan(&self) -> &TestPlan;

    fn reporting(&self) -> &ReportingConfig;

    /// Called once before any workflow starts.
    async fn start(&self) {}

    /// Called for every accepted result update in the run.
    async fn result_update(&self, update: &CaseRunSnapshot);

    /// Called once after every workflow has finished.
    async fn join(&self) {}
}

/// Inputs handed to a sender constructor.
#[derive(Clone)]
pub struct SenderContext {
    pub testplan: Arc<TestPlan>,
    pub reporting: ReportingConfig,
    pub settings: Arc<Settings>,
    /// The plan's units as they are when the run is set up.
    pub units: Vec<CaseRunSnapshot>,
    /// Terminal area shared by every sender of the run.
    pub progress: MultiProgress,
}

/// Constructor of a registered sender type.
pub type SenderConstructor = Arc<dyn Fn(SenderContext) -> Box<dyn ReportSender> + Send + Sync>;

/// Name -> sender constructor table, built once at startup.
#[derive(Clone, Default)]
pub struct ReportSenderRegistry {
    constructors: HashMap<String, SenderConstructor>,
}

impl ReportSenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every sender shipped in this crate.
    pub fn with_builtins() -> Self {
        Self::new()
            .register("log", |ctx| {
                Box::new(LogReportSender::new(ctx)) as Box<dyn ReportSender>
            })
            .register("console", |ctx| {
                Box::new(ConsoleReportSender::new(ctx)) as Box<dyn ReportSender>
            })
            .register("junit", |ctx| {
                Box::new(JUnitReportSender::new(ctx)) as Box<dyn ReportSender>
            })
    }

    pub fn register<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(SenderContext) -> Box<dyn ReportSender> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    pub fn get(&self, name: &str) -> Option<&SenderConstructor> {
        self.constructors.get(name)
    }
}

impl fmt::Debug for ReportSenderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("ReportSenderRegistry").field("names", &names).finish()
    }
}

/// Selects and instantiates the senders of a run.
#[derive(Debug, Clone, Default)]
pub struct ReportSenderFactory {
    registry: ReportSenderRegistry,
}

impl ReportSenderFactory {
    pub fn new(registry: ReportSenderRegistry) -> Self {
        Self { registry }
    }

    /// Creates the senders for every plan with units in `units`.
    pub fn assign(
        &self,
        library: &dyn Library,
        units: &CaseRunConfigurationList,
        settings: &Arc<Settings>,
    ) -> Vec<Box<dyn ReportSender>> {
        let default_type = settings
            .get_str("reportSenders", "default")
            .unwrap_or(DEFAULT_SENDER)
            .to_string();
        let additional = additional_reporting(settings);
        let progress = MultiProgress::new();

        let mut senders = Vec::new();
        for (plan_id, plan_units) in units.by_testplan() {
            let Some(testplan) = library.testplan(&plan_id) else {
                warn!("Test plan {:?} is not in the library, no report senders", plan_id);
                continue;
            };

            let mut configs = testplan.reporting.clone();
            if configs.is_empty() {
                configs.push(ReportingConfig::new(default_type.clone()));
            }
            configs.extend(additional.iter().cloned());

            let snapshots: Vec<CaseRunSnapshot> =
                plan_units.iter().map(|unit| unit.read_only_copy()).collect();
            for reporting in configs {
                let ctx = SenderContext {
                    testplan: Arc::clone(&testplan),
                    reporting,
                    settings: Arc::clone(settings),
                    units: snapshots.clone(),
                    progress: progress.clone(),
                };
                senders.push(self.make(ctx, &default_type));
            }
        }
        senders
    }

    fn make(&self, ctx: SenderContext, default_type: &str) -> Box<dyn ReportSender> {
        if let Some(constructor) = self.registry.get(&ctx.reporting.kind) {
            return (**constructor)(ctx);
        }
        warn!(
            "Report sender type {:?} is not registered, using {:?}",
            ctx.reporting.kind, default_type
        );
        match self.registry.get(default_type) {
            Some(constructor) => (**constructor)(ctx),
            None => Box::new(LogReportSender::new(ctx)),
        }
    }
}

fn additional_reporting(settings: &Settings) -> Vec<ReportingConfig> {
    let Some(toml::Value::Array(entries)) = settings.get("reportSenders", "additional") else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match entry.clone().try_into::<ReportingConfig>() {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Ignoring invalid reportSenders.additional entry: {}", e);
                None
            }
        })
        .collect()
}

/// Roll-up of one test plan's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub testplan: String,
    pub total: usize,
    /// Units whose result is final.
    pub finished: usize,
    /// Least progressed state, `None` without units.
    pub state: Option<State>,
    /// Most severe verdict, `None` without units.
    pub result: Option<Verdict>,
    pub verdicts: BTreeMap<Verdict, usize>,
}

impl PlanSummary {
    pub fn new<'a>(testplan: impl Into<String>, results: impl IntoIterator<Item = &'a CaseResult>) -> Self {
        let results: Vec<&CaseResult> = results.into_iter().collect();
        let mut verdicts = BTreeMap::new();
        for r in &results {
            *verdicts.entry(r.verdict()).or_insert(0) += 1;
        }
        Self {
            testplan: testplan.into(),
            total: results.len(),
            finished: results.iter().filter(|r| r.is_final()).count(),
            state: result::least_progressed(results.iter().copied()),
            result: result::most_severe(results.iter().copied()),
            verdicts,
        }
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.verdicts.get(&verdict).copied().unwrap_or(0)
    }

    /// Returns `true` when the plan's worst verdict is `FAIL` or `ERROR`.
    pub fn failed(&self) -> bool {
        self.result.is_some_and(|verdict| verdict.is_failure())
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.map_or("-", |s| s.as_str());
        let result = self.result.map_or("-", |v| v.as_str());
        write!(
            f,
            "{}: {} ({}), {}/{} finished",
            self.testplan, state, result, self.finished, self.total
        )
    }
}

/// Latest snapshot of every unit of one test plan.
#[derive(Debug)]
pub struct PlanResults {
    testplan: String,
    units: Mutex<BTreeMap<CrcId, CaseRunSnapshot>>,
}

impl PlanResults {
    pub fn new(testplan: impl Into<String>, initial: &[CaseRunSnapshot]) -> Self {
        let units = initial
            .iter()
            .map(|snapshot| (snapshot.id().clone(), snapshot.clone()))
            .collect();
        Self {
            testplan: testplan.into(),
            units: Mutex::new(units),
        }
    }

    /// Stores `update` if it belongs to this plan.
    ///
    /// Returns `true` when the update was kept.
    pub fn record(&self, update: &CaseRunSnapshot) -> bool {
        if !update.runs_for(&self.testplan) {
            return false;
        }
        lock(&self.units).insert(update.id().clone(), update.clone());
        true
    }

    pub fn len(&self) -> usize {
        lock(&self.units).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.units).is_empty()
    }

    pub fn snapshots(&self) -> Vec<CaseRunSnapshot> {
        lock(&self.units).values().cloned().collect()
    }

    pub fn summary(&self) -> PlanSummary {
        let units = lock(&self.units);
        PlanSummary::new(self.testplan.clone(), units.values().map(CaseRunSnapshot::result))
    }
}

/// Default sender: writes run progress to the log.
pub struct LogReportSender {
    testplan: Arc<TestPlan>,
    reporting: ReportingConfig,
    results: PlanResults,
}

impl LogReportSender {
    pub fn new(ctx: SenderContext) -> Self {
        Self {
            results: PlanResults::new(ctx.testplan.id.clone(), &ctx.units),
            testplan: ctx.testplan,
            reporting: ctx.reporting,
        }
    }
}

#[async_trait]
impl ReportSender for LogReportSender {
    fn testplan(&self) -> &TestPlan {
        &self.testplan
    }

    fn reporting(&self) -> &ReportingConfig {
        &self.reporting
    }

    async fn start(&self) {
        info!(
            "Test plan {:?} started with {} case-run-configuration(s)",
            self.testplan.name,
            self.results.len()
        );
    }

    async fn result_update(&self, update: &CaseRunSnapshot) {
        if self.results.record(update) {
            info!("[{}] {} -> {}", self.testplan.id, update, update.result());
        }
    }

    async fn join(&self) {
        info!("Test plan {:?} finished: {}", self.testplan.name, self.results.summary());
    }
}
