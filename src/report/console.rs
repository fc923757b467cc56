//! Terminal report sender: a progress bar per test plan and a closing summary.
//!
//! Bars of all console senders of a run live in one [`MultiProgress`], so
//! plans running side by side stack their bars instead of redrawing over
//! each other. Status lines are printed with the bars suspended.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::{PlanResults, ReportSender, SenderContext};
use crate::caserun::{CaseRunSnapshot, CrcId, lock};
use crate::library::{ReportingConfig, TestPlan};
use crate::result::Verdict;

pub struct ConsoleReportSender {
    testplan: Arc<TestPlan>,
    reporting: ReportingConfig,
    verbose: bool,
    results: PlanResults,
    finished: Mutex<BTreeSet<CrcId>>,
    multi: MultiProgress,
    progress: Mutex<Option<ProgressBar>>,
}

impl ConsoleReportSender {
    /// Reads `reporting.data.verbose` to also print passing units.
    pub fn new(ctx: SenderContext) -> Self {
        let verbose = ctx
            .reporting
            .data
            .get("verbose")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Self {
            results: PlanResults::new(ctx.testplan.id.clone(), &ctx.units),
            testplan: ctx.testplan,
            reporting: ctx.reporting,
            verbose,
            finished: Mutex::new(BTreeSet::new()),
            multi: ctx.progress,
            progress: Mutex::new(None),
        }
    }

    fn status_line(&self, update: &CaseRunSnapshot) -> Option<String> {
        let verdict = update.result().verdict();
        let status = match verdict {
            Verdict::Pass => console::style("PASS ").green(),
            Verdict::Info => console::style("INFO ").cyan(),
            Verdict::Warn => console::style("WARN ").yellow(),
            Verdict::Fail => console::style("FAIL ").red(),
            Verdict::Error => console::style("ERROR").red().bold(),
            Verdict::Unset => console::style("SKIP ").yellow(),
        };
        if !self.verbose && matches!(verdict, Verdict::Pass | Verdict::Info) {
            return None;
        }
        Some(format!("{} {}", status, update))
    }
}

#[async_trait]
impl ReportSender for ConsoleReportSender {
    fn testplan(&self) -> &TestPlan {
        &self.testplan
    }

    fn reporting(&self) -> &ReportingConfig {
        &self.reporting
    }

    async fn start(&self) {
        self.multi.suspend(|| {
            println!(
                "Test plan {}: {} case-run-configuration(s)",
                console::style(&self.testplan.name).bold(),
                self.results.len()
            )
        });

        let pb = self.multi.add(ProgressBar::new(self.results.len() as u64));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{prefix:.bold} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_prefix(self.testplan.id.clone());
        *lock(&self.progress) = Some(pb);
    }

    async fn result_update(&self, update: &CaseRunSnapshot) {
        if !self.results.record(update) || !update.result().is_final() {
            return;
        }
        if !lock(&self.finished).insert(update.id().clone()) {
            return;
        }

        if let Some(pb) = lock(&self.progress).as_ref() {
            pb.inc(1);
        }
        if let Some(line) = self.status_line(update) {
            self.multi.suspend(|| println!("{}", line));
        }
    }

    async fn join(&self) {
        if let Some(pb) = lock(&self.progress).take() {
            pb.finish_and_clear();
            self.multi.remove(&pb);
        }

        let summary = self.results.summary();
        println!();
        println!("Results of {}:", console::style(&self.testplan.name).bold());
        println!("  Total:   {}", summary.total);
        println!("  Passed:  {}", console::style(summary.count(Verdict::Pass)).green());
        println!("  Failed:  {}", console::style(summary.count(Verdict::Fail)).red());
        println!("  Errors:  {}", console::style(summary.count(Verdict::Error)).red().bold());
        println!("  Skipped: {}", console::style(summary.count(Verdict::Unset)).yellow());

        let warnings = summary.count(Verdict::Warn) + summary.count(Verdict::Info);
        if warnings > 0 {
            println!("  Notes:   {}", console::style(warnings).yellow());
        }

        println!();
        if summary.failed() {
            println!("{}", console::style("Some test cases failed.").red().bold());
            println!();
            for unit in self.results.snapshots() {
                if unit.result().verdict().is_failure() {
                    println!("  - {}", unit);
                    if let Some(message) = unit.result().message() {
                        println!("    {}", console::style(message).dim());
                    }
                }
            }
        } else {
            println!("{}", console::style("No failures.").green().bold());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caserun::CaseRunConfiguration;
    use crate::configuration::Configuration;
    use crate::library::TestCase;
    use crate::result::{CaseResult, State};
    use crate::settings::Settings;

    fn sender_in(
        plan: &str,
        verbose: bool,
        unit: &CaseRunConfiguration,
        progress: &MultiProgress,
    ) -> ConsoleReportSender {
        ConsoleReportSender::new(SenderContext {
            testplan: Arc::new(TestPlan::new(plan, "plan")),
            reporting: ReportingConfig::new("console").with_data("verbose", verbose),
            settings: Arc::new(Settings::default()),
            units: vec![unit.read_only_copy()],
            progress: progress.clone(),
        })
    }

    fn sender(verbose: bool, unit: &CaseRunConfiguration) -> ConsoleReportSender {
        sender_in("tp1", verbose, unit, &MultiProgress::new())
    }

    fn unit() -> CaseRunConfiguration {
        CaseRunConfiguration::new(Arc::new(TestCase::new("tc1", "tc1")), Configuration::new(), ["tp1"])
    }

    #[tokio::test]
    async fn test_counts_each_unit_once() {
        let unit = unit();
        let sender = sender(false, &unit);
        sender.start().await;

        let running = unit.with_result(CaseResult::new(State::Running));
        let done = unit.with_result(CaseResult::finished(State::Complete, Verdict::Fail));
        sender.result_update(&running.read_only_copy()).await;
        sender.result_update(&done.read_only_copy()).await;
        sender.result_update(&done.read_only_copy()).await;

        let pos = lock(&sender.progress).as_ref().map(|pb| pb.position());
        assert_eq!(pos, Some(1));
        sender.join().await;
        assert!(lock(&sender.progress).is_none());
    }

    #[test]
    fn test_passing_lines_only_when_verbose() {
        let unit = unit();
        let pass = unit
            .with_result(CaseResult::finished(State::Complete, Verdict::Pass))
            .read_only_copy();
        assert!(sender(false, &unit).status_line(&pass).is_none());
        assert!(sender(true, &unit).status_line(&pass).unwrap().contains("tc1"));

        let fail = unit
            .with_result(CaseResult::finished(State::Complete, Verdict::Fail))
            .read_only_copy();
        assert!(sender(false, &unit).status_line(&fail).is_some());
    }

    #[tokio::test]
    async fn test_plans_share_one_progress_area() {
        let progress = MultiProgress::new();
        let first = unit();
        let second = CaseRunConfiguration::new(
            Arc::new(TestCase::new("tc2", "tc2")),
            Configuration::new(),
            ["tp2"],
        );
        let tp1 = sender_in("tp1", false, &first, &progress);
        let tp2 = sender_in("tp2", false, &second, &progress);
        tp1.start().await;
        tp2.start().await;

        let done = second.with_result(CaseResult::finished(State::Complete, Verdict::Pass));
        tp2.result_update(&done.read_only_copy()).await;

        let position = |sender: &ConsoleReportSender| {
            lock(&sender.progress).as_ref().map(|pb| pb.position())
        };
        assert_eq!(position(&tp1), Some(0));
        assert_eq!(position(&tp2), Some(1));

        tp1.join().await;
        tp2.join().await;
        assert!(lock(&tp1.progress).is_none());
        assert!(lock(&tp2.progress).is_none());
    }
}
