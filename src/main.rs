//! testpipeline CLI - plan and run the test cases an event triggers.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use toml::{Table, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use testpipeline::event::{Event, EventFactory, EventRegistry};
use testpipeline::library::{Library, StaticLibrary};
use testpipeline::report::{ReportSenderFactory, ReportSenderRegistry};
use testpipeline::settings::{self, Settings};
use testpipeline::testruns::TestRuns;
use testpipeline::workflow::{WorkflowFactory, WorkflowRegistry};

#[derive(Parser)]
#[command(name = "testpipeline")]
#[command(about = "Event-driven test orchestration", long_about = None)]
#[command(version)]
struct Cli {
    /// Test library file
    #[arg(short, long, default_value = "library.toml", global = true)]
    library: PathBuf,

    /// Settings files, later files taking precedence
    #[arg(short, long = "settings", global = true)]
    settings: Vec<PathBuf>,

    /// Override a setting
    #[arg(long = "set", value_name = "SECTION.KEY=VALUE", global = true)]
    overrides: Vec<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the test cases triggered by an event
    Run {
        /// Event as JSON, `@file` to read it from a file, `-` for stdin
        event: String,
    },

    /// Show the case-run-configurations an event would run
    Plan {
        /// Event as JSON, `@file` to read it from a file, `-` for stdin
        event: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate the test library
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Run { event } => run(&cli, event).await,
        Commands::Plan { event, format } => plan(&cli, event, format),
        Commands::Validate => validate(&cli.library),
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut overrides = Table::new();
    for assignment in &cli.overrides {
        for (section, value) in settings::parse_assignment(assignment)? {
            let Value::Table(values) = value else {
                continue;
            };
            let entry = overrides
                .entry(section)
                .or_insert(Value::Table(Table::new()));
            if let Value::Table(existing) = entry {
                existing.extend(values);
            }
        }
    }
    Settings::new(overrides, std::env::vars(), &cli.settings)
}

fn read_event(arg: &str) -> Result<String> {
    if arg == "-" {
        let mut wire = String::new();
        std::io::stdin()
            .read_to_string(&mut wire)
            .context("Failed to read event from stdin")?;
        return Ok(wire);
    }
    if let Some(path) = arg.strip_prefix('@') {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event from {}", path));
    }
    Ok(arg.to_string())
}

/// Event factory with the generic types listed in `events.types`.
fn event_factory(settings: &Settings) -> EventFactory {
    let mut registry = EventRegistry::new();
    if let Some(Value::Array(types)) = settings.get("events", "types") {
        for name in types.iter().filter_map(Value::as_str) {
            registry = registry.register_generic(name);
        }
    }
    EventFactory::new(registry)
}

struct Setup {
    settings: Arc<Settings>,
    library: StaticLibrary,
    event: Arc<dyn Event>,
}

fn setup(cli: &Cli, event: &str) -> Result<Setup> {
    let settings = Arc::new(load_settings(cli)?);
    let library = StaticLibrary::load(&cli.library)
        .with_context(|| format!("Failed to load library from {}", cli.library.display()))?;
    info!("Loaded library from {}", cli.library.display());

    let wire = read_event(event)?;
    let event = event_factory(&settings)
        .make(&settings, &wire)
        .context("Invalid event")?;
    info!("Event {:?} resolved as {:?}", event.event_type(), event.variant());

    Ok(Setup {
        settings,
        library,
        event,
    })
}

fn build_testruns(setup: Setup) -> Result<TestRuns> {
    let testruns = TestRuns::new(
        &setup.library,
        setup.event,
        setup.settings,
        &WorkflowFactory::new(WorkflowRegistry::with_builtins()),
        &ReportSenderFactory::new(ReportSenderRegistry::with_builtins()),
    )?;
    Ok(testruns)
}

async fn run(cli: &Cli, event: &str) -> Result<()> {
    let mut testruns = build_testruns(setup(cli, event)?)?;
    if testruns.units().is_empty() {
        println!("No case-run-configurations for this event.");
        return Ok(());
    }

    testruns.start().await;
    testruns.wait().await?;

    println!();
    println!("Summary:");
    let summary = testruns.summary();
    for plan in &summary {
        println!("  {}", plan);
    }
    let result = testruns.result();
    println!(
        "Result: {}",
        result.map_or("-", |verdict| verdict.as_str())
    );

    if summary.iter().any(|plan| plan.failed()) {
        std::process::exit(1);
    }
    Ok(())
}

fn plan(cli: &Cli, event: &str, format: &str) -> Result<()> {
    let testruns = build_testruns(setup(cli, event)?)?;
    let snapshots: Vec<_> = testruns.items().map(|unit| unit.read_only_copy()).collect();

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&snapshots)?;
            println!("{}", json);
        }
        _ => {
            println!("{} case-run-configuration(s):", snapshots.len());
            for unit in &snapshots {
                let plans: Vec<&str> = unit.running_for().keys().map(String::as_str).collect();
                println!(
                    "  {} {} [{}] for {}",
                    unit.testcase().id,
                    unit.configuration(),
                    unit.workflow_type().unwrap_or("-"),
                    plans.join(", ")
                );
            }
        }
    }
    Ok(())
}

fn validate(library_path: &Path) -> Result<()> {
    match StaticLibrary::load(library_path) {
        Ok(library) => {
            println!("Library is valid!");
            println!();
            println!("  Test cases: {}", library.testcase_count());
            let testplans = library.testplans();
            println!("  Test plans: {}", testplans.len());
            for testplan in &testplans {
                println!(
                    "    {} ({} entries)",
                    testplan.id,
                    library.entries(testplan).len()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Library error: {:#}", e);
            std::process::exit(1);
        }
    }
}
