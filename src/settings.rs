//! Layered pipeline settings.
//!
//! Settings are a two-level TOML document addressed as `(section, key)`.
//! Layers are applied from lowest to highest precedence:
//!
//! 1. Built-in defaults
//! 2. Settings files, in the order given (missing files are skipped)
//! 3. Environment variables named `PIPELINE_<section>__<key>`; the double
//!    underscore lets section and key names contain single underscores
//! 4. Explicit overrides (e.g. `--set section.key=value` on the command line)
//!
//! # Example
//!
//! ```
//! use testpipeline::settings::Settings;
//!
//! let settings = Settings::from_toml(r#"
//!     [library]
//!     defaultCaseConfigMergeMethod = "extension"
//! "#)?;
//!
//! assert_eq!(
//!     settings.get_str("library", "defaultCaseConfigMergeMethod"),
//!     Some("extension")
//! );
//! assert_eq!(settings.get_str("reportSenders", "default"), Some("log"));
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use toml::{Table, Value};
use tracing::debug;

/// Prefix of environment variables overriding settings.
pub const ENV_PREFIX: &str = "PIPELINE_";

/// Separates section from key in environment variable names.
pub const ENV_SEPARATOR: &str = "__";

/// Hierarchical `(section, key)` settings lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    table: Table,
}

impl Default for Settings {
    fn default() -> Self {
        Self { table: Table::new() }
            .with("library", "defaultCaseConfigMergeMethod", "intersection")
            .with("reportSenders", "default", "log")
            .with("commandWorkflow", "shell", "/bin/sh")
            .with("commandWorkflow", "timeout", 900_i64)
            .with("junit", "outputDir", "results")
    }
}

impl Settings {
    /// Builds settings from every layer.
    ///
    /// # Arguments
    ///
    /// * `overrides` - Highest-precedence values
    /// * `environment` - Environment variables; only `PIPELINE_*` entries are used
    /// * `locations` - Settings files, later files taking precedence
    ///
    /// # Errors
    ///
    /// Returns an error if an existing settings file cannot be read or parsed.
    pub fn new(
        overrides: Table,
        environment: impl IntoIterator<Item = (String, String)>,
        locations: &[PathBuf],
    ) -> Result<Self> {
        let mut settings = Self::default();

        for location in locations {
            if !location.exists() {
                debug!("Settings file {} does not exist, skipping", location.display());
                continue;
            }
            settings.merge(load_table(location)?);
        }

        for (name, value) in environment {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match rest.split_once(ENV_SEPARATOR) {
                Some((section, key)) if !section.is_empty() && !key.is_empty() => {
                    settings.set(section, key, Value::String(value));
                }
                _ => debug!("Ignoring environment variable {}", name),
            }
        }

        settings.merge(overrides);
        Ok(settings)
    }

    /// Loads settings from a single TOML file on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = Self::default();
        settings.merge(load_table(path)?);
        Ok(settings)
    }

    /// Parses settings from a TOML string on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid TOML.
    pub fn from_toml(content: &str) -> Result<Self> {
        let table: Table = toml::from_str(content).context("Failed to parse settings")?;
        let mut settings = Self::default();
        settings.merge(table);
        Ok(settings)
    }

    /// Returns the value stored under `section.key`.
    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.table.get(section)?.as_table()?.get(key)
    }

    pub fn get_str(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key)?.as_str()
    }

    /// Returns an integer, also accepting numeric strings (as set from the environment).
    pub fn get_integer(&self, section: &str, key: &str) -> Option<i64> {
        match self.get(section, key)? {
            Value::Integer(i) => Some(*i),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Returns a boolean, also accepting `"true"`/`"false"` strings.
    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        match self.get(section, key)? {
            Value::Boolean(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_table(&self, section: &str) -> Option<&Table> {
        self.table.get(section)?.as_table()
    }

    /// Sets a single value, creating the section if needed.
    pub fn set(&mut self, section: &str, key: &str, value: Value) {
        let entry = self
            .table
            .entry(section.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if !entry.is_table() {
            *entry = Value::Table(Table::new());
        }
        if let Value::Table(table) = entry {
            table.insert(key.to_string(), value);
        }
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, section: &str, key: &str, value: impl Into<Value>) -> Self {
        self.set(section, key, value.into());
        self
    }

    fn merge(&mut self, overlay: Table) {
        merge_tables(&mut self.table, overlay);
    }
}

/// Parses a `section.key=value` assignment into an override table.
///
/// The value is interpreted as a TOML value when possible (`3`, `true`,
/// `"quoted"`), otherwise as a bare string.
///
/// # Errors
///
/// Returns an error when the assignment is not of the form `section.key=value`.
pub fn parse_assignment(assignment: &str) -> Result<Table> {
    let Some((path, raw)) = assignment.split_once('=') else {
        bail!("Expected section.key=value, got {:?}", assignment);
    };
    let Some((section, key)) = path.trim().split_once('.') else {
        bail!("Expected section.key=value, got {:?}", assignment);
    };

    let value = toml::from_str::<Table>(&format!("v = {}", raw.trim()))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| Value::String(raw.trim().to_string()));

    let mut inner = Table::new();
    inner.insert(key.to_string(), value);
    let mut table = Table::new();
    table.insert(section.to_string(), Value::Table(inner));
    Ok(table)
}

fn load_table(path: &Path) -> Result<Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse settings file: {}", path.display()))
}

fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        if let Value::Table(incoming) = value {
            if let Some(Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}
