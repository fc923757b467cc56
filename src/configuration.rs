//! Test configurations and the merge engine combining them.
//!
//! A test plan narrows or extends the configurations declared by its test
//! cases. How the two sides combine is decided by a [`MergeMethod`]:
//!
//! | Method | Name in settings | Compatible when | Merged value |
//! |--------|------------------|-----------------|--------------|
//! | [`MergeMethod::Strict`] | `intersection` | both sides are identical | the other side |
//! | [`MergeMethod::Extension`] | `extension` | shared keys agree | union, other side wins |
//!
//! [`ConfigurationList::merge`] applies a method over the cartesian product
//! of plan-level and case-level configurations. Duplicates are expected in
//! the output; they collapse later when case-run-configurations are
//! appended to a [`CaseRunConfigurationList`](crate::caserun::CaseRunConfigurationList).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// A scalar configuration value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Integer(i64),
    String(String),
}

impl Scalar {
    /// Type-preserving textual form used for identity hashing.
    ///
    /// Strings are quoted so that `"1"` and `1` never collide.
    fn canonical(&self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Integer(i) => i.to_string(),
            Scalar::String(s) => format!("{:?}", s),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Integer(i) => write!(f, "{}", i),
            Scalar::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// A key/value set narrowing how a test case is executed (e.g. `arch`).
///
/// Keys are kept sorted, so two configurations built in a different key
/// order are equal and produce the same [`canonical`](Self::canonical) form.
///
/// # Example
///
/// ```
/// use testpipeline::configuration::Configuration;
///
/// let a = Configuration::new().with("arch", "x86_64").with("variant", "server");
/// let b = Configuration::new().with("variant", "server").with("arch", "x86_64");
/// assert_eq!(a, b);
/// ```
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, Scalar>);

impl Configuration {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key/value pair.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sorted, type-preserving representation of all pairs.
    pub fn canonical(&self) -> String {
        let pairs: Vec<String> = self
            .0
            .iter()
            .map(|(key, value)| format!("{:?}={}", key, value.canonical()))
            .collect();
        format!("[{}]", pairs.join(", "))
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .0
            .iter()
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

impl<K: Into<String>, V: Into<Scalar>> FromIterator<(K, V)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Policy deciding how plan-level and case-level configurations combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeMethod {
    /// Configurations merge only when identical.
    #[serde(rename = "intersection", alias = "strict")]
    Strict,
    /// Configurations merge when shared keys agree; the other side wins.
    #[serde(rename = "extension", alias = "hybrid")]
    Extension,
}

impl MergeMethod {
    /// Returns whether `this` (plan side) can be merged with `other` (case side).
    pub fn compatible(&self, this: &Configuration, other: &Configuration) -> bool {
        match self {
            MergeMethod::Strict => this == other,
            MergeMethod::Extension => this
                .iter()
                .all(|(key, value)| other.get(key).is_none_or(|theirs| theirs == value)),
        }
    }

    /// Merges two compatible configurations.
    pub fn merge(&self, this: &Configuration, other: &Configuration) -> Configuration {
        match self {
            MergeMethod::Strict => other.clone(),
            MergeMethod::Extension => {
                let mut merged = other.clone();
                for (key, value) in this.iter() {
                    if !merged.contains_key(key) {
                        merged.0.insert(key.clone(), value.clone());
                    }
                }
                merged
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Strict => "intersection",
            MergeMethod::Extension => "extension",
        }
    }
}

impl FromStr for MergeMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intersection" | "strict" => Ok(MergeMethod::Strict),
            "extension" | "hybrid" => Ok(MergeMethod::Extension),
            other => Err(PipelineError::UnknownMergeMethod(other.to_string())),
        }
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plan-level configurations tagged with the method used to merge them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationList {
    method: MergeMethod,
    items: Vec<Configuration>,
}

impl ConfigurationList {
    pub fn new(items: Vec<Configuration>, method: MergeMethod) -> Self {
        Self { method, items }
    }

    /// Creates a list from a merge method name as found in settings or a library.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownMergeMethod`] for unrecognised names.
    pub fn with_method_name(items: Vec<Configuration>, method: &str) -> PipelineResult<Self> {
        Ok(Self::new(items, method.parse()?))
    }

    pub fn method(&self) -> MergeMethod {
        self.method
    }

    pub fn items(&self) -> &[Configuration] {
        &self.items
    }

    /// Merges this (plan-level) list against `other` (case-level) configurations.
    ///
    /// - An empty `other` is treated as a single empty configuration.
    /// - An empty `self` returns `other` unchanged.
    /// - Otherwise every compatible pair of the cartesian product is merged.
    pub fn merge(&self, other: &[Configuration]) -> Vec<Configuration> {
        let empty = [Configuration::new()];
        let other = if other.is_empty() { &empty[..] } else { other };

        if self.items.is_empty() {
            return other.to_vec();
        }

        let mut configs = Vec::new();
        for this in &self.items {
            for theirs in other {
                if self.method.compatible(this, theirs) {
                    configs.push(self.method.merge(this, theirs));
                }
            }
        }
        configs
    }
}
