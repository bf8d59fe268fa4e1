//! Object descriptors: the input the resolver consumes.
//!
//! Descriptors are plain serde types so any document layer can produce them.
//! [`DescriptorDocument`] reads the TOML/JSON layout the CLI accepts:
//!
//! ```toml
//! [[object]]
//! fqn = "view.public.v1"
//! category = "view"
//! split = "base"
//!
//! [[object.depends]]
//! pqn = "v2"
//!
//! [[object.depends]]
//! set = [{ fqn = "role.r1", priority = 2 }, { fqn = "role.r2" }]
//! fallback = "superuser"
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::graph::node::{NodeKind, Side};

// ---------------------------------------------------------------------------
// Mode and direction
// ---------------------------------------------------------------------------

/// Requested operation for a resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Build,
    Drop,
    /// Drop and rebuild.
    Both,
}

impl Mode {
    #[must_use]
    pub const fn includes(self, side: Side) -> bool {
        matches!(
            (self, side),
            (Self::Both, _) | (Self::Build, Side::Build) | (Self::Drop, Side::Drop)
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Drop => "drop",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "build" => Ok(Self::Build),
            "drop" => Ok(Self::Drop),
            "both" => Ok(Self::Both),
            other => bail!("unknown mode '{other}' (expected build, drop or both)"),
        }
    }
}

/// Which side(s) a dependency declaration applies to.
///
/// - `Forwards`: build side only. The declaring object is built after the
///   target.
/// - `Backwards`: drop side only. The target is dropped after the declaring
///   object.
/// - `Both`: both of the above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Backwards,
    Forwards,
    #[default]
    Both,
}

impl Direction {
    #[must_use]
    pub const fn applies_to(self, side: Side) -> bool {
        matches!(
            (self, side),
            (Self::Both, _) | (Self::Forwards, Side::Build) | (Self::Backwards, Side::Drop)
        )
    }
}

// ---------------------------------------------------------------------------
// Dependency declarations
// ---------------------------------------------------------------------------

/// A reference to another object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Fully-qualified name, matched exactly.
    Full(String),
    /// Partial name, promoted against the declaring object's qualifier and
    /// then matched by suffix.
    Partial(String),
}

impl Target {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Full(name) | Self::Partial(name) => name,
        }
    }
}

/// A single required dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDependencySpec", into = "RawDependencySpec")]
pub struct DependencySpec {
    pub target: Target,
    pub direction: Direction,
    /// Guard predicate; a false guard omits the edge.
    pub condition: Option<String>,
    /// Also add the equivalent edge between the two nodes' mirrors.
    pub propagate_mirror: bool,
    /// Preference inside a dependency set (higher wins).
    pub priority: i32,
}

impl DependencySpec {
    #[must_use]
    pub fn fqn(name: impl Into<String>) -> Self {
        Self::with_target(Target::Full(name.into()))
    }

    #[must_use]
    pub fn pqn(name: impl Into<String>) -> Self {
        Self::with_target(Target::Partial(name.into()))
    }

    const fn with_target(target: Target) -> Self {
        Self {
            target,
            direction: Direction::Both,
            condition: None,
            propagate_mirror: false,
            priority: 0,
        }
    }

    #[must_use]
    pub const fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn condition(mut self, predicate: impl Into<String>) -> Self {
        self.condition = Some(predicate.into());
        self
    }

    #[must_use]
    pub const fn propagate_mirror(mut self) -> Self {
        self.propagate_mirror = true;
        self
    }

    #[must_use]
    pub const fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Serialized shape of [`DependencySpec`]: exactly one of `fqn`/`pqn`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawDependencySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fqn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pqn: Option<String>,
    #[serde(default)]
    direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<String>,
    #[serde(default)]
    propagate_mirror: bool,
    #[serde(default)]
    priority: i32,
}

impl TryFrom<RawDependencySpec> for DependencySpec {
    type Error = String;

    fn try_from(raw: RawDependencySpec) -> Result<Self, Self::Error> {
        let target = match (raw.fqn, raw.pqn) {
            (Some(fqn), None) => Target::Full(fqn),
            (None, Some(pqn)) => Target::Partial(pqn),
            (Some(_), Some(_)) => return Err("dependency has both fqn and pqn".to_string()),
            (None, None) => return Err("dependency needs an fqn or a pqn".to_string()),
        };
        Ok(Self {
            target,
            direction: raw.direction,
            condition: raw.condition,
            propagate_mirror: raw.propagate_mirror,
            priority: raw.priority,
        })
    }
}

impl From<DependencySpec> for RawDependencySpec {
    fn from(spec: DependencySpec) -> Self {
        let (fqn, pqn) = match spec.target {
            Target::Full(name) => (Some(name), None),
            Target::Partial(name) => (None, Some(name)),
        };
        Self {
            fqn,
            pqn,
            direction: spec.direction,
            condition: spec.condition,
            propagate_mirror: spec.propagate_mirror,
            priority: spec.priority,
        }
    }
}

/// "Depend on at least one of these."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySetSpec {
    pub set: Vec<DependencySpec>,
    /// Capability to bracket with SetFallback/SetEndFallback when every
    /// member would cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl DependencySetSpec {
    #[must_use]
    pub const fn new(members: Vec<DependencySpec>) -> Self {
        Self {
            set: members,
            fallback: None,
            condition: None,
        }
    }

    #[must_use]
    pub fn fallback(mut self, capability: impl Into<String>) -> Self {
        self.fallback = Some(capability.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyDecl {
    Set(DependencySetSpec),
    Single(DependencySpec),
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackScope {
    /// One Fallback/EndFallback pair per capability for the whole pass.
    #[default]
    Shared,
    /// One pair per (capability, declaring object).
    Object,
}

/// A capability that may be granted temporarily to break a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    pub capability: String,
    #[serde(default)]
    pub scope: FallbackScope,
}

/// How an object family may be split to break cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// A base placeholder (e.g. a view with its columns but no query).
    Base,
}

// ---------------------------------------------------------------------------
// Object descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub fqn: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub action: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<DependencyDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<SplitPolicy>,
}

impl ObjectDescriptor {
    #[must_use]
    pub fn new(fqn: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            fqn: fqn.into(),
            category: category.into(),
            action: NodeKind::Unspecified,
            depends: Vec::new(),
            fallback: None,
            split: None,
        }
    }

    /// Add a full-name dependency with default options.
    #[must_use]
    pub fn depends_on(self, fqn: impl Into<String>) -> Self {
        self.with_dependency(DependencySpec::fqn(fqn))
    }

    #[must_use]
    pub fn with_dependency(mut self, spec: DependencySpec) -> Self {
        self.depends.push(DependencyDecl::Single(spec));
        self
    }

    #[must_use]
    pub fn with_set(mut self, set: DependencySetSpec) -> Self {
        self.depends.push(DependencyDecl::Set(set));
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, capability: impl Into<String>, scope: FallbackScope) -> Self {
        self.fallback = Some(FallbackPolicy {
            capability: capability.into(),
            scope,
        });
        self
    }

    #[must_use]
    pub const fn splittable(mut self) -> Self {
        self.split = Some(SplitPolicy::Base);
        self
    }

    #[must_use]
    pub const fn with_action(mut self, action: NodeKind) -> Self {
        self.action = action;
        self
    }
}

/// A document holding object descriptors in resolution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorDocument {
    #[serde(default)]
    pub object: Vec<ObjectDescriptor>,
}

impl DescriptorDocument {
    /// # Errors
    ///
    /// Returns an error if `content` is not a valid TOML descriptor document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML descriptor document")
    }

    /// # Errors
    ///
    /// Returns an error if `content` is not a valid JSON descriptor document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON descriptor document")
    }

    /// Load a document, choosing the format from the file extension
    /// (`.json` for JSON, anything else is read as TOML).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        };
        parsed.with_context(|| format!("Failed to load {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Guard conditions
// ---------------------------------------------------------------------------

/// Evaluates guard predicates attached to dependency declarations.
///
/// Each guard is evaluated once, while the graph is built.
pub trait ConditionEvaluator {
    fn evaluate(&self, predicate: &str, declared_by: &str) -> bool;
}

impl<F> ConditionEvaluator for F
where
    F: Fn(&str, &str) -> bool,
{
    fn evaluate(&self, predicate: &str, declared_by: &str) -> bool {
        self(predicate, declared_by)
    }
}

/// Guard evaluator over a set of enabled flags.
///
/// A predicate is a flag name, optionally negated with a leading `!`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    flags: BTreeSet<String>,
}

impl FlagSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self, flag: impl Into<String>) {
        self.flags.insert(flag.into());
    }

    #[must_use]
    pub fn is_enabled(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

impl<S: Into<String>> FromIterator<S> for FlagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            flags: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl ConditionEvaluator for FlagSet {
    fn evaluate(&self, predicate: &str, _declared_by: &str) -> bool {
        let predicate = predicate.trim();
        predicate.strip_prefix('!').map_or_else(
            || self.is_enabled(predicate),
            |negated| !self.is_enabled(negated.trim()),
        )
    }
}
