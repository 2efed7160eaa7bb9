//! Differential change notifications from the host project model
//!
//! The host reports one `RuleChange` per watched rule. When a rule changed,
//! its after-image is the complete current content of the rule, never a
//! delta. Unchanged rules may be omitted entirely.

use crate::error::{FutdError, FutdResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Names of the rules, properties and metadata the check consumes.
pub mod rules {
    /// General project properties
    pub const CONFIGURATION_GENERAL: &str = "ConfigurationGeneral";
    /// Resolved analyzer references
    pub const RESOLVED_ANALYZER_REFERENCE: &str = "ResolvedAnalyzerReference";
    /// Resolved compilation references
    pub const RESOLVED_COMPILATION_REFERENCE: &str = "ResolvedCompilationReference";
    /// Custom inputs
    pub const UP_TO_DATE_CHECK_INPUT: &str = "UpToDateCheckInput";
    /// Custom outputs
    pub const UP_TO_DATE_CHECK_OUTPUT: &str = "UpToDateCheckOutput";
    /// Built (and copied) outputs
    pub const UP_TO_DATE_CHECK_BUILT: &str = "UpToDateCheckBuilt";
    /// This project's copy marker
    pub const COPY_UP_TO_DATE_MARKER: &str = "CopyUpToDateMarker";
    /// Item type schema
    pub const ITEM_TYPE: &str = "ItemType";

    /// `ConfigurationGeneral` property: full path of the project file
    pub const PROJECT_FULL_PATH_PROPERTY: &str = "MSBuildProjectFullPath";
    /// `ConfigurationGeneral` property: project directory
    pub const PROJECT_DIRECTORY_PROPERTY: &str = "MSBuildProjectDirectory";
    /// `ConfigurationGeneral` property: output directory
    pub const OUTPUT_PATH_PROPERTY: &str = "OutputPath";
    /// `ConfigurationGeneral` property: imported project files, newest first
    pub const ALL_PROJECTS_PROPERTY: &str = "MSBuildAllProjects";
    /// `ConfigurationGeneral` property: opt out of the check
    pub const DISABLE_PROPERTY: &str = "DisableFastUpToDateCheck";

    /// Metadata: set an input or output belongs to
    pub const SET_METADATA: &str = "Set";
    /// Metadata: kind an input or output belongs to
    pub const KIND_METADATA: &str = "Kind";
    /// Metadata: source of a copied built output
    pub const ORIGINAL_METADATA: &str = "Original";
    /// Metadata: resolved path of a reference
    pub const RESOLVED_PATH_METADATA: &str = "ResolvedPath";
    /// Metadata: marker file of a referenced project
    pub const COPY_UP_TO_DATE_MARKER_METADATA: &str = "CopyUpToDateMarker";
    /// Metadata: copy behavior of a source item
    pub const COPY_TO_OUTPUT_DIRECTORY_METADATA: &str = "CopyToOutputDirectory";
    /// Metadata: project tree location of a source item
    pub const LINK_METADATA: &str = "Link";
    /// Metadata: explicit location under the output directory
    pub const TARGET_PATH_METADATA: &str = "TargetPath";
    /// Metadata on `ItemType` items: whether items of the type are inputs
    pub const UP_TO_DATE_CHECK_INPUT_METADATA: &str = "UpToDateCheckInput";

    /// Global property: semicolon-separated kinds to ignore for one check
    pub const IGNORE_KINDS_GLOBAL_PROPERTY: &str = "FastUpToDateCheckIgnoresKinds";
}

/// Item metadata by name.
pub type Metadata = BTreeMap<String, String>;

/// Full content of one rule at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSnapshot {
    /// Rule properties
    pub properties: BTreeMap<String, String>,
    /// Items by include, with their metadata
    pub items: BTreeMap<String, Metadata>,
}

impl RuleSnapshot {
    /// Non-empty property value.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Builder-style helper to add a property.
    #[must_use]
    pub fn with_property(mut self, name: &str, value: impl Into<String>) -> Self {
        let _ = self.properties.insert(name.to_string(), value.into());
        self
    }

    /// Builder-style helper to add an item with metadata.
    #[must_use]
    pub fn with_item(mut self, include: impl Into<String>, metadata: &[(&str, &str)]) -> Self {
        let metadata = metadata
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let _ = self.items.insert(include.into(), metadata);
        self
    }
}

/// Non-empty metadata value of an item.
#[must_use]
pub fn metadata_value<'a>(metadata: &'a Metadata, name: &str) -> Option<&'a str> {
    metadata
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Parse an MSBuild-style boolean (`true`/`false`, case-insensitive).
#[must_use]
pub fn parse_bool(value: Option<&str>) -> Option<bool> {
    match value.map(str::trim) {
        Some(v) if v.eq_ignore_ascii_case("true") => Some(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Differential for one rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleChange {
    /// Whether the rule changed since the previous notification
    pub has_changes: bool,
    /// Complete content after the change
    #[serde(default)]
    pub after: RuleSnapshot,
}

impl RuleChange {
    /// A change carrying `after` as the new content.
    #[must_use]
    pub fn changed(after: RuleSnapshot) -> Self {
        Self {
            has_changes: true,
            after,
        }
    }

    /// A differential reporting no change.
    #[must_use]
    pub fn unchanged(after: RuleSnapshot) -> Self {
        Self {
            has_changes: false,
            after,
        }
    }
}

/// One notification: every watched rule plus source items by item type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectChangeBundle {
    /// Monotonic configuration version token
    pub version: u64,
    /// Rule differentials by rule name
    pub rules: BTreeMap<String, RuleChange>,
    /// Source item differentials by item type
    pub source_items: BTreeMap<String, RuleChange>,
}

impl ProjectChangeBundle {
    /// Empty bundle at `version`.
    #[must_use]
    pub fn new(version: u64) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Record a changed rule.
    #[must_use]
    pub fn with_rule(mut self, rule: &str, after: RuleSnapshot) -> Self {
        let _ = self.rules.insert(rule.to_string(), RuleChange::changed(after));
        self
    }

    /// Record changed source items of one item type.
    #[must_use]
    pub fn with_source_items(mut self, item_type: &str, after: RuleSnapshot) -> Self {
        let _ = self
            .source_items
            .insert(item_type.to_string(), RuleChange::changed(after));
        self
    }

    /// After-image of `rule` if, and only if, it changed.
    #[must_use]
    pub fn changed(&self, rule: &str) -> Option<&RuleSnapshot> {
        self.rules
            .get(rule)
            .filter(|change| change.has_changes)
            .map(|change| &change.after)
    }

    /// Whether any source item type reported a change.
    #[must_use]
    pub fn any_source_items_changed(&self) -> bool {
        self.source_items.values().any(|change| change.has_changes)
    }
}

/// A project described on disk: one change bundle per configuration.
///
/// Each bundle is applied to an empty state, so it must carry every rule
/// the check needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSnapshot {
    /// Display name of the project
    pub project: String,
    /// Bundles by configuration (for example target framework)
    pub configurations: BTreeMap<String, ProjectChangeBundle>,
}

impl ProjectSnapshot {
    /// Load a snapshot from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, is not valid JSON, or names no
    /// configuration.
    pub fn load(path: &Path) -> FutdResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| FutdError::io(path, e))?;
        let snapshot: Self = serde_json::from_str(&json).map_err(|e| FutdError::json(path, e))?;
        if snapshot.configurations.is_empty() {
            return Err(FutdError::InvalidChange(format!(
                "{} defines no configurations",
                path.display()
            )));
        }
        Ok(snapshot)
    }
}
