//! Immutable per-configuration project state
//!
//! A `ProjectState` is never modified in place. `update` folds one change
//! notification into a new value; every category whose rule reported no
//! change is carried forward by sharing the same `Arc`.

use crate::change::{metadata_value, parse_bool, rules, ProjectChangeBundle, RuleSnapshot};
use crate::items::{
    add_path, make_rooted, CopyType, PathsBySetAndKind, UpToDateCheckItem, DEFAULT_KIND_NAME,
    DEFAULT_SET_NAME,
};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Tracked source items by item type.
pub type ItemsByItemType = BTreeMap<String, BTreeSet<UpToDateCheckItem>>;

/// Everything the check needs to know about one project configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectState {
    /// Full path of the project file
    pub project_full_path: Option<PathBuf>,

    /// Directory relative paths are resolved against
    pub project_directory: PathBuf,

    /// `OutputPath` as evaluated, relative to the project directory or absolute
    pub output_relative_or_full_path: Option<String>,

    /// Most recently written import of the project
    pub newest_import_input: Option<PathBuf>,

    /// The project opted out of the check
    pub is_disabled: bool,

    /// Tracked item types, mapped to whether their items are build inputs
    pub item_types: Arc<BTreeMap<String, bool>>,

    /// Tracked source items
    pub items_by_item_type: Arc<ItemsByItemType>,

    /// Custom inputs by set and kind
    pub custom_inputs_by_set: Arc<PathsBySetAndKind>,

    /// Custom outputs by set and kind
    pub custom_outputs_by_set: Arc<PathsBySetAndKind>,

    /// Built outputs by set and kind
    pub built_outputs_by_set: Arc<PathsBySetAndKind>,

    /// Outputs copied rather than built: destination to source
    pub copied_output_files: Arc<BTreeMap<PathBuf, PathBuf>>,

    /// Resolved analyzer references
    pub analyzer_reference_paths: Arc<BTreeSet<PathBuf>>,

    /// Resolved compilation references
    pub compilation_reference_paths: Arc<BTreeSet<PathBuf>>,

    /// Copy markers of referenced projects
    pub copy_reference_input_paths: Arc<BTreeSet<PathBuf>>,

    /// This project's own copy marker
    pub copy_up_to_date_marker: Option<PathBuf>,

    /// When the set of tracked items last changed; `None` when unknown
    pub last_items_changed_at_utc: Option<DateTime<Utc>>,

    /// Start of the previous completed check; `None` when never checked
    pub last_checked_at_utc: Option<DateTime<Utc>>,

    /// Timestamps above were recovered from persisted state
    pub was_state_restored: bool,

    /// Configuration version of the last folded notification
    pub version: u64,
}

impl ProjectState {
    /// Fold a change notification into a new state.
    ///
    /// `now` stamps `last_items_changed_at_utc` when the tracked items
    /// change after the initial load.
    #[must_use]
    pub fn update(&self, change: &ProjectChangeBundle, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version = change.version;

        if let Some(general) = change.changed(rules::CONFIGURATION_GENERAL) {
            next.apply_configuration_general(general);
        }

        let base = next.project_directory.clone();

        if let Some(rule) = change.changed(rules::RESOLVED_ANALYZER_REFERENCE) {
            next.analyzer_reference_paths = Arc::new(reference_paths(rule, &base));
        }

        if let Some(rule) = change.changed(rules::RESOLVED_COMPILATION_REFERENCE) {
            next.compilation_reference_paths = Arc::new(reference_paths(rule, &base));
            next.copy_reference_input_paths = Arc::new(
                rule.items
                    .values()
                    .filter_map(|metadata| {
                        metadata_value(metadata, rules::COPY_UP_TO_DATE_MARKER_METADATA)
                    })
                    .map(|marker| make_rooted(&base, marker))
                    .collect(),
            );
        }

        if let Some(rule) = change.changed(rules::UP_TO_DATE_CHECK_INPUT) {
            next.custom_inputs_by_set = Arc::new(paths_by_set(rule, &base));
        }

        if let Some(rule) = change.changed(rules::UP_TO_DATE_CHECK_OUTPUT) {
            next.custom_outputs_by_set = Arc::new(paths_by_set(rule, &base));
        }

        if let Some(rule) = change.changed(rules::UP_TO_DATE_CHECK_BUILT) {
            let mut built = PathsBySetAndKind::new();
            let mut copied = BTreeMap::new();
            for (include, metadata) in &rule.items {
                let destination = make_rooted(&base, include);
                if let Some(original) = metadata_value(metadata, rules::ORIGINAL_METADATA) {
                    let _ = copied.insert(destination, make_rooted(&base, original));
                } else {
                    let (set, kind) = set_and_kind(metadata);
                    add_path(&mut built, set, kind, destination);
                }
            }
            next.built_outputs_by_set = Arc::new(built);
            next.copied_output_files = Arc::new(copied);
        }

        if let Some(rule) = change.changed(rules::COPY_UP_TO_DATE_MARKER) {
            next.copy_up_to_date_marker = rule.items.keys().next().map(|p| make_rooted(&base, p));
        }

        next.apply_source_items(change, now);
        next
    }

    fn apply_configuration_general(&mut self, general: &RuleSnapshot) {
        self.project_full_path = general
            .property(rules::PROJECT_FULL_PATH_PROPERTY)
            .map(PathBuf::from);

        self.project_directory = general
            .property(rules::PROJECT_DIRECTORY_PROPERTY)
            .map(PathBuf::from)
            .or_else(|| {
                self.project_full_path
                    .as_deref()
                    .and_then(Path::parent)
                    .map(Path::to_path_buf)
            })
            .unwrap_or_default();

        self.output_relative_or_full_path = general
            .property(rules::OUTPUT_PATH_PROPERTY)
            .map(str::to_string);

        // MSBuild lists imports newest first
        self.newest_import_input = general
            .property(rules::ALL_PROJECTS_PROPERTY)
            .and_then(|all| all.split(';').map(str::trim).find(|p| !p.is_empty()))
            .map(|p| make_rooted(&self.project_directory, p));

        self.is_disabled =
            parse_bool(general.property(rules::DISABLE_PROPERTY)).unwrap_or(false);
    }

    fn apply_source_items(&mut self, change: &ProjectChangeBundle, now: DateTime<Utc>) {
        let previous_types = Arc::clone(&self.item_types);

        let mut types_changed = false;
        if let Some(rule) = change.changed(rules::ITEM_TYPE) {
            let types: BTreeMap<String, bool> = rule
                .items
                .iter()
                .map(|(name, metadata)| {
                    let is_input = parse_bool(metadata_value(
                        metadata,
                        rules::UP_TO_DATE_CHECK_INPUT_METADATA,
                    ))
                    .unwrap_or(true);
                    (name.clone(), is_input)
                })
                .collect();
            if types != *self.item_types {
                self.item_types = Arc::new(types);
                types_changed = true;
            }
        }

        if !types_changed && !change.any_source_items_changed() {
            return;
        }

        let mut items = ItemsByItemType::new();
        for item_type in self.item_types.keys() {
            let fresh = change
                .source_items
                .get(item_type)
                .filter(|c| c.has_changes || !previous_types.contains_key(item_type));

            let set: BTreeSet<UpToDateCheckItem> = match fresh {
                Some(c) => c.after.items.iter().map(|(p, m)| source_item(p, m)).collect(),
                None => self
                    .items_by_item_type
                    .get(item_type)
                    .cloned()
                    .unwrap_or_default(),
            };
            if !set.is_empty() {
                let _ = items.insert(item_type.clone(), set);
            }
        }

        if items == *self.items_by_item_type {
            return;
        }

        self.items_by_item_type = Arc::new(items);

        // The first population after load is not a change to the item set
        if previous_types.is_empty() {
            debug!("Initial item load for {:?}, not stamping items change", self.project_full_path);
        } else {
            self.last_items_changed_at_utc = Some(now);
        }
    }

    /// Copy of this state with a new last-checked instant.
    #[must_use]
    pub fn with_last_checked_at_utc(&self, at: DateTime<Utc>) -> Self {
        Self {
            last_checked_at_utc: Some(at),
            ..self.clone()
        }
    }

    /// Copy of this state with timestamps recovered from a previous session.
    #[must_use]
    pub fn restored(
        &self,
        last_items_changed_at_utc: Option<DateTime<Utc>>,
        last_checked_at_utc: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            last_items_changed_at_utc,
            last_checked_at_utc,
            was_state_restored: true,
            ..self.clone()
        }
    }

    /// Whether no check has run for this configuration and no history was
    /// restored, so there is no earlier last-checked instant to compare with.
    #[must_use]
    pub fn is_first_run(&self) -> bool {
        self.last_checked_at_utc.is_none() && !self.was_state_restored
    }

    /// Whether any item type is tracked yet.
    #[must_use]
    pub fn has_item_types(&self) -> bool {
        !self.item_types.is_empty()
    }

    /// Rooted output directory.
    #[must_use]
    pub fn output_directory(&self) -> PathBuf {
        match &self.output_relative_or_full_path {
            Some(output) => make_rooted(&self.project_directory, output),
            None => self.project_directory.clone(),
        }
    }

    /// Items of types that count as build inputs, with their item type.
    pub fn input_items(&self) -> impl Iterator<Item = (&str, &UpToDateCheckItem)> {
        let types = &self.item_types;
        self.items_by_item_type
            .iter()
            .filter(move |(item_type, _)| types.get(*item_type).copied().unwrap_or(true))
            .flat_map(|(item_type, items)| items.iter().map(move |i| (item_type.as_str(), i)))
    }

    /// All tracked items regardless of input status.
    pub fn all_items(&self) -> impl Iterator<Item = (&str, &UpToDateCheckItem)> {
        self.items_by_item_type
            .iter()
            .flat_map(|(item_type, items)| items.iter().map(move |i| (item_type.as_str(), i)))
    }

    /// Every named set across inputs and outputs, excluding the default set.
    #[must_use]
    pub fn named_sets(&self) -> BTreeSet<&str> {
        self.custom_inputs_by_set
            .keys()
            .chain(self.custom_outputs_by_set.keys())
            .chain(self.built_outputs_by_set.keys())
            .map(String::as_str)
            .filter(|set| *set != DEFAULT_SET_NAME)
            .collect()
    }

    /// SHA-256 over the tracked items, stable across sessions.
    #[must_use]
    pub fn item_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (item_type, items) in self.items_by_item_type.iter() {
            for item in items {
                hasher.update(item_type.as_bytes());
                hasher.update(b"|");
                hasher.update(item.path.as_bytes());
                hasher.update(b"\n");
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

fn set_and_kind(metadata: &BTreeMap<String, String>) -> (&str, &str) {
    (
        metadata_value(metadata, rules::SET_METADATA).unwrap_or(DEFAULT_SET_NAME),
        metadata_value(metadata, rules::KIND_METADATA).unwrap_or(DEFAULT_KIND_NAME),
    )
}

fn paths_by_set(rule: &RuleSnapshot, base: &Path) -> PathsBySetAndKind {
    let mut map = PathsBySetAndKind::new();
    for (include, metadata) in &rule.items {
        let (set, kind) = set_and_kind(metadata);
        add_path(&mut map, set, kind, make_rooted(base, include));
    }
    map
}

fn reference_paths(rule: &RuleSnapshot, base: &Path) -> BTreeSet<PathBuf> {
    rule.items
        .iter()
        .map(|(include, metadata)| {
            let resolved = metadata_value(metadata, rules::RESOLVED_PATH_METADATA).unwrap_or(include.as_str());
            make_rooted(base, resolved)
        })
        .collect()
}

fn source_item(path: &str, metadata: &BTreeMap<String, String>) -> UpToDateCheckItem {
    UpToDateCheckItem {
        path: path.to_string(),
        link: metadata_value(metadata, rules::LINK_METADATA).map(str::to_string),
        copy_type: CopyType::from_metadata(metadata_value(
            metadata,
            rules::COPY_TO_OUTPUT_DIRECTORY_METADATA,
        )),
        target_path: metadata_value(metadata, rules::TARGET_PATH_METADATA).map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::RuleChange;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn general() -> RuleSnapshot {
        RuleSnapshot::default()
            .with_property(rules::PROJECT_FULL_PATH_PROPERTY, "/src/app/app.csproj")
            .with_property(rules::OUTPUT_PATH_PROPERTY, "bin/Debug/")
            .with_property(
                rules::ALL_PROJECTS_PROPERTY,
                "/sdk/Newest.targets;/sdk/Older.props",
            )
    }

    fn item_types() -> RuleSnapshot {
        RuleSnapshot::default()
            .with_item("Compile", &[(rules::UP_TO_DATE_CHECK_INPUT_METADATA, "true")])
            .with_item("None", &[(rules::UP_TO_DATE_CHECK_INPUT_METADATA, "false")])
    }

    fn loaded() -> ProjectState {
        let bundle = ProjectChangeBundle::new(1)
            .with_rule(rules::CONFIGURATION_GENERAL, general())
            .with_rule(rules::ITEM_TYPE, item_types())
            .with_source_items(
                "Compile",
                RuleSnapshot::default().with_item("a.cs", &[]).with_item("b.cs", &[]),
            )
            .with_source_items(
                "None",
                RuleSnapshot::default().with_item(
                    "appsettings.json",
                    &[(rules::COPY_TO_OUTPUT_DIRECTORY_METADATA, "PreserveNewest")],
                ),
            );
        ProjectState::default().update(&bundle, at(1_000))
    }

    #[test]
    fn configuration_general_properties() {
        let state = loaded();
        assert_eq!(state.project_full_path, Some(PathBuf::from("/src/app/app.csproj")));
        assert_eq!(state.project_directory, PathBuf::from("/src/app"));
        assert_eq!(state.output_directory(), PathBuf::from("/src/app/bin/Debug/"));
        assert_eq!(state.newest_import_input, Some(PathBuf::from("/sdk/Newest.targets")));
        assert!(!state.is_disabled);
        assert_eq!(state.version, 1);

        let disabled = state.update(
            &ProjectChangeBundle::new(2).with_rule(
                rules::CONFIGURATION_GENERAL,
                general().with_property(rules::DISABLE_PROPERTY, "True"),
            ),
            at(2_000),
        );
        assert!(disabled.is_disabled);
    }

    #[test]
    fn initial_load_does_not_stamp_items_changed() {
        let state = loaded();
        assert_eq!(state.items_by_item_type.len(), 2);
        assert_eq!(state.last_items_changed_at_utc, None);
    }

    #[test]
    fn item_changes_after_load_are_stamped() {
        let state = loaded();
        let next = state.update(
            &ProjectChangeBundle::new(2).with_source_items(
                "Compile",
                RuleSnapshot::default().with_item("a.cs", &[]),
            ),
            at(2_000),
        );
        assert_eq!(next.last_items_changed_at_utc, Some(at(2_000)));
        assert_eq!(next.items_by_item_type["Compile"].len(), 1);
        // The other item type is carried over
        assert!(next.items_by_item_type.contains_key("None"));
    }

    #[test]
    fn identical_item_content_is_not_a_change() {
        let state = loaded();
        let next = state.update(
            &ProjectChangeBundle::new(2).with_source_items(
                "Compile",
                RuleSnapshot::default().with_item("b.cs", &[]).with_item("a.cs", &[]),
            ),
            at(2_000),
        );
        assert_eq!(next.last_items_changed_at_utc, None);
        assert!(Arc::ptr_eq(&state.items_by_item_type, &next.items_by_item_type));
    }

    #[test]
    fn unchanged_categories_are_shared() {
        let state = loaded();
        let mut bundle = ProjectChangeBundle::new(2).with_rule(
            rules::UP_TO_DATE_CHECK_OUTPUT,
            RuleSnapshot::default().with_item("obj/gen.txt", &[]),
        );
        let _ = bundle.rules.insert(
            rules::UP_TO_DATE_CHECK_INPUT.to_string(),
            RuleChange::unchanged(RuleSnapshot::default().with_item("ignored.txt", &[])),
        );
        let next = state.update(&bundle, at(2_000));

        assert!(Arc::ptr_eq(&state.custom_inputs_by_set, &next.custom_inputs_by_set));
        assert!(Arc::ptr_eq(&state.items_by_item_type, &next.items_by_item_type));
        assert!(Arc::ptr_eq(&state.analyzer_reference_paths, &next.analyzer_reference_paths));
        assert!(!Arc::ptr_eq(&state.custom_outputs_by_set, &next.custom_outputs_by_set));
        assert_eq!(
            next.custom_outputs_by_set[""][""],
            vec![PathBuf::from("/src/app/obj/gen.txt")]
        );
        // The previous state is untouched
        assert!(state.custom_outputs_by_set.is_empty());
    }

    #[test]
    fn built_outputs_split_into_built_and_copied() {
        let state = loaded().update(
            &ProjectChangeBundle::new(2).with_rule(
                rules::UP_TO_DATE_CHECK_BUILT,
                RuleSnapshot::default()
                    .with_item("bin/Debug/app.dll", &[])
                    .with_item("bin/Debug/app.xml", &[(rules::KIND_METADATA, "Docs")])
                    .with_item("bin/Debug/lib.dll", &[(rules::ORIGINAL_METADATA, "/ext/lib.dll")]),
            ),
            at(2_000),
        );

        assert_eq!(state.built_outputs_by_set[""][""], vec![PathBuf::from("/src/app/bin/Debug/app.dll")]);
        assert_eq!(state.built_outputs_by_set[""]["Docs"].len(), 1);
        assert_eq!(
            state.copied_output_files[&PathBuf::from("/src/app/bin/Debug/lib.dll")],
            PathBuf::from("/ext/lib.dll")
        );
    }

    #[test]
    fn references_and_markers() {
        let state = loaded().update(
            &ProjectChangeBundle::new(2)
                .with_rule(
                    rules::RESOLVED_COMPILATION_REFERENCE,
                    RuleSnapshot::default()
                        .with_item(
                            "../lib/lib.csproj",
                            &[
                                (rules::RESOLVED_PATH_METADATA, "/src/lib/bin/lib.dll"),
                                (rules::COPY_UP_TO_DATE_MARKER_METADATA, "/src/lib/obj/lib.marker"),
                            ],
                        )
                        .with_item("/nuget/pkg.dll", &[]),
                )
                .with_rule(
                    rules::RESOLVED_ANALYZER_REFERENCE,
                    RuleSnapshot::default().with_item("/nuget/analyzer.dll", &[]),
                )
                .with_rule(
                    rules::COPY_UP_TO_DATE_MARKER,
                    RuleSnapshot::default().with_item("obj/app.marker", &[]),
                ),
            at(2_000),
        );

        assert!(state.compilation_reference_paths.contains(Path::new("/src/lib/bin/lib.dll")));
        assert!(state.compilation_reference_paths.contains(Path::new("/nuget/pkg.dll")));
        assert_eq!(state.copy_reference_input_paths.len(), 1);
        assert!(state.analyzer_reference_paths.contains(Path::new("/nuget/analyzer.dll")));
        assert_eq!(state.copy_up_to_date_marker, Some(PathBuf::from("/src/app/obj/app.marker")));
    }

    #[test]
    fn non_input_item_types_are_tracked_but_not_inputs() {
        let state = loaded();
        let inputs: Vec<_> = state.input_items().map(|(t, i)| (t, i.path.as_str())).collect();
        assert_eq!(inputs, vec![("Compile", "a.cs"), ("Compile", "b.cs")]);
        assert_eq!(state.all_items().count(), 3);
    }

    #[test]
    fn dropping_an_item_type_drops_its_items() {
        let state = loaded();
        let next = state.update(
            &ProjectChangeBundle::new(2).with_rule(
                rules::ITEM_TYPE,
                RuleSnapshot::default().with_item("Compile", &[]),
            ),
            at(2_000),
        );
        assert!(!next.items_by_item_type.contains_key("None"));
        assert_eq!(next.last_items_changed_at_utc, Some(at(2_000)));
    }

    #[test]
    fn item_hash_tracks_item_paths() {
        let state = loaded();
        assert_eq!(state.item_hash(), loaded().item_hash());

        let next = state.update(
            &ProjectChangeBundle::new(2).with_source_items(
                "Compile",
                RuleSnapshot::default().with_item("c.cs", &[]),
            ),
            at(2_000),
        );
        assert_ne!(state.item_hash(), next.item_hash());
    }

    #[test]
    fn named_sets_exclude_default() {
        let state = loaded().update(
            &ProjectChangeBundle::new(2)
                .with_rule(
                    rules::UP_TO_DATE_CHECK_INPUT,
                    RuleSnapshot::default()
                        .with_item("a.ts", &[(rules::SET_METADATA, "Web")])
                        .with_item("x.txt", &[]),
                )
                .with_rule(
                    rules::UP_TO_DATE_CHECK_OUTPUT,
                    RuleSnapshot::default().with_item("out.js", &[(rules::SET_METADATA, "Bundle")]),
                ),
            at(2_000),
        );
        assert_eq!(state.named_sets().into_iter().collect::<Vec<_>>(), vec!["Bundle", "Web"]);
    }

    #[test]
    fn restore_and_last_checked_produce_new_values() {
        let state = loaded();
        let checked = state.with_last_checked_at_utc(at(5));
        assert_eq!(state.last_checked_at_utc, None);
        assert_eq!(checked.last_checked_at_utc, Some(at(5)));

        let restored = state.restored(Some(at(1)), Some(at(2)));
        assert!(restored.was_state_restored);
        assert_eq!(restored.last_items_changed_at_utc, Some(at(1)));
        assert!(Arc::ptr_eq(&state.items_by_item_type, &restored.items_by_item_type));
    }
}
