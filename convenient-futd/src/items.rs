//! Tracked items and grouped input/output paths

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the set that items belong to when they declare none.
pub const DEFAULT_SET_NAME: &str = "";

/// Name of the kind that items belong to when they declare none.
pub const DEFAULT_KIND_NAME: &str = "";

/// Paths grouped by kind, in declaration order within each kind.
pub type PathsByKind = BTreeMap<String, Vec<PathBuf>>;

/// Paths grouped by set, then by kind.
pub type PathsBySetAndKind = BTreeMap<String, PathsByKind>;

/// How a source item is copied to the output directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CopyType {
    /// Not copied
    #[default]
    Never,
    /// Copied on every build
    Always,
    /// Copied only when newer than the existing copy
    PreserveNewest,
}

impl CopyType {
    /// Parse the `CopyToOutputDirectory` metadata value.
    ///
    /// Unknown or missing values mean the item is not copied.
    #[must_use]
    pub fn from_metadata(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("Always") => Self::Always,
            Some(v) if v.eq_ignore_ascii_case("PreserveNewest") || v.eq_ignore_ascii_case("IfNewer") => {
                Self::PreserveNewest
            }
            _ => Self::Never,
        }
    }
}

impl fmt::Display for CopyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "Never"),
            Self::Always => write!(f, "Always"),
            Self::PreserveNewest => write!(f, "PreserveNewest"),
        }
    }
}

/// A source item tracked by the check.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UpToDateCheckItem {
    /// Item path as evaluated, usually relative to the project directory
    pub path: String,

    /// `Link` metadata: where the item appears in the project tree
    pub link: Option<String>,

    /// Copy behavior from `CopyToOutputDirectory`
    pub copy_type: CopyType,

    /// `TargetPath` metadata: explicit location below the output directory
    pub target_path: Option<String>,
}

impl UpToDateCheckItem {
    /// Create an item that is not copied to the output directory.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            link: None,
            copy_type: CopyType::Never,
            target_path: None,
        }
    }

    /// Set the copy behavior.
    #[must_use]
    pub fn with_copy_type(mut self, copy_type: CopyType) -> Self {
        self.copy_type = copy_type;
        self
    }

    /// Set the `Link` metadata.
    #[must_use]
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Set the `TargetPath` metadata.
    #[must_use]
    pub fn with_target_path(mut self, target_path: impl Into<String>) -> Self {
        self.target_path = Some(target_path.into());
        self
    }

    /// Path of the copy relative to the output directory.
    ///
    /// `TargetPath` wins, then `Link`, then the item path made relative to
    /// the project directory. Items outside the project directory land at
    /// the root of the output directory under their file name.
    #[must_use]
    pub fn destination_relative_path(&self, project_directory: &Path) -> PathBuf {
        if let Some(target) = self.target_path.as_deref().filter(|t| !t.is_empty()) {
            return PathBuf::from(target);
        }
        if let Some(link) = self.link.as_deref().filter(|l| !l.is_empty()) {
            return PathBuf::from(link);
        }

        let path = Path::new(&self.path);
        if path.is_relative() {
            return path.to_path_buf();
        }
        match path.strip_prefix(project_directory) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => path.file_name().map(PathBuf::from).unwrap_or_default(),
        }
    }
}

/// Resolve `path` against `base` unless it is already absolute.
#[must_use]
pub fn make_rooted(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

/// Append `path` under `set`/`kind`, keeping the first occurrence only.
pub fn add_path(map: &mut PathsBySetAndKind, set: &str, kind: &str, path: PathBuf) {
    let paths = map
        .entry(set.to_string())
        .or_default()
        .entry(kind.to_string())
        .or_default();
    if !paths.contains(&path) {
        paths.push(path);
    }
}

/// All paths of `set`, skipping kinds listed in `ignore_kinds`.
pub fn paths_in_set<'a>(
    map: &'a PathsBySetAndKind,
    set: &str,
    ignore_kinds: &'a BTreeSet<String>,
) -> impl Iterator<Item = (&'a str, &'a Path)> + use<'a> {
    map.get(set)
        .into_iter()
        .flat_map(|by_kind| by_kind.iter())
        .filter(move |(kind, _)| !ignore_kinds.contains(kind.as_str()))
        .flat_map(|(kind, paths)| paths.iter().map(move |p| (kind.as_str(), p.as_path())))
}
