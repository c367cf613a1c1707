mod cache;
mod cleaner;
mod filter;
mod parser;
mod walker;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use cache::DeclarationCache;
pub use filter::{filter_by_namespace, Convention, Filtered, NamespaceRule};
pub use parser::find_classes;
pub use walker::{DirectoryScanner, ScanFragment, ScanStats, ScannedFiles};
pub(crate) use walker::{normalize_path, slashed};

/// A class found under a namespace rule in a file whose location does not
/// match the rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PsrViolation {
    pub class: String,
    pub path: PathBuf,
    pub message: String,
}

/// A class declared by more than one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguousClass {
    pub class: String,
    /// Path kept in the map.
    pub winner: PathBuf,
    /// Every other path, in discovery order.
    pub others: Vec<PathBuf>,
}

/// Class name to file path mapping built up over one generation pass.
///
/// The first path recorded for a class wins; later different paths are kept
/// as ambiguities.
#[derive(Debug, Default, Clone)]
pub struct ClassMap {
    map: BTreeMap<String, PathBuf>,
    ambiguous: IndexMap<String, Vec<PathBuf>>,
    psr_violations: Vec<PsrViolation>,
}

impl ClassMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&mut self, class: impl Into<String>, path: impl Into<PathBuf>) {
        let class = class.into();
        let path = path.into();
        match self.map.get(&class) {
            None => {
                self.map.insert(class, path);
            }
            Some(existing) if *existing == path => {}
            Some(_) => {
                let others = self.ambiguous.entry(class).or_default();
                if !others.contains(&path) {
                    others.push(path);
                }
            }
        }
    }

    /// Record `class` at `path` regardless of what was found by scanning.
    pub fn set_class(&mut self, class: impl Into<String>, path: impl Into<PathBuf>) {
        let class = class.into();
        self.ambiguous.shift_remove(&class);
        self.map.insert(class, path.into());
    }

    /// Add a scan result in its discovery order.
    pub fn absorb(&mut self, fragment: ScanFragment) {
        for (class, path) in fragment.entries {
            self.add_class(class, path);
        }
        self.psr_violations.extend(fragment.violations);
    }

    pub fn add_psr_violation(&mut self, violation: PsrViolation) {
        self.psr_violations.push(violation);
    }

    #[must_use]
    pub fn get_class_path(&self, class: &str) -> Option<&Path> {
        self.map.get(class).map(PathBuf::as_path)
    }

    #[must_use]
    pub fn has_class(&self, class: &str) -> bool {
        self.map.contains_key(class)
    }

    /// The whole map, sorted by class name.
    #[must_use]
    pub fn map(&self) -> &BTreeMap<String, PathBuf> {
        &self.map
    }

    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, PathBuf> {
        self.map
    }

    /// Ambiguous classes, leaving out alternative paths that match `filter`.
    /// A class whose alternatives are all filtered out is not reported.
    #[must_use]
    pub fn ambiguous_classes(&self, filter: Option<&Regex>) -> Vec<AmbiguousClass> {
        self.ambiguous
            .iter()
            .filter_map(|(class, paths)| {
                let others: Vec<PathBuf> = paths
                    .iter()
                    .filter(|p| {
                        filter.is_none_or(|re| !re.is_match(&slashed(p)))
                    })
                    .cloned()
                    .collect();
                if others.is_empty() {
                    return None;
                }
                let winner = self.map.get(class)?.clone();
                Some(AmbiguousClass {
                    class: class.clone(),
                    winner,
                    others,
                })
            })
            .collect()
    }

    #[must_use]
    pub fn psr_violations(&self) -> &[PsrViolation] {
        &self.psr_violations
    }

    /// Forget violations for files under `prefix`.
    pub fn clear_psr_violations_by_path(&mut self, prefix: &Path) {
        self.psr_violations.retain(|v| !v.path.starts_with(prefix));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
