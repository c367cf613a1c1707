//! Aggregation of per-package autoload declarations into one rule set.
//!
//! Namespace and classmap rules are collected root first, then dependents
//! before their dependencies, so the root's directories come first for a
//! shared namespace. Files and exclude patterns are collected dependencies
//! first, with the root last.

use indexmap::IndexMap;
use md5::{Digest, Md5};
use regex::Regex;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::sort::{filter_dev_packages, sort_packages, DevFilter};
use crate::classmap::{normalize_path, slashed};
use crate::error::{Error, Result};
use crate::package::{AutoloadRules, Package, PathList};

static SLASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new("/+").expect("static regex"));

/// Leading `./` and `../` segments of an escaped exclude pattern.
static UPDIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(?:\\\.){1,2}/)+").expect("static regex"));

/// A files entry dropped because an earlier identifier includes the same file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateFile {
    pub identifier: String,
    pub path: PathBuf,
    pub duplicate_of: String,
}

/// Merged autoload rules of a whole package set.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AutoloadRuleSet {
    #[serde(rename = "psr-0")]
    pub psr0: IndexMap<String, Vec<PathBuf>>,
    #[serde(rename = "psr-4")]
    pub psr4: IndexMap<String, Vec<PathBuf>>,
    pub classmap: Vec<PathBuf>,
    /// Identifier to path, in inclusion order.
    pub files: IndexMap<String, PathBuf>,
    /// Anchored regular expressions over `/`-separated real paths.
    #[serde(rename = "exclude-from-classmap")]
    pub exclude: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub duplicate_files: Vec<DuplicateFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    Psr0,
    Psr4,
    Classmap,
    Files,
    ExcludeFromClassmap,
}

impl RuleType {
    /// `(namespace, path)` pairs declared for this type.
    fn entries(self, rules: &AutoloadRules) -> Vec<(Option<&str>, &str)> {
        fn namespaced(map: &IndexMap<String, PathList>) -> Vec<(Option<&str>, &str)> {
            map.iter()
                .flat_map(|(ns, paths)| paths.iter().map(move |p| (Some(ns.as_str()), p)))
                .collect()
        }
        fn plain(list: &[String]) -> Vec<(Option<&str>, &str)> {
            list.iter().map(|p| (None, p.as_str())).collect()
        }
        match self {
            Self::Psr0 => namespaced(&rules.psr0),
            Self::Psr4 => namespaced(&rules.psr4),
            Self::Classmap => plain(&rules.classmap),
            Self::Files => plain(&rules.files),
            Self::ExcludeFromClassmap => plain(&rules.exclude_from_classmap),
        }
    }

    fn honors_target_dir(self) -> bool {
        matches!(
            self,
            Self::Classmap | Self::Files | Self::ExcludeFromClassmap
        )
    }
}

/// An installed package with its resolved install path and effective rules.
struct Installed<'p> {
    package: &'p Package,
    install_path: PathBuf,
    is_root: bool,
    rules: Cow<'p, AutoloadRules>,
}

/// Reject declarations that cannot be honoured.
pub fn validate_package(package: &Package) -> Result<()> {
    for rules in [&package.autoload, &package.autoload_dev] {
        if package.target_dir().is_some() && !rules.psr4.is_empty() {
            return Err(Error::Psr4WithTargetDir {
                package: package.name.clone(),
            });
        }
        if let Some(namespace) = rules
            .psr4
            .keys()
            .find(|ns| !ns.is_empty() && !ns.ends_with('\\'))
        {
            return Err(Error::InvalidPsr4Namespace {
                package: package.name.clone(),
                namespace: namespace.clone(),
            });
        }
    }
    Ok(())
}

/// Merge the autoload rules of `root` and `packages`.
///
/// `packages` may or may not contain the root itself. Relative install paths
/// are resolved against `base_dir`, which is also the root's install path.
/// With `dev_mode` the root's dev rules are merged into its regular ones.
pub fn aggregate(
    root: &Package,
    packages: &[Package],
    base_dir: &Path,
    dev_mode: bool,
    dev_filter: DevFilter<'_>,
) -> Result<AutoloadRuleSet> {
    validate_package(root)?;
    for package in packages {
        validate_package(package)?;
    }

    let dependencies: Vec<&Package> = packages.iter().filter(|p| p.key() != root.key()).collect();
    let dependencies = filter_dev_packages(dependencies, root, dev_filter);
    let sorted = sort_packages(&dependencies, Some(root));

    let base_dir = normalize_path(base_dir);
    let mut installed: Vec<Installed<'_>> = sorted
        .into_iter()
        .filter_map(|package| install(package, &base_dir))
        .collect();

    let mut root_rules = Cow::Borrowed(&root.autoload);
    if dev_mode {
        root_rules.to_mut().merge(&root.autoload_dev);
    }
    installed.push(Installed {
        package: root,
        install_path: base_dir.clone(),
        is_root: true,
        rules: root_rules,
    });

    let reversed: Vec<&Installed<'_>> = installed.iter().rev().collect();
    let in_order: Vec<&Installed<'_>> = installed.iter().collect();

    let mut set = AutoloadRuleSet {
        psr0: collect_namespaces(&reversed, RuleType::Psr0)?,
        psr4: collect_namespaces(&reversed, RuleType::Psr4)?,
        ..AutoloadRuleSet::default()
    };

    for_each_path(&reversed, RuleType::Classmap, |entry, _, path| {
        set.classmap.push(resolve(entry, &path));
        Ok(())
    })?;

    let mut files = IndexMap::new();
    for_each_path(&in_order, RuleType::Files, |entry, _, path| {
        files.insert(
            file_identifier(&entry.package.name, &path),
            resolve(entry, &path),
        );
        Ok(())
    })?;
    let (files, duplicates) = drop_duplicate_files(files);
    set.files = files;
    set.duplicate_files = duplicates;

    for_each_path(&in_order, RuleType::ExcludeFromClassmap, |entry, _, path| {
        let Some(pattern) = exclusion_pattern(&entry.install_path, &path) else {
            tracing::debug!(
                package = %entry.package.name,
                pattern = %path,
                "exclude pattern base does not exist, skipping"
            );
            return Ok(());
        };
        Regex::new(&pattern).map_err(|e| Error::InvalidRule {
            package: entry.package.name.clone(),
            message: format!("exclude-from-classmap pattern '{path}': {e}"),
        })?;
        set.exclude.push(pattern);
        Ok(())
    })?;

    Ok(set)
}

fn install<'p>(package: &'p Package, base_dir: &Path) -> Option<Installed<'p>> {
    let Some(path) = package.install_path.as_deref() else {
        tracing::debug!(package = %package.name, "not installed, skipping");
        return None;
    };
    let mut install_path = normalize_path(&base_dir.join(path));

    // the installer nests target-dir packages below their declared directory
    if let Some(target_dir) = package.target_dir() {
        if install_path.ends_with(target_dir) {
            for _ in Path::new(target_dir).components() {
                install_path.pop();
            }
        }
    }

    Some(Installed {
        package,
        install_path,
        is_root: false,
        rules: Cow::Borrowed(&package.autoload),
    })
}

/// Shared walk over every declared path of `rule`, with namespaces trimmed
/// and target-dir adjustments applied.
fn for_each_path<F>(entries: &[&Installed<'_>], rule: RuleType, mut handle: F) -> Result<()>
where
    F: FnMut(&Installed<'_>, Option<String>, String) -> Result<()>,
{
    for &entry in entries {
        for (namespace, path) in rule.entries(&entry.rules) {
            let namespace = namespace.map(|ns| ns.trim_start_matches('\\').to_string());
            let path = apply_target_dir(entry, rule, path);
            handle(entry, namespace, path)?;
        }
    }
    Ok(())
}

/// Namespace to directories, most specific namespace first.
fn collect_namespaces(
    entries: &[&Installed<'_>],
    rule: RuleType,
) -> Result<IndexMap<String, Vec<PathBuf>>> {
    let mut map: IndexMap<String, Vec<PathBuf>> = IndexMap::new();
    for_each_path(entries, rule, |entry, namespace, path| {
        map.entry(namespace.unwrap_or_default())
            .or_default()
            .push(resolve(entry, &path));
        Ok(())
    })?;
    map.sort_by(|a, _, b, _| b.cmp(a));
    Ok(map)
}

/// Paths of legacy target-dir packages may be written with or without the
/// target directory. Only paths that do not exist as written are adjusted.
fn apply_target_dir(entry: &Installed<'_>, rule: RuleType, path: &str) -> String {
    let Some(target_dir) = entry.package.target_dir() else {
        return path.to_string();
    };
    if !rule.honors_target_dir() || entry.install_path.join(path).exists() {
        return path.to_string();
    }

    if !entry.is_root {
        return format!("{target_dir}/{path}");
    }

    let trimmed = path.trim_start_matches(['\\', '/']);
    let target = target_dir.replace('\\', "/");
    let target = target.trim_matches('/');
    if trimmed.replace('\\', "/").starts_with(target) {
        trimmed[target.len()..]
            .trim_start_matches(['\\', '/'])
            .to_string()
    } else {
        trimmed.to_string()
    }
}

fn resolve(entry: &Installed<'_>, path: &str) -> PathBuf {
    normalize_path(&entry.install_path.join(path))
}

/// Stable identifier of a files entry, independent of the file's contents.
pub fn file_identifier(package_name: &str, path: &str) -> String {
    format!("{:x}", Md5::digest(format!("{package_name}:{path}").as_bytes()))
}

fn drop_duplicate_files(
    files: IndexMap<String, PathBuf>,
) -> (IndexMap<String, PathBuf>, Vec<DuplicateFile>) {
    let mut first_by_path: HashMap<PathBuf, String> = HashMap::new();
    let mut kept = IndexMap::with_capacity(files.len());
    let mut duplicates = Vec::new();

    for (identifier, path) in files {
        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        match first_by_path.get(&key) {
            Some(first) => duplicates.push(DuplicateFile {
                identifier,
                path,
                duplicate_of: first.clone(),
            }),
            None => {
                first_by_path.insert(key, identifier.clone());
                kept.insert(identifier, path);
            }
        }
    }
    (kept, duplicates)
}

/// Translate one exclude-from-classmap entry into a regular expression
/// anchored at the real install path. `None` when the base does not exist.
pub fn exclusion_pattern(install_path: &Path, raw: &str) -> Option<String> {
    let unified = raw.replace('\\', "/");
    let escaped = regex::escape(unified.trim_matches('/'));
    let collapsed = SLASHES.replace_all(&escaped, "/");
    let translated = collapsed
        .replace(r"\*\*", ".+?")
        .replace(r"\*", "[^/]+?");

    let (updir, rest) = match UPDIR.find(&translated) {
        Some(m) => (m.as_str().replace(r"\.", "."), &translated[m.end()..]),
        None => (String::new(), translated.as_str()),
    };

    let resolved = fs::canonicalize(install_path.join(updir)).ok()?;
    Some(format!(
        "{}/{}($|/)",
        regex::escape(&slashed(&resolved)),
        rest
    ))
}

/// Combine the exclude patterns relevant to a scan of `dir`.
///
/// When `dir` exists, patterns whose literal prefix neither contains nor
/// extends its real path cannot match anything below it and are dropped.
pub fn build_exclusion_regex(dir: &Path, excluded: &[String]) -> Result<Option<Regex>> {
    let mut kept: Vec<&str> = excluded.iter().map(String::as_str).collect();

    if let Ok(real) = fs::canonicalize(dir) {
        let dir_match = regex::escape(&slashed(&real));
        kept.retain(|pattern| {
            let prefix = literal_prefix(pattern);
            prefix.starts_with(dir_match.as_str()) || dir_match.starts_with(prefix)
        });
    }

    if kept.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!("({})", kept.join("|")))
        .map(Some)
        .map_err(|e| Error::InvalidRule {
            package: "exclude-from-classmap".to_string(),
            message: e.to_string(),
        })
}

/// Leading part of `pattern` up to the first unescaped regex metacharacter.
fn literal_prefix(pattern: &str) -> &str {
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if bytes.get(i + 1).is_some_and(u8::is_ascii_punctuation) => i += 2,
            b'.' | b'+' | b'*' | b'?' | b'[' | b'^' | b']' | b'$' | b'(' | b')' | b'{'
            | b'}' | b'=' | b'!' | b'<' | b'>' | b'|' | b':' | b'\\' | b'#' | b'-' => break,
            _ => i += 1,
        }
    }
    &pattern[..i]
}
