//! Checks extracted class names against the PSR-0 / PSR-4 layout of the rule
//! that found them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};

use super::PsrViolation;

/// Directory layout convention a namespace rule follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Convention {
    #[serde(rename = "psr-0")]
    Psr0,
    #[serde(rename = "psr-4")]
    Psr4,
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Psr0 => "psr-0",
            Self::Psr4 => "psr-4",
        })
    }
}

/// A namespace prefix bound to the convention its base directory follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRule {
    pub namespace: String,
    pub convention: Convention,
}

impl NamespaceRule {
    pub fn new(namespace: impl Into<String>, convention: Convention) -> Self {
        Self {
            namespace: namespace.into(),
            convention,
        }
    }

    /// Path (relative to the base directory, `/`-separated, without
    /// extension) where `class` must live under this rule.
    fn expected_sub_path(&self, class: &str) -> Option<String> {
        match self.convention {
            Convention::Psr0 => Some(match class.rfind('\\') {
                Some(sep) => {
                    let (namespace, name) = class.split_at(sep + 1);
                    format!("{}{}", namespace.replace('\\', "/"), name.replace('_', "/"))
                }
                None => class.replace('_', "/"),
            }),
            Convention::Psr4 => class
                .strip_prefix(self.namespace.as_str())
                .map(|sub| sub.replace('\\', "/")),
        }
    }
}

/// Outcome of checking one file's classes.
#[derive(Debug, Default)]
pub struct Filtered {
    pub valid: Vec<String>,
    pub violations: Vec<PsrViolation>,
}

/// Keep the classes whose location matches `rule`.
///
/// When none matches, every class becomes a violation and nothing is kept, so
/// the file stays available to later rules. When at least one matches, the
/// others are dropped silently.
pub fn filter_by_namespace(
    classes: Vec<String>,
    file: &Path,
    base: &Path,
    rule: &NamespaceRule,
    display_root: &Path,
) -> Filtered {
    let real_sub_path = sub_path_without_extension(file, base);

    let (valid, rejected): (Vec<String>, Vec<String>) =
        classes.into_iter().partition(|class| {
            real_sub_path.is_some() && rule.expected_sub_path(class) == real_sub_path
        });

    if !valid.is_empty() {
        return Filtered {
            valid,
            violations: Vec::new(),
        };
    }

    let short_file = short_path(file, display_root);
    let short_base = short_path(base, display_root);
    let violations = rejected
        .into_iter()
        .map(|class| {
            let message = format!(
                "Class {class} located in {short_file} does not comply with {} autoloading standard (rule: {} => {short_base}). Skipping.",
                rule.convention, rule.namespace,
            );
            PsrViolation {
                class,
                path: file.to_path_buf(),
                message,
            }
        })
        .collect();

    Filtered {
        valid: Vec::new(),
        violations,
    }
}

/// `file` relative to `base`, `/`-separated, cut at the last `.`.
fn sub_path_without_extension(file: &Path, base: &Path) -> Option<String> {
    let relative = file.strip_prefix(base).ok()?;
    let mut sub = join_slash(relative);
    if let Some(dot) = sub.rfind('.') {
        sub.truncate(dot);
    }
    Some(sub)
}

fn join_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Render `path` relative to `root` as `./sub/path` when it lies inside it.
pub(crate) fn short_path(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => format!("./{}", join_slash(rel)),
        Err(_) => path.to_string_lossy().replace('\\', "/"),
    }
}
