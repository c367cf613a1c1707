//! Package metadata and raw autoload declarations as they appear in manifests.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A manifest value that is either one path or a list of paths.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PathList {
    One(String),
    Many(Vec<String>),
}

impl PathList {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            Self::One(p) => std::slice::from_ref(p),
            Self::Many(ps) => ps,
        };
        slice.iter().map(String::as_str)
    }

    fn extend(&mut self, other: &Self) {
        let mut merged: Vec<String> = self.iter().map(str::to_string).collect();
        merged.extend(other.iter().map(str::to_string));
        *self = Self::Many(merged);
    }
}

impl From<&str> for PathList {
    fn from(path: &str) -> Self {
        Self::One(path.to_string())
    }
}

/// Autoload declarations of one package, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AutoloadRules {
    #[serde(default, rename = "psr-0", skip_serializing_if = "IndexMap::is_empty")]
    pub psr0: IndexMap<String, PathList>,
    #[serde(default, rename = "psr-4", skip_serializing_if = "IndexMap::is_empty")]
    pub psr4: IndexMap<String, PathList>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classmap: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(
        default,
        rename = "exclude-from-classmap",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub exclude_from_classmap: Vec<String>,
}

impl AutoloadRules {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.psr0.is_empty()
            && self.psr4.is_empty()
            && self.classmap.is_empty()
            && self.files.is_empty()
            && self.exclude_from_classmap.is_empty()
    }

    /// Structural merge: namespace keys present in both get their paths
    /// concatenated, lists are appended.
    pub fn merge(&mut self, other: &Self) {
        for (namespace, paths) in &other.psr0 {
            match self.psr0.get_mut(namespace) {
                Some(existing) => existing.extend(paths),
                None => {
                    self.psr0.insert(namespace.clone(), paths.clone());
                }
            }
        }
        for (namespace, paths) in &other.psr4 {
            match self.psr4.get_mut(namespace) {
                Some(existing) => existing.extend(paths),
                None => {
                    self.psr4.insert(namespace.clone(), paths.clone());
                }
            }
        }
        self.classmap.extend(other.classmap.iter().cloned());
        self.files.extend(other.files.iter().cloned());
        self.exclude_from_classmap
            .extend(other.exclude_from_classmap.iter().cloned());
    }
}

/// A resolved package as handed over by the dependency resolver.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Package {
    pub name: String,
    /// `None` for packages that are not installed (metapackages and the like).
    #[serde(default)]
    pub install_path: Option<PathBuf>,
    #[serde(default)]
    pub target_dir: Option<String>,
    #[serde(default)]
    pub autoload: AutoloadRules,
    #[serde(default)]
    pub autoload_dev: AutoloadRules,
    /// Names of required packages.
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default)]
    pub require_dev: Vec<String>,
    #[serde(default)]
    pub replace: Vec<String>,
    #[serde(default)]
    pub provide: Vec<String>,
    /// Installed only as a development requirement.
    #[serde(default)]
    pub dev: bool,
}

impl Package {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn installed_at(mut self, path: impl Into<PathBuf>) -> Self {
        self.install_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_autoload(mut self, autoload: AutoloadRules) -> Self {
        self.autoload = autoload;
        self
    }

    #[must_use]
    pub fn requiring<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.require.extend(names.into_iter().map(Into::into));
        self
    }

    /// Case-insensitive identity of the package.
    #[must_use]
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Every name this package answers to: its own, provided and replaced ones.
    pub fn names(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(self.key()).chain(
            self.provide
                .iter()
                .chain(&self.replace)
                .map(|n| n.to_lowercase()),
        )
    }

    #[must_use]
    pub fn target_dir(&self) -> Option<&str> {
        self.target_dir.as_deref().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_manifest_autoload() {
        let rules: AutoloadRules = serde_json::from_value(serde_json::json!({
            "psr-4": { "Acme\\": "src/", "Acme\\Tests\\": ["tests/", "fixtures/"] },
            "psr-0": { "Legacy_": "lib/" },
            "classmap": ["res/"],
            "files": ["helpers.php"],
            "exclude-from-classmap": ["**/Tests/"]
        }))
        .unwrap();

        let keys: Vec<&str> = rules.psr4.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Acme\\", "Acme\\Tests\\"]);
        assert_eq!(
            rules.psr4["Acme\\Tests\\"].iter().collect::<Vec<_>>(),
            vec!["tests/", "fixtures/"]
        );
        assert_eq!(rules.exclude_from_classmap, vec!["**/Tests/"]);
    }

    #[test]
    fn merge_appends_paths_for_shared_namespace() {
        let mut rules = AutoloadRules::default();
        rules.psr4.insert("Acme\\".into(), "src/".into());
        rules.files.push("a.php".into());

        let mut dev = AutoloadRules::default();
        dev.psr4.insert("Acme\\".into(), "tests/".into());
        dev.psr4.insert("Other\\".into(), "other/".into());
        dev.files.push("b.php".into());

        rules.merge(&dev);

        assert_eq!(
            rules.psr4["Acme\\"].iter().collect::<Vec<_>>(),
            vec!["src/", "tests/"]
        );
        assert!(rules.psr4.contains_key("Other\\"));
        assert_eq!(rules.files, vec!["a.php", "b.php"]);
    }

    #[test]
    fn names_include_replaced_and_provided() {
        let mut pkg = Package::new("Acme/Full");
        pkg.replace.push("acme/part".into());
        pkg.provide.push("psr/log-implementation".into());

        let names: Vec<String> = pkg.names().collect();
        assert_eq!(
            names,
            vec!["acme/full", "psr/log-implementation", "acme/part"]
        );
    }
}
