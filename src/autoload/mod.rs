mod rules;
mod sort;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::classmap::{
    normalize_path, slashed, AmbiguousClass, ClassMap, Convention, DeclarationCache,
    DirectoryScanner, NamespaceRule, PsrViolation, ScanStats, ScannedFiles,
};
use crate::error::{Error, Result};
use crate::package::Package;

pub use rules::{
    aggregate, build_exclusion_regex, exclusion_pattern, file_identifier, validate_package,
    AutoloadRuleSet, DuplicateFile, RuleType,
};
pub use sort::{filter_dev_packages, sort_packages, DevFilter};

/// Always mapped to the copy shipped in the vendor directory.
pub const INSTALLED_VERSIONS_CLASS: &str = "Composer\\InstalledVersions";

const DEFAULT_AMBIGUOUS_FILTER: &str = r"(?i)/(test|fixture|example|stub)s?/";

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_extensions() -> Vec<String> {
    ["php", "inc", "hh"].map(String::from).to_vec()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    /// Project root; relative install paths resolve against it.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Defaults to `<base_dir>/vendor`.
    #[serde(default)]
    pub vendor_dir: Option<PathBuf>,
    #[serde(default)]
    pub dev_mode: bool,
    /// Also scan PSR-0 / PSR-4 directories into the class map.
    #[serde(default)]
    pub optimize: bool,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Alternative paths matching this are not reported as ambiguous.
    #[serde(default)]
    pub ambiguous_filter: Option<String>,
    #[serde(default)]
    pub cache_file: Option<PathBuf>,
    #[serde(default)]
    pub report_vendor_psr_violations: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            vendor_dir: None,
            dev_mode: false,
            optimize: false,
            extensions: default_extensions(),
            ambiguous_filter: None,
            cache_file: None,
            report_vendor_psr_violations: false,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct GenerationStats {
    pub classes: usize,
    pub files_found: usize,
    pub files_parsed: usize,
    pub cache_hits: usize,
    pub elapsed_ms: u128,
}

/// Everything one generation pass produces.
#[derive(Debug, Clone, Serialize)]
pub struct AutoloadReport {
    #[serde(rename = "psr-0")]
    pub psr0: IndexMap<String, Vec<PathBuf>>,
    #[serde(rename = "psr-4")]
    pub psr4: IndexMap<String, Vec<PathBuf>>,
    pub classmap: BTreeMap<String, PathBuf>,
    pub files: IndexMap<String, PathBuf>,
    #[serde(rename = "exclude-from-classmap")]
    pub exclude: Vec<String>,
    pub ambiguous_classes: Vec<AmbiguousClass>,
    pub psr_violations: Vec<PsrViolation>,
    pub duplicate_files: Vec<DuplicateFile>,
    pub stats: GenerationStats,
}

pub struct AutoloadGenerator {
    config: GeneratorConfig,
}

impl AutoloadGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    fn base_dir(&self) -> PathBuf {
        absolute(&self.config.base_dir)
    }

    fn vendor_dir(&self, base_dir: &Path) -> PathBuf {
        match &self.config.vendor_dir {
            Some(dir) => normalize_path(&base_dir.join(dir)),
            None => base_dir.join("vendor"),
        }
    }

    fn ambiguous_filter(&self) -> Result<Regex> {
        let pattern = self
            .config
            .ambiguous_filter
            .as_deref()
            .unwrap_or(DEFAULT_AMBIGUOUS_FILTER);
        Regex::new(pattern).map_err(|e| Error::InvalidRule {
            package: "config".to_string(),
            message: format!("ambiguous_filter: {e}"),
        })
    }

    fn scanner(&self, base_dir: &Path) -> DirectoryScanner {
        let scanner = DirectoryScanner::new(self.config.extensions.iter().cloned(), base_dir);
        match &self.config.cache_file {
            Some(path) => scanner.with_cache(DeclarationCache::load(path)),
            None => scanner,
        }
    }

    /// Run a full pass over `root` and `packages`.
    ///
    /// Outside dev mode, dev packages are dropped by name when
    /// `dev_package_names` is given, otherwise by reachability from the
    /// root's requirements.
    pub fn generate(
        &self,
        root: &Package,
        packages: &[Package],
        dev_package_names: Option<&[String]>,
    ) -> Result<AutoloadReport> {
        let start = Instant::now();
        let base_dir = self.base_dir();
        let vendor_dir = self.vendor_dir(&base_dir);
        let ambiguous_filter = self.ambiguous_filter()?;

        let dev_filter = match (self.config.dev_mode, dev_package_names) {
            (true, _) => DevFilter::Keep,
            (false, Some(names)) => DevFilter::Names(names),
            (false, None) => DevFilter::Reachable,
        };

        let rules = aggregate(root, packages, &base_dir, self.config.dev_mode, dev_filter)?;
        tracing::debug!(
            psr0 = rules.psr0.len(),
            psr4 = rules.psr4.len(),
            classmap = rules.classmap.len(),
            files = rules.files.len(),
            "aggregated autoload rules"
        );

        let mut scanner = self.scanner(&base_dir);
        let mut scanned = ScannedFiles::new();
        let mut class_map = ClassMap::new();

        for dir in &rules.classmap {
            let exclude = build_exclusion_regex(dir, &rules.exclude)?;
            let fragment = scanner.scan(dir, exclude.as_ref(), None, &mut scanned)?;
            class_map.absorb(fragment);
        }

        if self.config.optimize {
            scan_namespaces(&rules, &vendor_dir, &mut scanner, &mut scanned, &mut class_map)?;
        }

        class_map.set_class(
            INSTALLED_VERSIONS_CLASS,
            vendor_dir.join("composer").join("InstalledVersions.php"),
        );

        if !self.config.report_vendor_psr_violations {
            class_map.clear_psr_violations_by_path(&vendor_dir);
            if let Ok(real) = fs::canonicalize(&vendor_dir) {
                class_map.clear_psr_violations_by_path(&real);
            }
        }

        if let (Some(path), Some(cache)) = (&self.config.cache_file, scanner.take_cache()) {
            if let Err(err) = cache.save(path) {
                tracing::warn!(error = %err, "could not write declaration cache");
            }
        }

        let ambiguous_classes = class_map.ambiguous_classes(Some(&ambiguous_filter));
        let psr_violations = class_map.psr_violations().to_vec();
        report_warnings(&ambiguous_classes, &psr_violations, &rules.duplicate_files);

        let scan_stats = scanner.stats();
        let stats = GenerationStats {
            classes: class_map.len(),
            files_found: scan_stats.files_found,
            files_parsed: scan_stats.files_parsed,
            cache_hits: scan_stats.cache_hits,
            elapsed_ms: start.elapsed().as_millis(),
        };
        tracing::info!(
            classes = stats.classes,
            files_parsed = stats.files_parsed,
            cache_hits = stats.cache_hits,
            elapsed_ms = stats.elapsed_ms as u64,
            "generated autoload rules"
        );

        Ok(AutoloadReport {
            psr0: rules.psr0,
            psr4: rules.psr4,
            classmap: class_map.into_map(),
            files: rules.files,
            exclude: rules.exclude,
            ambiguous_classes,
            psr_violations,
            duplicate_files: rules.duplicate_files,
            stats,
        })
    }
}

/// Scan every existing PSR directory with its rule, most specific
/// namespace first.
fn scan_namespaces(
    rules: &AutoloadRuleSet,
    vendor_dir: &Path,
    scanner: &mut DirectoryScanner,
    scanned: &mut ScannedFiles,
    class_map: &mut ClassMap,
) -> Result<()> {
    let mut groups: IndexMap<&str, Vec<(Convention, &PathBuf)>> = IndexMap::new();
    for (convention, map) in [(Convention::Psr4, &rules.psr4), (Convention::Psr0, &rules.psr0)] {
        for (namespace, dirs) in map {
            groups
                .entry(namespace.as_str())
                .or_default()
                .extend(dirs.iter().map(|d| (convention, d)));
        }
    }
    groups.sort_by(|a, _, b, _| b.cmp(a));

    let vendor_real = fs::canonicalize(vendor_dir).unwrap_or_else(|_| vendor_dir.to_path_buf());
    let vendor_exclude = format!("{}($|/)", regex::escape(&slashed(&vendor_real)));

    for (namespace, dirs) in groups {
        for (convention, dir) in dirs {
            if !dir.is_dir() {
                continue;
            }
            // a project-level rule must not pick up the vendor tree
            let exclude = if vendor_dir.starts_with(dir) && vendor_dir != dir.as_path() {
                let mut patterns = rules.exclude.clone();
                patterns.push(vendor_exclude.clone());
                build_exclusion_regex(dir, &patterns)?
            } else {
                build_exclusion_regex(dir, &rules.exclude)?
            };
            let rule = NamespaceRule::new(namespace, convention);
            let fragment = scanner.scan(dir, exclude.as_ref(), Some(&rule), scanned)?;
            class_map.absorb(fragment);
        }
    }
    Ok(())
}

fn report_warnings(
    ambiguous: &[AmbiguousClass],
    violations: &[PsrViolation],
    duplicates: &[DuplicateFile],
) {
    for entry in ambiguous {
        let others: Vec<String> = entry.others.iter().map(|p| slashed(p)).collect();
        tracing::warn!(
            "Ambiguous class resolution, \"{}\" was found {}x: in \"{}\" and \"{}\", the first will be used.",
            entry.class,
            others.len() + 1,
            slashed(&entry.winner),
            others.join("\", \""),
        );
    }
    for violation in violations {
        tracing::warn!("{}", violation.message);
    }
    for duplicate in duplicates {
        tracing::warn!(
            "The file \"{}\" is included by both \"{}\" and \"{}\", only the first is kept.",
            slashed(&duplicate.path),
            duplicate.duplicate_of,
            duplicate.identifier,
        );
    }
}

/// Result of a standalone class map scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub classmap: BTreeMap<String, PathBuf>,
    pub ambiguous_classes: Vec<AmbiguousClass>,
    pub stats: ScanStats,
}

/// Scan `paths` in order into one class map, without any package context.
/// `exclude` holds exclude-from-classmap style patterns relative to `base_dir`.
pub fn scan_paths(
    paths: &[PathBuf],
    exclude: &[String],
    extensions: &[String],
    base_dir: &Path,
) -> Result<ScanReport> {
    let base_dir = absolute(base_dir);
    let patterns: Vec<String> = exclude
        .iter()
        .filter_map(|p| exclusion_pattern(&base_dir, p))
        .collect();

    let mut scanner = DirectoryScanner::new(extensions.iter().cloned(), &base_dir);
    let mut scanned = ScannedFiles::new();
    let mut class_map = ClassMap::new();

    for path in paths {
        let dir = normalize_path(&base_dir.join(path));
        let exclude = build_exclusion_regex(&dir, &patterns)?;
        class_map.absorb(scanner.scan(&dir, exclude.as_ref(), None, &mut scanned)?);
    }

    Ok(ScanReport {
        ambiguous_classes: class_map.ambiguous_classes(None),
        classmap: class_map.into_map(),
        stats: scanner.stats(),
    })
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize_path(path);
    }
    let joined = std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf());
    normalize_path(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::AutoloadRules;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn config(base: &Path) -> GeneratorConfig {
        GeneratorConfig {
            base_dir: base.to_path_buf(),
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn config_defaults_from_empty_json() {
        let config: GeneratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.base_dir, PathBuf::from("."));
        assert_eq!(config.extensions, vec!["php", "inc", "hh"]);
        assert!(!config.optimize);
    }

    #[test]
    fn installed_versions_is_always_mapped() {
        let tmp = TempDir::new().unwrap();
        let base = fs::canonicalize(tmp.path()).unwrap();
        write(
            &base,
            "lib/InstalledVersions.php",
            "<?php namespace Composer; class InstalledVersions {}",
        );
        let root = Package::new("root/app").with_autoload(AutoloadRules {
            classmap: vec!["lib/".into()],
            ..AutoloadRules::default()
        });

        let report = AutoloadGenerator::new(config(&base))
            .generate(&root, &[], Some(&[]))
            .unwrap();
        assert_eq!(
            report.classmap[INSTALLED_VERSIONS_CLASS],
            base.join("vendor/composer/InstalledVersions.php")
        );
        assert!(report.ambiguous_classes.is_empty());
    }

    #[test]
    fn optimize_scans_psr_directories_and_reports_violations() {
        let tmp = TempDir::new().unwrap();
        let base = fs::canonicalize(tmp.path()).unwrap();
        write(&base, "src/Model/User.php", "<?php namespace App\\Model; class User {}");
        write(&base, "src/Misplaced.php", "<?php namespace Other; class Misplaced {}");

        let mut rules = AutoloadRules::default();
        rules.psr4.insert("App\\".into(), "src/".into());
        let root = Package::new("root/app").with_autoload(rules);

        let plain = AutoloadGenerator::new(config(&base))
            .generate(&root, &[], Some(&[]))
            .unwrap();
        assert!(!plain.classmap.contains_key("App\\Model\\User"));

        let optimized = AutoloadGenerator::new(GeneratorConfig {
            optimize: true,
            ..config(&base)
        })
        .generate(&root, &[], Some(&[]))
        .unwrap();
        assert_eq!(
            optimized.classmap["App\\Model\\User"],
            base.join("src/Model/User.php")
        );
        assert!(!optimized.classmap.contains_key("Other\\Misplaced"));
        assert_eq!(optimized.psr_violations.len(), 1);
        assert_eq!(optimized.psr_violations[0].class, "Other\\Misplaced");
    }

    #[test]
    fn optimize_does_not_descend_into_vendor_from_root_rule() {
        let tmp = TempDir::new().unwrap();
        let base = fs::canonicalize(tmp.path()).unwrap();
        write(&base, "App.php", "<?php class App {}");
        write(&base, "vendor/Lib.php", "<?php class vendor_Lib {}");

        let mut rules = AutoloadRules::default();
        rules.psr0.insert("".into(), "".into());
        let root = Package::new("root/app").with_autoload(rules);

        let report = AutoloadGenerator::new(GeneratorConfig {
            optimize: true,
            ..config(&base)
        })
        .generate(&root, &[], Some(&[]))
        .unwrap();
        assert!(report.classmap.contains_key("App"));
        assert!(!report.classmap.contains_key("vendor_Lib"));
    }

    #[test]
    fn vendor_psr_violations_are_cleared_by_default() {
        let tmp = TempDir::new().unwrap();
        let base = fs::canonicalize(tmp.path()).unwrap();
        write(&base, "vendor/acme/lib/src/Wrong.php", "<?php namespace Acme; class Right {}");

        let mut rules = AutoloadRules::default();
        rules.psr4.insert("Acme\\".into(), "src/".into());
        let lib = Package::new("acme/lib")
            .installed_at("vendor/acme/lib")
            .with_autoload(rules);
        let root = Package::new("root/app").requiring(["acme/lib"]);

        let optimized = GeneratorConfig {
            optimize: true,
            ..config(&base)
        };
        let report = AutoloadGenerator::new(optimized.clone())
            .generate(&root, std::slice::from_ref(&lib), None)
            .unwrap();
        assert!(report.psr_violations.is_empty());

        let report = AutoloadGenerator::new(GeneratorConfig {
            report_vendor_psr_violations: true,
            ..optimized
        })
        .generate(&root, &[lib], None)
        .unwrap();
        assert_eq!(report.psr_violations.len(), 1);
    }

    #[test]
    fn invalid_ambiguous_filter_is_a_configuration_error() {
        let generator = AutoloadGenerator::new(GeneratorConfig {
            ambiguous_filter: Some("(".into()),
            ..GeneratorConfig::default()
        });
        let err = generator
            .generate(&Package::new("root/app"), &[], None)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn scan_paths_applies_relative_excludes() {
        let tmp = TempDir::new().unwrap();
        let base = fs::canonicalize(tmp.path()).unwrap();
        write(&base, "src/Keep.php", "<?php class Keep {}");
        write(&base, "src/Tests/KeepTest.php", "<?php class KeepTest {}");

        let report = scan_paths(
            &[PathBuf::from("src")],
            &["src/Tests".to_string()],
            &["php".to_string()],
            &base,
        )
        .unwrap();
        let classes: Vec<&str> = report.classmap.keys().map(String::as_str).collect();
        assert_eq!(classes, vec!["Keep"]);
    }
}
