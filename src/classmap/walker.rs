use ignore::WalkBuilder;
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::cache::{file_stamp, CachedFile, DeclarationCache};
use super::filter::{filter_by_namespace, NamespaceRule};
use super::parser::find_classes;
use super::PsrViolation;
use crate::error::{Error, Result};

/// Real paths of files whose declarations have been fully collected during
/// one generation pass.
#[derive(Debug, Default, Clone)]
pub struct ScannedFiles(HashSet<PathBuf>);

impl ScannedFiles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, real_path: &Path) -> bool {
        self.0.contains(real_path)
    }

    pub fn insert(&mut self, real_path: PathBuf) -> bool {
        self.0.insert(real_path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Classes found by one scan, in discovery order.
#[derive(Debug, Default)]
pub struct ScanFragment {
    pub entries: Vec<(String, PathBuf)>,
    pub violations: Vec<PsrViolation>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ScanStats {
    pub files_found: usize,
    pub files_parsed: usize,
    pub cache_hits: usize,
}

/// A file that passed the cheap checks and will be read.
struct Candidate {
    path: PathBuf,
    real: PathBuf,
}

type ParseResult = Result<(Vec<String>, Option<CachedFile>)>;

/// Walks scan targets and turns the source files under them into classes.
pub struct DirectoryScanner {
    extensions: Vec<String>,
    display_root: PathBuf,
    cache: Option<DeclarationCache>,
    stats: ScanStats,
}

impl DirectoryScanner {
    /// `display_root` is the directory violation messages are relative to.
    pub fn new<I, S>(extensions: I, display_root: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
            display_root: display_root.into(),
            cache: None,
            stats: ScanStats::default(),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: DeclarationCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn take_cache(&mut self) -> Option<DeclarationCache> {
        self.cache.take()
    }

    #[must_use]
    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.iter().any(|x| x == e))
    }

    /// Scan `target`, which may be a file, a directory or a glob.
    ///
    /// A target that does not exist is an error when it names a source file
    /// directly and is skipped otherwise. Files already in `scanned` are not
    /// read again. Under a namespace rule a file is only marked scanned when
    /// at least one of its classes fits the rule.
    pub fn scan(
        &mut self,
        target: &Path,
        exclude: Option<&Regex>,
        rule: Option<&NamespaceRule>,
        scanned: &mut ScannedFiles,
    ) -> Result<ScanFragment> {
        let target = absolute(target);
        let files = self.collect_files(&target)?;
        self.stats.files_found += files.len();

        let candidates: Vec<Candidate> = files
            .into_iter()
            .filter_map(|path| {
                let real = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
                if scanned.contains(&real) || is_excluded(exclude, &real, &path) {
                    return None;
                }
                Some(Candidate { path, real })
            })
            .collect();

        tracing::debug!(
            target = %target.display(),
            candidates = candidates.len(),
            "scanning"
        );

        let files_parsed = AtomicUsize::new(0);
        let cache_hits = AtomicUsize::new(0);
        let cache = self.cache.as_ref();

        let results: Vec<ParseResult> = candidates
            .par_iter()
            .map(|c| parse_one_file(c, cache, &files_parsed, &cache_hits))
            .collect();

        self.stats.files_parsed += files_parsed.load(Ordering::Relaxed);
        self.stats.cache_hits += cache_hits.load(Ordering::Relaxed);

        // Merge in walk order so the outcome equals a sequential scan.
        let mut fragment = ScanFragment::default();
        for (candidate, result) in candidates.into_iter().zip(results) {
            if scanned.contains(&candidate.real) {
                continue;
            }
            let (classes, fresh) = result?;
            if let (Some(cache), Some(entry)) = (self.cache.as_mut(), fresh) {
                cache.store(candidate.real.to_string_lossy().into_owned(), entry);
            }

            let classes = match rule {
                Some(rule) => {
                    let filtered = filter_by_namespace(
                        classes,
                        &candidate.path,
                        &target,
                        rule,
                        &self.display_root,
                    );
                    fragment.violations.extend(filtered.violations);
                    if !filtered.valid.is_empty() {
                        scanned.insert(candidate.real);
                    }
                    filtered.valid
                }
                None => {
                    scanned.insert(candidate.real);
                    classes
                }
            };

            fragment
                .entries
                .extend(classes.into_iter().map(|c| (c, candidate.path.clone())));
        }

        Ok(fragment)
    }

    /// Source files under `target` in a stable order.
    fn collect_files(&self, target: &Path) -> Result<Vec<PathBuf>> {
        let as_str = target.to_string_lossy();
        if as_str.contains('*') {
            let matches = glob::glob(&as_str).map_err(|source| Error::Glob {
                pattern: as_str.to_string(),
                source,
            })?;
            let mut files = Vec::new();
            let mut any = false;
            for entry in matches.flatten() {
                any = true;
                files.extend(self.collect_existing(&entry));
            }
            if !any {
                tracing::debug!(pattern = %as_str, "glob matched nothing, skipping");
            }
            return Ok(files);
        }

        if target.exists() {
            return Ok(self.collect_existing(target));
        }
        if self.has_extension(target) {
            return Err(Error::CouldNotScan {
                path: target.to_path_buf(),
            });
        }
        tracing::debug!(path = %target.display(), "optional path does not exist, skipping");
        Ok(Vec::new())
    }

    fn collect_existing(&self, target: &Path) -> Vec<PathBuf> {
        if target.is_file() {
            return if self.has_extension(target) {
                vec![target.to_path_buf()]
            } else {
                Vec::new()
            };
        }

        let walker = WalkBuilder::new(target)
            .follow_links(true)
            .hidden(true)
            .parents(false)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            if self.has_extension(path) {
                files.push(path.to_path_buf());
            }
        }
        files
    }
}

/// Excludes are checked against the real path and the path as walked, so a
/// symlinked tree can be excluded by either form.
fn is_excluded(exclude: Option<&Regex>, real: &Path, raw: &Path) -> bool {
    let Some(re) = exclude else {
        return false;
    };
    re.is_match(&slashed(real)) || re.is_match(&slashed(raw))
}

pub(crate) fn slashed(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
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

/// Resolve `.` and `..` segments without touching the filesystem.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Parse a single file, using the cache if its stamp matches.
fn parse_one_file(
    candidate: &Candidate,
    cache: Option<&DeclarationCache>,
    files_parsed: &AtomicUsize,
    cache_hits: &AtomicUsize,
) -> ParseResult {
    let Some(cache) = cache else {
        files_parsed.fetch_add(1, Ordering::Relaxed);
        return find_classes(&candidate.path).map(|classes| (classes, None));
    };

    let stamp = file_stamp(&candidate.real);
    let key = candidate.real.to_string_lossy();
    if let Some(cached) = cache.lookup(&key, stamp) {
        cache_hits.fetch_add(1, Ordering::Relaxed);
        return Ok((cached.classes.clone(), Some(cached.clone())));
    }

    files_parsed.fetch_add(1, Ordering::Relaxed);
    let classes = find_classes(&candidate.path)?;
    let entry = CachedFile {
        mtime: stamp.0,
        size: stamp.1,
        classes: classes.clone(),
    };
    Ok((classes, Some(entry)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classmap::Convention;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    fn scanner(root: &Path) -> DirectoryScanner {
        DirectoryScanner::new(["php", "inc"], root)
    }

    fn classes(fragment: &ScanFragment) -> Vec<&str> {
        fragment.entries.iter().map(|(c, _)| c.as_str()).collect()
    }

    #[test]
    fn scans_directory_in_name_order() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b/B.php", "<?php class B {}");
        write(tmp.path(), "a/A.php", "<?php class A {}");
        write(tmp.path(), "a/notes.txt", "class Nope {}");
        write(tmp.path(), "c.inc", "<?php class C {}");

        let mut scanned = ScannedFiles::new();
        let out = scanner(tmp.path())
            .scan(tmp.path(), None, None, &mut scanned)
            .unwrap();

        assert_eq!(classes(&out), vec!["A", "B", "C"]);
        assert_eq!(scanned.len(), 3);
    }

    #[test]
    fn second_scan_with_same_set_finds_nothing() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "A.php", "<?php class A {}");

        let mut scanned = ScannedFiles::new();
        let mut scanner = scanner(tmp.path());
        let first = scanner.scan(tmp.path(), None, None, &mut scanned).unwrap();
        let second = scanner.scan(tmp.path(), None, None, &mut scanned).unwrap();

        assert_eq!(classes(&first), vec!["A"]);
        assert!(second.entries.is_empty());
        assert!(second.violations.is_empty());
    }

    #[test]
    fn hidden_entries_are_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".git/Hook.php", "<?php class Hook {}");
        write(tmp.path(), ".Hidden.php", "<?php class Hidden {}");
        write(tmp.path(), "Shown.php", "<?php class Shown {}");

        let out = scanner(tmp.path())
            .scan(tmp.path(), None, None, &mut ScannedFiles::new())
            .unwrap();
        assert_eq!(classes(&out), vec!["Shown"]);
    }

    #[test]
    fn excluded_files_are_not_scanned() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "src/Keep.php", "<?php class Keep {}");
        write(tmp.path(), "src/Tests/Skip.php", "<?php class Skip {}");

        let root = fs::canonicalize(tmp.path()).unwrap();
        let exclude = Regex::new(&format!(
            "{}/src/Tests($|/)",
            regex::escape(&slashed(&root))
        ))
        .unwrap();

        let mut scanned = ScannedFiles::new();
        let out = scanner(&root)
            .scan(&root.join("src"), Some(&exclude), None, &mut scanned)
            .unwrap();
        assert_eq!(classes(&out), vec!["Keep"]);
        assert_eq!(scanned.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_tree_is_followed_and_excludable_by_either_path() {
        use crate::autoload::exclusion_pattern;

        let tmp = TempDir::new().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        write(&root, "proj/src/Keep.php", "<?php class Keep {}");
        write(&root, "elsewhere/Util.php", "<?php class Util {}");
        write(&root, "elsewhere/Tests/SkipTest.php", "<?php class SkipTest {}");
        std::os::unix::fs::symlink(root.join("elsewhere"), root.join("proj/src/Linked"))
            .unwrap();

        let src = root.join("proj/src");
        let mut scanner = scanner(&root);

        let all = scanner
            .scan(&src, None, None, &mut ScannedFiles::new())
            .unwrap();
        assert_eq!(classes(&all), vec!["Keep", "SkipTest", "Util"]);
        assert_eq!(all.entries[2].1, src.join("Linked/Util.php"));

        // only the path as walked lies below the symlink
        let pattern = exclusion_pattern(&root.join("proj"), "src/Linked/Tests/").unwrap();
        let raw = Regex::new(&pattern).unwrap();
        let out = scanner
            .scan(&src, Some(&raw), None, &mut ScannedFiles::new())
            .unwrap();
        assert_eq!(classes(&out), vec!["Keep", "Util"]);

        // only the resolved path lies below the link target
        let pattern = exclusion_pattern(&root, "elsewhere/Tests").unwrap();
        let real = Regex::new(&pattern).unwrap();
        let out = scanner
            .scan(&src, Some(&real), None, &mut ScannedFiles::new())
            .unwrap();
        assert_eq!(classes(&out), vec!["Keep", "Util"]);
    }

    #[test]
    fn psr_invalid_file_is_not_marked_scanned() {
        let tmp = TempDir::new().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        write(&root, "src/Wrong.php", "<?php namespace Acme; class Right {}");

        let rule = NamespaceRule::new("Acme\\", Convention::Psr4);
        let mut scanned = ScannedFiles::new();
        let mut scanner = scanner(&root);

        let out = scanner
            .scan(&root.join("src"), None, Some(&rule), &mut scanned)
            .unwrap();
        assert!(out.entries.is_empty());
        assert_eq!(out.violations.len(), 1);
        assert!(scanned.is_empty());

        let broad = scanner
            .scan(&root.join("src"), None, None, &mut scanned)
            .unwrap();
        assert_eq!(classes(&broad), vec!["Acme\\Right"]);
        assert_eq!(scanned.len(), 1);
    }

    #[test]
    fn missing_file_target_is_an_error_missing_dir_is_not() {
        let tmp = TempDir::new().unwrap();
        let mut scanner = scanner(tmp.path());
        let mut scanned = ScannedFiles::new();

        let err = scanner
            .scan(&tmp.path().join("nope.php"), None, None, &mut scanned)
            .unwrap_err();
        assert!(matches!(err, Error::CouldNotScan { .. }));

        let out = scanner
            .scan(&tmp.path().join("optional-dir"), None, None, &mut scanned)
            .unwrap();
        assert!(out.entries.is_empty());
    }

    #[test]
    fn glob_targets_are_expanded() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "modules/one/src/One.php", "<?php class One {}");
        write(tmp.path(), "modules/two/src/Two.php", "<?php class Two {}");
        write(tmp.path(), "modules/two/lib/Lib.php", "<?php class Lib {}");

        let out = scanner(tmp.path())
            .scan(
                &tmp.path().join("modules/*/src"),
                None,
                None,
                &mut ScannedFiles::new(),
            )
            .unwrap();
        assert_eq!(classes(&out), vec!["One", "Two"]);
    }

    #[test]
    fn read_errors_carry_the_path() {
        let tmp = TempDir::new().unwrap();
        let bad = write(tmp.path(), "Bad.php", "<?php\0class Bad {}");

        let err = scanner(tmp.path())
            .scan(tmp.path(), None, None, &mut ScannedFiles::new())
            .unwrap_err();
        assert!(matches!(err, Error::FileUnparseable { .. }));
        assert_eq!(err.path(), Some(bad.as_path()));
    }

    #[test]
    fn normalizes_dot_segments() {
        assert_eq!(normalize_path(Path::new("/a/./b/../c")), Path::new("/a/c"));
        assert_eq!(normalize_path(Path::new("/a/.")), Path::new("/a"));
        assert_eq!(normalize_path(Path::new("/..")), Path::new("/"));
        assert_eq!(normalize_path(Path::new("../x")), Path::new("../x"));
    }

    #[test]
    fn cache_hits_skip_parsing() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "A.php", "<?php class A {}");
        let cache_file = tmp.path().join("cache.json");

        let mut first = scanner(tmp.path()).with_cache(DeclarationCache::default());
        first
            .scan(tmp.path(), None, None, &mut ScannedFiles::new())
            .unwrap();
        first.take_cache().unwrap().save(&cache_file).unwrap();

        let mut second = scanner(tmp.path()).with_cache(DeclarationCache::load(&cache_file));
        let out = second
            .scan(tmp.path(), None, None, &mut ScannedFiles::new())
            .unwrap();
        assert_eq!(classes(&out), vec!["A"]);
        assert_eq!(second.stats().cache_hits, 1);
        assert_eq!(second.stats().files_parsed, 0);
    }
}
