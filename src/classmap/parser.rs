use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use memmap2::Mmap;
use regex::bytes::Regex;
use std::fs;
use std::ops::Deref;
use std::path::Path;
use std::sync::LazyLock;

use super::cleaner::PhpFileCleaner;
use crate::error::{Error, Result};

/// Files at least this large are memory-mapped instead of read into a buffer.
const MMAP_THRESHOLD: u64 = 256 * 1024;

static TYPE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i-u)\b(?:class|interface|trait|enum)\s").expect("static regex")
});

static HALT_COMPILER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i-u)\b__halt_compiler\s*\(").expect("static regex"));

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?xi-u)
        (?:
            \b(?P<type>class|interface|trait|enum)\s+
              (?P<name>[a-zA-Z_\x7f-\xff:][a-zA-Z0-9_\x7f-\xff:\-]*)
          |
            \b(?P<ns>namespace)
              (?P<nsname>\s+[a-zA-Z_\x7f-\xff][a-zA-Z0-9_\x7f-\xff]*
                 (?:\s*\\\s*[a-zA-Z_\x7f-\xff][a-zA-Z0-9_\x7f-\xff]*)*)?
              \s*[\{;]
        )",
    )
    .expect("static regex")
});

/// Quick rejection for files that cannot declare anything.
#[inline]
pub(crate) fn contains_class_keyword(bytes: &[u8]) -> bool {
    static AC: LazyLock<AhoCorasick> = LazyLock::new(|| {
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(["class", "interface", "trait", "enum"])
            .expect("static automaton")
    });

    AC.is_match(bytes)
}

/// Source bytes of one file, mapped or owned.
enum SourceBuffer {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for SourceBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(m) => m,
            Self::Owned(v) => v,
        }
    }
}

fn read_source(path: &Path) -> Result<SourceBuffer> {
    let file = fs::File::open(path).map_err(|e| Error::io(path, e))?;
    let len = file.metadata().map_err(|e| Error::io(path, e))?.len();
    if len >= MMAP_THRESHOLD {
        // Safety: the mapping is read-only and dropped before the scan moves on.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::io(path, e))?;
        return Ok(SourceBuffer::Mapped(mmap));
    }
    fs::read(path)
        .map(SourceBuffer::Owned)
        .map_err(|e| Error::io(path, e))
}

/// Read `path` and return the fully-qualified names of every class,
/// interface, trait and enum it declares, in source order.
pub fn find_classes(path: &Path) -> Result<Vec<String>> {
    let contents = read_source(path)?;
    let code = code_portion(&contents);

    if code.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    if code.contains(&0) {
        return Err(Error::FileUnparseable {
            path: path.to_path_buf(),
        });
    }

    Ok(extract_php_symbols(code))
}

/// Everything before `__halt_compiler(`; what follows is raw data.
fn code_portion(contents: &[u8]) -> &[u8] {
    match HALT_COMPILER.find(contents) {
        Some(m) => &contents[..m.start()],
        None => contents,
    }
}

pub(crate) fn extract_php_symbols(contents: &[u8]) -> Vec<String> {
    if !contains_class_keyword(contents) {
        return Vec::new();
    }
    let matches = TYPE_KEYWORD.find_iter(contents).count();
    if matches == 0 {
        return Vec::new();
    }

    let cleaned = PhpFileCleaner::new(contents, matches).clean();
    extract_from_clean(&cleaned)
}

fn extract_from_clean(cleaned: &[u8]) -> Vec<String> {
    let mut symbols = Vec::new();
    let mut namespace = String::new();
    let mut pos = 0;

    while let Some(caps) = DECLARATION.captures_at(cleaned, pos) {
        let whole = caps.get(0).map_or(pos..pos + 1, |m| m.range());

        // `$class`, `Foo::class`, `$node->class` are not declarations
        if whole.start > 0 && matches!(cleaned[whole.start - 1], b'$' | b':' | b'>') {
            pos = whole.start + 1;
            continue;
        }
        pos = whole.end;

        if caps.name("ns").is_some() {
            let name: Vec<u8> = caps
                .name("nsname")
                .map(|m| {
                    m.as_bytes()
                        .iter()
                        .copied()
                        .filter(|b| !b.is_ascii_whitespace())
                        .collect()
                })
                .unwrap_or_default();
            namespace = String::from_utf8_lossy(&name).into_owned();
            namespace.push('\\');
            continue;
        }

        let (Some(kind), Some(name)) = (caps.name("type"), caps.name("name")) else {
            continue;
        };
        let mut name = String::from_utf8_lossy(name.as_bytes()).into_owned();

        // anonymous classes: `new class extends Foo`
        if name.eq_ignore_ascii_case("extends") || name.eq_ignore_ascii_case("implements") {
            continue;
        }

        if name.starts_with(':') {
            // `:foo:bar-baz` becomes `xhp_foo__bar_baz`
            let translated = name.replace('-', "_").replace(':', "__");
            name = format!("xhp{}", &translated[1..]);
        } else if kind.as_bytes().eq_ignore_ascii_case(b"enum") {
            // `enum Foo: int` / `enum Foo:int` capture the backing type
            if let Some(colon) = name.rfind(':') {
                name.truncate(colon);
            }
        }

        let fqcn = format!("{namespace}{name}");
        symbols.push(fqcn.trim_start_matches('\\').to_string());
    }

    symbols
}
