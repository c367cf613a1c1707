//! Forward-only normalizer for PHP source.
//!
//! Drops everything outside `<?` ... `?>`, replaces string literals and
//! heredoc/nowdoc bodies with an empty literal and removes comments, so the
//! declaration regex in `parser` only ever sees code. Every byte of the input
//! is visited at most a constant number of times; there is no regex
//! backtracking over literal bodies.

/// Stands in for any string literal or heredoc. Never longer than what it replaces.
const PLACEHOLDER: &[u8] = b"''";

const TYPE_KEYWORDS: [&[u8]; 4] = [b"class", b"interface", b"trait", b"enum"];

pub(crate) struct PhpFileCleaner<'a> {
    contents: &'a [u8],
    index: usize,
    max_matches: usize,
}

impl<'a> PhpFileCleaner<'a> {
    /// `max_matches` is the number of type keywords a quick pre-count found.
    /// When it is 1 the cleaner stops right after the first declaration.
    pub(crate) fn new(contents: &'a [u8], max_matches: usize) -> Self {
        Self {
            contents,
            index: 0,
            max_matches,
        }
    }

    pub(crate) fn clean(mut self) -> Vec<u8> {
        let len = self.contents.len();
        let mut clean = Vec::with_capacity(len);

        'outer: while self.index < len {
            if !self.skip_to_php() {
                break;
            }
            clean.extend_from_slice(b"<?");

            while self.index < len {
                let b = self.contents[self.index];

                if b == b'?' && self.peek(b'>') {
                    clean.extend_from_slice(b"?>");
                    self.index += 2;
                    continue 'outer;
                }

                if b == b'"' || b == b'\'' {
                    let start = self.index;
                    self.skip_string(b);
                    let consumed = self.index - start;
                    clean.extend_from_slice(&PLACEHOLDER[..consumed.min(PLACEHOLDER.len())]);
                    continue;
                }

                if b == b'<' && self.peek(b'<') {
                    if let Some((header_end, label_start, label_end)) = self.heredoc_header() {
                        self.index = header_end;
                        self.skip_heredoc(label_start, label_end);
                        clean.extend_from_slice(PLACEHOLDER);
                        continue;
                    }
                }

                if b == b'/' && self.peek(b'/') {
                    self.skip_to_newline();
                    continue;
                }
                if b == b'/' && self.peek(b'*') {
                    self.skip_comment();
                    continue;
                }
                // `#[` opens an attribute, not a comment
                if b == b'#' && !self.peek(b'[') {
                    self.skip_to_newline();
                    continue;
                }

                if self.max_matches == 1 {
                    if let Some(end) = self.declaration_end() {
                        clean.extend_from_slice(&self.contents[self.index..end]);
                        return clean;
                    }
                }

                let start = self.index;
                self.index += 1;
                while self.index < len && !is_special(self.contents[self.index]) {
                    self.index += 1;
                }
                clean.extend_from_slice(&self.contents[start..self.index]);
            }
        }

        clean
    }

    /// Advance past the next `<?`. Returns false when there is none.
    fn skip_to_php(&mut self) -> bool {
        let len = self.contents.len();
        while self.index < len {
            if self.contents[self.index] == b'<' && self.peek(b'?') {
                self.index += 2;
                return true;
            }
            self.index += 1;
        }
        false
    }

    fn skip_string(&mut self, delimiter: u8) {
        let len = self.contents.len();
        self.index += 1;
        while self.index < len {
            let b = self.contents[self.index];
            if b == b'\\' && (self.peek(b'\\') || self.peek(delimiter)) {
                self.index += 2;
                continue;
            }
            self.index += 1;
            if b == delimiter {
                break;
            }
        }
    }

    fn skip_comment(&mut self) {
        let len = self.contents.len();
        self.index += 2;
        while self.index < len {
            if self.contents[self.index] == b'*' && self.peek(b'/') {
                self.index += 2;
                return;
            }
            self.index += 1;
        }
    }

    /// Stops on the line break itself, or before a closing `?>`, which ends a
    /// line comment in PHP.
    fn skip_to_newline(&mut self) {
        let len = self.contents.len();
        while self.index < len {
            match self.contents[self.index] {
                b'\r' | b'\n' => return,
                b'?' if self.peek(b'>') => return,
                _ => self.index += 1,
            }
        }
    }

    /// Matches `<<<[ \t]*(['"]?)LABEL\1` followed by a line break at the
    /// current position. Returns the end of the header and the label bounds.
    fn heredoc_header(&self) -> Option<(usize, usize, usize)> {
        let bytes = self.contents;
        let len = bytes.len();
        let mut pos = self.index + 2;
        if pos >= len || bytes[pos] != b'<' {
            return None;
        }
        pos += 1;
        while pos < len && matches!(bytes[pos], b' ' | b'\t') {
            pos += 1;
        }

        let quote = match bytes.get(pos) {
            Some(&q @ (b'\'' | b'"')) => {
                pos += 1;
                Some(q)
            }
            _ => None,
        };

        let label_start = pos;
        if pos >= len || !is_label_start(bytes[pos]) {
            return None;
        }
        while pos < len && is_label_char(bytes[pos]) {
            pos += 1;
        }
        let label_end = pos;

        if let Some(q) = quote {
            if bytes.get(pos) != Some(&q) {
                return None;
            }
            pos += 1;
        }

        match bytes.get(pos) {
            Some(b'\r') if bytes.get(pos + 1) == Some(&b'\n') => pos += 2,
            Some(b'\r' | b'\n') => pos += 1,
            _ => return None,
        }

        Some((pos, label_start, label_end))
    }

    /// Consume lines until one starts (after optional indentation) with the
    /// closing label not followed by an identifier character.
    fn skip_heredoc(&mut self, label_start: usize, label_end: usize) {
        let contents = self.contents;
        let label = &contents[label_start..label_end];
        let len = contents.len();

        while self.index < len {
            while self.index < len && matches!(self.contents[self.index], b' ' | b'\t') {
                self.index += 1;
            }
            if self.contents[self.index..].starts_with(label) {
                let after = self.index + label.len();
                if after >= len || !is_label_char(self.contents[after]) {
                    self.index = after;
                    return;
                }
            }
            while self.index < len && !matches!(self.contents[self.index], b'\r' | b'\n') {
                self.index += 1;
            }
            while self.index < len && matches!(self.contents[self.index], b'\r' | b'\n') {
                self.index += 1;
            }
        }
    }

    /// If a complete `class|interface|trait|enum <name>` fragment starts at the
    /// current position, return where it ends.
    fn declaration_end(&self) -> Option<usize> {
        let bytes = self.contents;
        let len = bytes.len();
        let i = self.index;
        if i == 0 {
            return None;
        }
        let prev = bytes[i - 1];
        if is_word_byte(prev) || matches!(prev, b'$' | b':' | b'>') {
            return None;
        }

        let keyword = TYPE_KEYWORDS
            .iter()
            .find(|k| bytes[i..].starts_with(k))?;
        let mut pos = i + keyword.len();

        let ws_start = pos;
        while pos < len && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos == ws_start || pos >= len || !is_name_start(bytes[pos]) {
            return None;
        }
        pos += 1;
        while pos < len && is_name_char(bytes[pos]) {
            pos += 1;
        }
        Some(pos)
    }

    #[inline]
    fn peek(&self, expected: u8) -> bool {
        self.index + 1 < self.contents.len() && self.contents[self.index + 1] == expected
    }
}

/// Bytes that may start something the main loop has to look at.
#[inline]
fn is_special(b: u8) -> bool {
    matches!(
        b,
        b'?' | b'"' | b'\'' | b'<' | b'/' | b'#' | b'c' | b'i' | b't' | b'e'
    )
}

#[inline]
fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[inline]
fn is_label_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

#[inline]
fn is_label_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

#[inline]
fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b':' || b >= 0x7f
}

#[inline]
fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b':' | b'-') || b >= 0x7f
}

/// Normalize `contents` completely.
pub(crate) fn clean(contents: &[u8]) -> Vec<u8> {
    PhpFileCleaner::new(contents, usize::MAX).clean()
}
