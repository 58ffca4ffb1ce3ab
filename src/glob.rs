//! Glob Pattern Matching
//!
//! Shell-style wildcard matcher shared by KEYS, PSUBSCRIBE, PUBSUB CHANNELS
//! and COMMAND LIST FILTERBY PATTERN.
//!
//! Supported syntax:
//! - `*` matches any sequence of bytes, including the empty one
//! - `?` matches exactly one byte
//! - `[abc]` matches one byte out of the class; classes support ranges
//!   (`[a-z]`), leading `^` negation, and backslash escapes
//! - `\c` matches the literal byte `c`
//!
//! The matcher works on raw bytes so binary-safe channel names and keys
//! match without a UTF-8 detour.

use bytes::Bytes;

/// A compiled glob pattern.
///
/// "Compiled" is generous: the pattern is kept verbatim and matched
/// recursively. Patterns are short and matching is not on the hot path for
/// anything but PUBLISH with pattern subscribers, where the pattern count is
/// small.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: Bytes,
}

impl GlobPattern {
    pub fn new(pattern: impl Into<Bytes>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pattern
    }

    /// Returns true when the pattern matches the whole of `text`.
    pub fn matches(&self, text: &[u8]) -> bool {
        matches_at(&self.pattern, text)
    }
}

fn matches_at(pattern: &[u8], text: &[u8]) -> bool {
    if pattern.is_empty() {
        return text.is_empty();
    }

    match pattern[0] {
        b'*' => {
            // Collapse runs of '*' before trying splits; "a**b" == "a*b".
            let rest = {
                let mut p = &pattern[1..];
                while p.first() == Some(&b'*') {
                    p = &p[1..];
                }
                p
            };
            if rest.is_empty() {
                return true;
            }
            for i in 0..=text.len() {
                if matches_at(rest, &text[i..]) {
                    return true;
                }
            }
            false
        }
        b'?' => !text.is_empty() && matches_at(&pattern[1..], &text[1..]),
        b'[' => match parse_class(&pattern[1..]) {
            Some(class) => {
                !text.is_empty()
                    && class.contains(text[0])
                    && matches_at(&pattern[1 + class.consumed..], &text[1..])
            }
            // Unterminated class: no byte can satisfy it.
            None => false,
        },
        b'\\' if pattern.len() > 1 => {
            !text.is_empty() && pattern[1] == text[0] && matches_at(&pattern[2..], &text[1..])
        }
        c => !text.is_empty() && c == text[0] && matches_at(&pattern[1..], &text[1..]),
    }
}

/// A character class parsed out of a pattern, starting just past the `[`.
struct Class<'a> {
    body: &'a [u8],
    negated: bool,
    /// Bytes consumed from the pattern including the closing `]`.
    consumed: usize,
}

fn parse_class(after_bracket: &[u8]) -> Option<Class<'_>> {
    let (negated, start) = if after_bracket.first() == Some(&b'^') {
        (true, 1)
    } else {
        (false, 0)
    };

    // Find the unescaped closing bracket.
    let mut i = start;
    while i < after_bracket.len() {
        match after_bracket[i] {
            b'\\' => i += 2,
            b']' => {
                return Some(Class {
                    body: &after_bracket[start..i],
                    negated,
                    consumed: i + 1,
                });
            }
            _ => i += 1,
        }
    }
    None
}

impl Class<'_> {
    fn contains(&self, byte: u8) -> bool {
        let mut hit = false;
        let body = self.body;
        let mut i = 0;
        while i < body.len() {
            if body[i] == b'\\' && i + 1 < body.len() {
                if body[i + 1] == byte {
                    hit = true;
                }
                i += 2;
            } else if i + 2 < body.len() && body[i + 1] == b'-' {
                if body[i] <= byte && byte <= body[i + 2] {
                    hit = true;
                }
                i += 3;
            } else {
                if body[i] == byte {
                    hit = true;
                }
                i += 1;
            }
        }
        hit != self.negated
    }
}
