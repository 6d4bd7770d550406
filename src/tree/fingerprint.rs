//! Cheap code block identity for stable-code reuse.
//!
//! Candidate code nodes are re-created on every full render. A fingerprint
//! match against a live block lets the patcher keep the live node, with its
//! highlighting, instead of the fresh one.

use super::node::CodeData;

const SNIPPET_CHARS: usize = 16;

/// Language, normalized length, rolling hash and head/tail snippets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeFingerprint {
    lang: String,
    len: usize,
    hash: u64,
    head: String,
    tail: String,
}

impl CodeFingerprint {
    /// Fingerprint a code payload.
    pub fn of(code: &CodeData) -> Self {
        let normalized = normalize(&code.source);
        let head: String = normalized.chars().take(SNIPPET_CHARS).collect();
        let tail_start = normalized
            .char_indices()
            .rev()
            .nth(SNIPPET_CHARS - 1)
            .map_or(0, |(index, _)| index);
        Self {
            lang: code.lang.to_ascii_lowercase(),
            len: normalized.len(),
            hash: rolling_hash(normalized.as_bytes()),
            head,
            tail: normalized[tail_start..].to_string(),
        }
    }
}

/// CRLF folded to LF, trailing whitespace trimmed.
fn normalize(source: &str) -> String {
    source.replace("\r\n", "\n").trim_end().to_string()
}

/// Polynomial rolling hash (base 257, wrapping).
fn rolling_hash(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, &byte| {
            hash.wrapping_mul(257).wrapping_add(u64::from(byte) + 1)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_line_endings_and_trailing_space() {
        let a = CodeData::new("rust", "fn main() {}\r\n");
        let b = CodeData::new("Rust", "fn main() {}\n\n");
        assert_eq!(CodeFingerprint::of(&a), CodeFingerprint::of(&b));
    }

    #[test]
    fn test_fingerprint_distinguishes_content_and_lang() {
        let a = CodeData::new("rust", "let x = 1;");
        let b = CodeData::new("rust", "let x = 2;");
        let c = CodeData::new("python", "let x = 1;");
        assert_ne!(CodeFingerprint::of(&a), CodeFingerprint::of(&b));
        assert_ne!(CodeFingerprint::of(&a), CodeFingerprint::of(&c));
    }

    #[test]
    fn test_snippets_on_short_and_unicode_sources() {
        let fp = CodeFingerprint::of(&CodeData::new("", "héllo wörld, ünïcode everywhere"));
        assert_eq!(fp.head.chars().count(), SNIPPET_CHARS);
        assert_eq!(fp.tail.chars().count(), SNIPPET_CHARS);
        let short = CodeFingerprint::of(&CodeData::new("", "ab"));
        assert_eq!(short.head, "ab");
        assert_eq!(short.tail, "ab");
    }
}
