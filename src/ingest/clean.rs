/// Lossy text normalization applied to every loaded document before chunking.
///
/// Queries are deliberately left uncleaned; the embedding model sees raw
/// user text at query time and cleaned text at build time.
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Everything outside the allow-list: Han ideographs, kana, letters and
/// digits of any script, whitespace, CJK punctuation and full-width forms,
/// and common ASCII/typographic punctuation.
static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"[^\p{Han}\p{Hiragana}\p{Katakana}\p{Alphabetic}\p{N}\s\x{3000}-\x{303F}\x{FF00}-\x{FFEF}.,!?;:()\[\]{}<>"'%/+\-=_#@&*~|°·…—–‧“”‘’]"#,
    )
    .unwrap()
});

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strip disallowed characters, then collapse whitespace runs.
///
/// A run holding two or more line breaks becomes a paragraph break (`\n\n`),
/// a run with one line break becomes `\n`, anything else a single space.
/// Line structure survives so the splitter can still prefer paragraph and
/// line boundaries.
pub fn clean_text(raw: &str) -> String {
    let stripped = DISALLOWED.replace_all(raw, "");
    let collapsed = WHITESPACE_RUN.replace_all(&stripped, |caps: &Captures<'_>| {
        match caps[0].matches('\n').count() {
            0 => " ",
            1 => "\n",
            _ => "\n\n",
        }
    });
    collapsed.trim().to_string()
}
