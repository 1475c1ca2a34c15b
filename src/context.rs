//! Context assembly: turns retrieved passages into the numbered context
//! block handed to the generator.
//!
//! Passages arrive noisy — some have empty text, some carry partial
//! metadata — so assembly is defensive: empty items are dropped without
//! consuming a number, and metadata is appended only when present.

use crate::models::Passage;

/// Sentinel returned when no usable sources exist.
pub const NO_SOURCES_NOTICE: &str = "情報ソースが見つかりませんでした。";

/// An input item for [`build_context`]: a retrieved passage or bare text.
pub enum ContextItem {
    Passage(Passage),
    Text(String),
}

impl From<Passage> for ContextItem {
    fn from(p: Passage) -> Self {
        ContextItem::Passage(p)
    }
}

impl From<String> for ContextItem {
    fn from(s: String) -> Self {
        ContextItem::Text(s)
    }
}

impl From<&str> for ContextItem {
    fn from(s: &str) -> Self {
        ContextItem::Text(s.to_string())
    }
}

/// Build the formatted context string for prompting.
///
/// Each kept item becomes one line, numbered densely from `01.`;
/// passage metadata (date, location, score) follows the text in
/// full-width parentheses. Items whose text is empty after trimming are
/// skipped entirely. Returns [`NO_SOURCES_NOTICE`] when nothing is kept.
pub fn build_context(items: &[ContextItem]) -> String {
    if items.is_empty() {
        return NO_SOURCES_NOTICE.to_string();
    }

    let mut lines: Vec<String> = Vec::new();
    for item in items {
        let (text, meta) = match item {
            ContextItem::Passage(p) => (p.text.trim(), passage_meta(p)),
            ContextItem::Text(s) => (s.trim(), String::new()),
        };

        if text.is_empty() {
            continue;
        }

        let mut numbered = format!("{:02}. {}", lines.len() + 1, text);
        if !meta.is_empty() {
            numbered = format!("{}（{}）", numbered, meta);
        }
        lines.push(numbered);
    }

    if lines.is_empty() {
        return NO_SOURCES_NOTICE.to_string();
    }

    lines.join("\n")
}

/// Auxiliary metadata for one passage: date, location, score — whichever
/// are present, in that order.
fn passage_meta(p: &Passage) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !p.metadata.date.trim().is_empty() {
        parts.push(p.metadata.date.trim().to_string());
    }
    if !p.metadata.location.trim().is_empty() {
        parts.push(p.metadata.location.trim().to_string());
    }
    parts.push(format!("{}", p.score));
    parts.join(" / ")
}
