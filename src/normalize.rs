//! Canonical text extraction from raw HTML.
//!
//! Strips non-content markup, collapses whitespace runs to single spaces
//! and leaves every script (Latin, CJK, anything else) untouched. The
//! resulting canonical text is the unit of comparison for change
//! detection.

use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::warn;

/// Canonical text shorter than this is treated as an invalid fetch, not a
/// content change.
pub const MIN_TEXT_LEN: usize = 32;

/// Tags whose entire subtree carries no monitorable content.
const STRIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "img", "svg", "canvas", "audio", "video", "head",
    "meta", "link", "template",
];

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("canonical text too short ({got} chars, minimum {min})")]
    TooShort { got: usize, min: usize },
}

/// Result of normalizing one fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedContent {
    /// Whitespace-collapsed text of the whole page.
    pub full_text: String,
    /// Text of the selector-matched sub-tree, when configured and matched.
    pub extracted: Option<String>,
    /// True when a configured selector matched nothing (or failed to
    /// parse) and monitoring degraded to the full page.
    pub selector_degraded: bool,
}

impl NormalizedContent {
    /// The text actually monitored: the extracted sub-element when
    /// available, the full page otherwise.
    pub fn monitored_text(&self) -> &str {
        self.extracted.as_deref().unwrap_or(&self.full_text)
    }
}

/// Normalize a page, optionally extracting a selector-matched sub-tree.
///
/// A selector that matches nothing degrades to full-page monitoring with
/// a flagged condition rather than a hard error; the original
/// configuration mistake stays visible in check diagnostics.
pub fn normalize(
    html: &str,
    selector: Option<&str>,
    min_len: usize,
) -> Result<NormalizedContent, ContentError> {
    let doc = Html::parse_document(html);

    let full_text = match Selector::parse("body")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
    {
        Some(body) => collapse(&collect_text(*body)),
        None => collapse(&collect_text(*doc.root_element())),
    };

    let (extracted, selector_degraded) = match selector.filter(|s| !s.trim().is_empty()) {
        Some(raw) => match Selector::parse(raw) {
            Ok(sel) => match doc.select(&sel).next() {
                Some(node) => (Some(collapse(&collect_text(*node))), false),
                None => {
                    warn!(selector = raw, "selector matched nothing, monitoring full page");
                    (None, true)
                }
            },
            Err(_) => {
                warn!(selector = raw, "selector failed to parse, monitoring full page");
                (None, true)
            }
        },
        None => (None, false),
    };

    let content = NormalizedContent {
        full_text,
        extracted,
        selector_degraded,
    };

    let got = content.monitored_text().chars().count();
    if got < min_len {
        return Err(ContentError::TooShort { got, min: min_len });
    }

    Ok(content)
}

/// Gather text from a subtree, skipping non-content tags.
fn collect_text(root: NodeRef<'_, Node>) -> String {
    let mut out = String::new();
    walk(root, &mut out);
    out
}

fn walk(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Element(el) => {
            if STRIP_TAGS.contains(&el.name()) {
                return;
            }
        }
        Node::Text(text) => {
            out.push_str(text);
            out.push(' ');
        }
        _ => {}
    }
    for child in node.children() {
        walk(child, out);
    }
}

/// Collapse whitespace runs to single spaces. Unicode-aware; non-Latin
/// text passes through unmodified.
fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
