//! Content fingerprinting and change evaluation.
//!
//! The fingerprint is a SHA-256 over the canonical text; hash equality is
//! the primary and sufficient no-change signal. Keyword presence deltas
//! against the previous preview only refine the human-readable reason.

use sha2::{Digest, Sha256};

use crate::models::{ChangeReason, ChangeVerdict, PREVIEW_LEN};

/// Compute the content fingerprint. Deterministic across runs for
/// identical canonical text.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Bound a canonical-text snapshot for storage and comparison.
pub fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_LEN).collect()
}

/// Compare new canonical text against the stored fingerprint and derive a
/// verdict.
///
/// A check with no stored fingerprint establishes the baseline: the
/// verdict is unchanged (no notification) but the fingerprint is still
/// recorded by the caller.
pub fn evaluate(
    text: &str,
    previous_fingerprint: Option<&str>,
    previous_preview: Option<&str>,
    keywords: &[String],
) -> ChangeVerdict {
    let new_fingerprint = fingerprint(text);
    let matched = matching_keywords(text, keywords);

    let (changed, reason, detail) = match previous_fingerprint {
        None => (false, ChangeReason::FirstCheck, "first check, baseline stored".to_string()),
        Some(prev) if prev == new_fingerprint => {
            (false, ChangeReason::Unchanged, "content hash unchanged".to_string())
        }
        Some(_) => keyword_reason(&matched, previous_preview, keywords),
    };

    ChangeVerdict {
        changed,
        reason,
        detail,
        fingerprint: new_fingerprint,
        new_preview: preview(text),
        old_preview: previous_preview.map(|p| p.to_string()),
        matched_keywords: matched,
    }
}

/// Keywords present in the canonical text, case-insensitively.
fn matching_keywords(text: &str, keywords: &[String]) -> Vec<String> {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .filter(|k| haystack.contains(&k.to_lowercase()))
        .map(|k| k.to_string())
        .collect()
}

/// Derive the changed-content reason, naming keywords that newly appeared
/// in the text or disappeared from the stored preview. Best effort: the
/// preview is bounded, keyword presence is the diff unit.
fn keyword_reason(
    matched: &[String],
    previous_preview: Option<&str>,
    keywords: &[String],
) -> (bool, ChangeReason, String) {
    let old_matched = previous_preview
        .map(|p| matching_keywords(p, keywords))
        .unwrap_or_default();

    let appeared: Vec<&str> = matched
        .iter()
        .filter(|k| !old_matched.contains(k))
        .map(|k| k.as_str())
        .collect();
    let disappeared: Vec<&str> = old_matched
        .iter()
        .filter(|k| !matched.contains(k))
        .map(|k| k.as_str())
        .collect();

    let mut parts = vec!["content hash differs".to_string()];
    if !appeared.is_empty() {
        parts.push(format!("keywords newly present: {}", appeared.join(", ")));
    }
    if !disappeared.is_empty() {
        parts.push(format!("keywords no longer present: {}", disappeared.join(", ")));
    }

    let reason = if appeared.is_empty() && disappeared.is_empty() {
        ChangeReason::ContentChanged
    } else {
        ChangeReason::KeywordsChanged
    };

    (true, reason, parts.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let text = "Product A – 在庫あり in stock";
        assert_eq!(fingerprint(text), fingerprint(text));
        assert_ne!(fingerprint(text), fingerprint("Product A – sold out"));
    }

    #[test]
    fn first_check_stores_baseline_without_change() {
        let verdict = evaluate("some page text", None, None, &[]);
        assert!(!verdict.changed);
        assert_eq!(verdict.reason, ChangeReason::FirstCheck);
        assert_eq!(verdict.fingerprint, fingerprint("some page text"));
    }

    #[test]
    fn identical_hash_is_unchanged_regardless_of_keywords() {
        let text = "now with discontinued notice";
        let prev = fingerprint(text);
        let verdict = evaluate(text, Some(&prev), Some("old preview"), &["discontinued".into()]);
        assert!(!verdict.changed);
        assert_eq!(verdict.reason, ChangeReason::Unchanged);
    }

    #[test]
    fn comparison_is_idempotent() {
        let text = "stable content body";
        let stored = fingerprint(text);
        for _ in 0..3 {
            let verdict = evaluate(text, Some(&stored), None, &[]);
            assert!(!verdict.changed);
        }
    }

    #[test]
    fn hash_difference_is_a_change() {
        let prev = fingerprint("Product A – in stock");
        let verdict = evaluate("Product A – now cheaper", Some(&prev), Some("Product A – in stock"), &[]);
        assert!(verdict.changed);
        assert_eq!(verdict.reason, ChangeReason::ContentChanged);
        assert!(verdict.detail.contains("content hash differs"));
    }

    #[test]
    fn newly_present_keyword_is_named() {
        let old = "Product A – in stock";
        let prev = fingerprint(old);
        let verdict = evaluate(
            "Product A – discontinued",
            Some(&prev),
            Some(old),
            &["discontinued".into()],
        );
        assert!(verdict.changed);
        assert_eq!(verdict.reason, ChangeReason::KeywordsChanged);
        assert!(verdict.detail.contains("newly present: discontinued"));
        assert_eq!(verdict.matched_keywords, vec!["discontinued"]);
    }

    #[test]
    fn disappeared_keyword_is_named() {
        let old = "Product A – in stock";
        let prev = fingerprint(old);
        let verdict = evaluate(
            "Product A – gone",
            Some(&prev),
            Some(old),
            &["in stock".into()],
        );
        assert!(verdict.changed);
        assert!(verdict.detail.contains("no longer present: in stock"));
    }

    #[test]
    fn keyword_matching_is_case_insensitive_and_trimmed() {
        let matched = matching_keywords("Now DISCONTINUED forever", &["  discontinued ".into()]);
        assert_eq!(matched, vec!["discontinued"]);
    }

    #[test]
    fn preview_is_bounded_on_char_boundaries() {
        let long: String = "変".repeat(900);
        assert_eq!(preview(&long).chars().count(), 500);
    }
}
