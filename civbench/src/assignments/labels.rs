//! Sub-question labels: normalisation and markdown answer-key parsing

use indexmap::IndexMap;
use regex::Regex;
use std::sync::OnceLock;

const LABEL: &str = r"\d+\s*(?:\(\s*[a-z]\s*\)|[a-z])?";
const PREFIX: &str = r"(?:(?:question|problem|q)\.?\s*)?";

fn label_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // ## 1a / ### Question 2(b): ...
            format!(r"(?i)^\s*#{{1,6}}\s*{PREFIX}(?P<label>{LABEL})\s*(?:[:.)]\s*|\s+|$)(?P<rest>.*)$"),
            // **1a** / **Question 2:** ...
            format!(r"(?i)^\s*\*\*\s*{PREFIX}(?P<label>{LABEL})\s*[:.)]?\s*\*\*\s*[:.)]?\s*(?P<rest>.*)$"),
            // Question 3: ...
            format!(r"(?i)^\s*(?:question|problem|q)\.?\s*(?P<label>{LABEL})\s*[:.)]\s*(?P<rest>.*)$"),
            // 1a: ... / 1(b) ...
            format!(r"(?i)^\s*(?P<label>\d+\s*(?:\(\s*[a-z]\s*\)|[a-z]))\s*[:)]\s*(?P<rest>.*)$"),
        ]
        .iter()
        .map(|p| Regex::new(p).expect("label pattern is valid"))
        .collect()
    })
}

/// Canonical form of a sub-question label.
///
/// `"Question 1(a):"`, `"**1A**"` and `"1a"` all normalise to `"1a"`.
pub fn normalize_label(raw: &str) -> String {
    let mut s: String = raw
        .trim()
        .trim_matches('*')
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '(' | ')'))
        .collect();

    for prefix in ["question", "problem", "q"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            if rest.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
                s = rest.trim_start_matches('.').to_string();
                break;
            }
        }
    }

    s.trim_end_matches(|c| matches!(c, ':' | '.' | '-' | '*')).to_string()
}

/// Try to read a label from the start of a line
fn match_label(line: &str) -> Option<(String, String)> {
    label_patterns().iter().find_map(|re| {
        re.captures(line).map(|caps| {
            let label = normalize_label(&caps["label"]);
            let rest = caps
                .name("rest")
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            (label, rest)
        })
    })
}

/// Split a markdown ground-truth document into `label -> expected answer`.
///
/// Text before the first label is ignored. A repeated label appends to the
/// existing entry.
pub fn parse_markdown_answer_key(text: &str) -> IndexMap<String, String> {
    let mut key: IndexMap<String, String> = IndexMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        if let Some((label, rest)) = match_label(line) {
            let entry = key.entry(label.clone()).or_default();
            if !rest.is_empty() {
                if !entry.is_empty() {
                    entry.push('\n');
                }
                entry.push_str(&rest);
            }
            current = Some(label);
        } else if let Some(label) = &current {
            if let Some(entry) = key.get_mut(label) {
                if !entry.is_empty() || !line.trim().is_empty() {
                    if !entry.is_empty() {
                        entry.push('\n');
                    }
                    entry.push_str(line);
                }
            }
        }
    }

    for answer in key.values_mut() {
        *answer = answer.trim().to_string();
    }
    key
}

/// Whether `text` mentions `label` as a standalone token (case-insensitive).
///
/// `"1a"` matches `"Question 1a:"`, `"1(a)"` and `"1 a)"` but not `"11a"`.
pub fn mentions_label(text: &str, label: &str) -> bool {
    let normalized = normalize_label(label);
    let mut chars = normalized.chars();
    let digits: String = chars.by_ref().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return text.to_lowercase().contains(&normalized);
    }
    let suffix: String = normalized[digits.len()..].to_string();

    let pattern = if suffix.is_empty() {
        format!(r"(?i)(?:^|[^0-9a-z]){}(?:[^0-9a-z]|$)", regex::escape(&digits))
    } else {
        format!(
            r"(?i)(?:^|[^0-9a-z]){}\s*\(?\s*{}\s*\)?(?:[^0-9a-z]|$)",
            regex::escape(&digits),
            regex::escape(&suffix)
        )
    };

    Regex::new(&pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}
