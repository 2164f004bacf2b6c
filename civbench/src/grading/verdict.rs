//! Grader output: per-sub-question verdicts and the strict parser

use indexmap::IndexMap;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::assignments::normalize_label;

/// Classification of one sub-question answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Correct,
    Partial,
    Incorrect,
}

impl Verdict {
    /// Credit towards the score: 1, 0.5 or 0
    pub fn weight(&self) -> f64 {
        match self {
            Verdict::Correct => 1.0,
            Verdict::Partial => 0.5,
            Verdict::Incorrect => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Correct => "correct",
            Verdict::Partial => "partial",
            Verdict::Incorrect => "incorrect",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "correct" => Ok(Verdict::Correct),
            "partial" => Ok(Verdict::Partial),
            "incorrect" => Ok(Verdict::Incorrect),
            other => Err(format!("unknown verdict '{}'", other)),
        }
    }
}

/// A validated grading result
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictSheet {
    /// Normalised label -> verdict, in the order the grader listed them
    pub questions: IndexMap<String, Verdict>,
    /// Figures the grader reported about itself; informational only
    pub reported_total_correct: Option<f64>,
    pub reported_total_questions: Option<f64>,
    pub reported_score: Option<f64>,
}

/// Tagged parse result; the raw text survives a failure
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(VerdictSheet),
    Unparseable { reason: String, raw: String },
}

impl ParseOutcome {
    pub fn is_parsed(&self) -> bool {
        matches!(self, ParseOutcome::Parsed(_))
    }
}

#[derive(Deserialize)]
struct WireSheet {
    #[serde(default, deserialize_with = "question_entries")]
    questions: Option<Vec<(String, serde_json::Value)>>,
    total_correct: Option<f64>,
    total_questions: Option<f64>,
    score: Option<f64>,
}

/// Keeps every entry of the `questions` object in order, repeated keys included
fn question_entries<'de, D>(deserializer: D) -> Result<Option<Vec<(String, serde_json::Value)>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Entries;

    impl<'de> Visitor<'de> for Entries {
        type Value = Option<Vec<(String, serde_json::Value)>>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an object mapping question labels to verdicts")
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry::<String, serde_json::Value>()? {
                entries.push(entry);
            }
            Ok(Some(entries))
        }
    }

    deserializer.deserialize_any(Entries)
}

/// Locate the JSON object in a grader reply: a ```json fence, a bare
/// ``` fence, or the span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    for fence in ["```json", "```"] {
        if let Some(start) = text.find(fence) {
            let body = &text[start + fence.len()..];
            let end = body.find("```").unwrap_or(body.len());
            return body[..end].trim();
        }
    }

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Parse grader output into a [`VerdictSheet`].
///
/// Fails on malformed JSON, a missing or empty `questions` object, a label
/// given twice, or any verdict outside `correct | partial | incorrect`.
pub fn parse_verdict_sheet(raw: &str) -> ParseOutcome {
    let unparseable = |reason: String| ParseOutcome::Unparseable {
        reason,
        raw: raw.to_string(),
    };

    let wire: WireSheet = match serde_json::from_str(extract_json(raw)) {
        Ok(wire) => wire,
        Err(e) => return unparseable(format!("invalid JSON: {}", e)),
    };

    let entries = match wire.questions {
        Some(entries) if !entries.is_empty() => entries,
        Some(_) => return unparseable("'questions' is empty".to_string()),
        None => return unparseable("missing 'questions' object".to_string()),
    };

    let mut questions = IndexMap::with_capacity(entries.len());
    for (label, value) in entries {
        let verdict = match value.as_str().map(Verdict::from_str) {
            Some(Ok(v)) => v,
            Some(Err(e)) => return unparseable(format!("question {}: {}", label, e)),
            None => {
                return unparseable(format!("question {}: verdict is not a string", label))
            }
        };
        let label = normalize_label(&label);
        if questions.contains_key(&label) {
            return unparseable(format!("duplicate question label {}", label));
        }
        questions.insert(label, verdict);
    }

    ParseOutcome::Parsed(VerdictSheet {
        questions,
        reported_total_correct: wire.total_correct,
        reported_total_questions: wire.total_questions,
        reported_score: wire.score,
    })
}
