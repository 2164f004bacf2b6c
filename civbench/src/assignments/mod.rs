//! Assignment definitions and loading

pub mod labels;
pub mod loader;

pub use labels::{normalize_label, parse_markdown_answer_key};
pub use loader::{AssignmentError, AssignmentStore};

use indexmap::IndexMap;

use crate::providers::ImageAttachment;

/// One homework problem set: its page images and the answer key
#[derive(Debug, Clone)]
pub struct Assignment {
    pub number: u32,
    pub images: Vec<ImageAttachment>,
    /// Expected answer per sub-question label, in document order
    pub answer_key: IndexMap<String, String>,
    /// Ground truth text embedded in grading prompts
    pub ground_truth: String,
}

impl Assignment {
    /// Build an assignment from an answer key; the ground truth text is rendered from it
    pub fn new(number: u32, answer_key: IndexMap<String, String>) -> Self {
        let ground_truth = render_answer_key(&answer_key);
        Self {
            number,
            images: Vec::new(),
            answer_key,
            ground_truth,
        }
    }

    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }

    pub fn with_ground_truth(mut self, text: impl Into<String>) -> Self {
        self.ground_truth = text.into();
        self
    }

    /// Sub-question labels in document order
    pub fn labels(&self) -> Vec<&str> {
        self.answer_key.keys().map(String::as_str).collect()
    }

    pub fn expected_count(&self) -> usize {
        self.answer_key.len()
    }
}

/// Render an answer key as `label: answer` lines
pub fn render_answer_key(answer_key: &IndexMap<String, String>) -> String {
    answer_key
        .iter()
        .map(|(label, answer)| format!("{}: {}", label, answer))
        .collect::<Vec<_>>()
        .join("\n")
}
