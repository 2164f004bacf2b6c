//! Assignment loading from the images and ground-truth directories

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::labels::{normalize_label, parse_markdown_answer_key};
use super::{render_answer_key, Assignment};
use crate::providers::ImageAttachment;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Error type for assignment loading
#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No images found for assignment {0}")]
    NoImages(u32),

    #[error("Ground truth not found for assignment {0}")]
    MissingGroundTruth(u32),

    #[error("Ground truth for assignment {number} has no sub-question labels ({path})")]
    EmptyAnswerKey { number: u32, path: PathBuf },

    #[error("Parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> AssignmentError + '_ {
    move |source| AssignmentError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Deserialize)]
struct TomlAnswerKey {
    answers: IndexMap<String, String>,
}

/// Reads assignments from `images_dir` (`N.png`, `N.1.png`, …) and
/// `ground_truth_dir` (`N.json`, `N.toml` or `N.md`)
#[derive(Debug, Clone)]
pub struct AssignmentStore {
    images_dir: PathBuf,
    ground_truth_dir: PathBuf,
}

impl AssignmentStore {
    pub fn new(images_dir: impl Into<PathBuf>, ground_truth_dir: impl Into<PathBuf>) -> Self {
        Self {
            images_dir: images_dir.into(),
            ground_truth_dir: ground_truth_dir.into(),
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Image files for an assignment: `N.png` first, then `N.1.png`, `N.2.png`, …
    pub fn find_images(&self, number: u32) -> Result<Vec<PathBuf>, AssignmentError> {
        let pattern = Regex::new(&format!(
            r"(?i)^{}(?:\.(\d+))?\.(?:{})$",
            number,
            IMAGE_EXTENSIONS.join("|")
        ))
        .map_err(|e| AssignmentError::Parse {
            path: self.images_dir.clone(),
            message: e.to_string(),
        })?;

        let entries = match std::fs::read_dir(&self.images_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.images_dir)(e)),
        };

        let mut found: Vec<(u32, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&self.images_dir))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(caps) = pattern.captures(&name) {
                let page = caps
                    .get(1)
                    .and_then(|m| m.as_str().parse::<u32>().ok())
                    .map(|p| p + 1)
                    .unwrap_or(0);
                found.push((page, entry.path()));
            }
        }

        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    /// Assignment numbers that have at least one image
    pub fn available(&self) -> Result<Vec<u32>, AssignmentError> {
        let pattern = Regex::new(&format!(
            r"(?i)^(\d+)(?:\.\d+)?\.(?:{})$",
            IMAGE_EXTENSIONS.join("|")
        ))
        .map_err(|e| AssignmentError::Parse {
            path: self.images_dir.clone(),
            message: e.to_string(),
        })?;

        let entries = match std::fs::read_dir(&self.images_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.images_dir)(e)),
        };

        let mut numbers = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&self.images_dir))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(n) = pattern
                .captures(&name)
                .and_then(|caps| caps[1].parse::<u32>().ok())
            {
                numbers.insert(n);
            }
        }
        Ok(numbers.into_iter().collect())
    }

    /// Load the answer key and ground truth text for an assignment
    pub fn load_ground_truth(
        &self,
        number: u32,
    ) -> Result<(IndexMap<String, String>, String), AssignmentError> {
        let json_path = self.ground_truth_dir.join(format!("{}.json", number));
        if json_path.exists() {
            let content = std::fs::read_to_string(&json_path).map_err(io_err(&json_path))?;
            let key: IndexMap<String, String> =
                serde_json::from_str(&content).map_err(|e| AssignmentError::Parse {
                    path: json_path.clone(),
                    message: e.to_string(),
                })?;
            let key = normalize_keys(key);
            let text = render_answer_key(&key);
            return non_empty(number, &json_path, key, text);
        }

        let toml_path = self.ground_truth_dir.join(format!("{}.toml", number));
        if toml_path.exists() {
            let content = std::fs::read_to_string(&toml_path).map_err(io_err(&toml_path))?;
            let parsed: TomlAnswerKey =
                toml::from_str(&content).map_err(|e| AssignmentError::Parse {
                    path: toml_path.clone(),
                    message: e.to_string(),
                })?;
            let key = normalize_keys(parsed.answers);
            let text = render_answer_key(&key);
            return non_empty(number, &toml_path, key, text);
        }

        let md_path = self.ground_truth_dir.join(format!("{}.md", number));
        if md_path.exists() {
            let content = std::fs::read_to_string(&md_path).map_err(io_err(&md_path))?;
            let key = parse_markdown_answer_key(&content);
            return non_empty(number, &md_path, key, content);
        }

        Err(AssignmentError::MissingGroundTruth(number))
    }

    /// Load a complete assignment: images plus ground truth
    pub fn load(&self, number: u32) -> Result<Assignment, AssignmentError> {
        let paths = self.find_images(number)?;
        if paths.is_empty() {
            return Err(AssignmentError::NoImages(number));
        }

        let images = paths
            .iter()
            .map(|p| ImageAttachment::from_path(p).map_err(io_err(p)))
            .collect::<Result<Vec<_>, _>>()?;

        let (answer_key, ground_truth) = self.load_ground_truth(number)?;

        tracing::debug!(
            "Loaded assignment {}: {} image(s), {} sub-question(s)",
            number,
            images.len(),
            answer_key.len()
        );

        Ok(Assignment {
            number,
            images,
            answer_key,
            ground_truth,
        })
    }
}

fn normalize_keys(key: IndexMap<String, String>) -> IndexMap<String, String> {
    key.into_iter()
        .map(|(label, answer)| (normalize_label(&label), answer))
        .collect()
}

fn non_empty(
    number: u32,
    path: &Path,
    key: IndexMap<String, String>,
    text: String,
) -> Result<(IndexMap<String, String>, String), AssignmentError> {
    if key.is_empty() {
        return Err(AssignmentError::EmptyAnswerKey {
            number,
            path: path.to_path_buf(),
        });
    }
    Ok((key, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store_with(files: &[(&str, &str)]) -> (tempfile::TempDir, AssignmentStore) {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        let truth = dir.path().join("ground_truth");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&truth).unwrap();
        for (name, content) in files {
            let target = if name.ends_with(".png") || name.ends_with(".jpg") {
                images.join(name)
            } else {
                truth.join(name)
            };
            fs::write(target, content).unwrap();
        }
        (dir, AssignmentStore::new(images, truth))
    }

    #[test]
    fn test_image_order() {
        let (_dir, store) = store_with(&[
            ("1.10.png", "j"),
            ("1.2.png", "b"),
            ("1.png", "a"),
            ("1.1.jpg", "c"),
            ("11.png", "x"),
            ("2.png", "y"),
        ]);

        let names: Vec<String> = store
            .find_images(1)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["1.png", "1.1.jpg", "1.2.png", "1.10.png"]);
        assert_eq!(store.available().unwrap(), vec![1, 2, 11]);
    }

    #[test]
    fn test_missing_images_dir_is_empty() {
        let store = AssignmentStore::new("/nonexistent/images", "/nonexistent/gt");
        assert!(store.find_images(1).unwrap().is_empty());
        assert!(matches!(store.load(1), Err(AssignmentError::NoImages(1))));
    }

    #[test]
    fn test_load_json_ground_truth() {
        let (_dir, store) = store_with(&[
            ("3.png", "img"),
            ("3.json", r#"{"Question 1a": "12 kN", "1b": "36 kN·m"}"#),
        ]);

        let assignment = store.load(3).unwrap();
        assert_eq!(assignment.images.len(), 1);
        assert_eq!(assignment.images[0].media_type, "image/png");
        assert_eq!(assignment.labels(), vec!["1a", "1b"]);
        assert_eq!(assignment.ground_truth, "1a: 12 kN\n1b: 36 kN·m");
    }

    #[test]
    fn test_load_toml_and_markdown_ground_truth() {
        let (_dir, store) = store_with(&[
            ("4.png", "img"),
            ("4.toml", "[answers]\n\"2a\" = \"W310x39\"\n\"2b\" = \"OK\"\n"),
            ("5.png", "img"),
            ("5.md", "## 1\nDelta = 14 mm\n## 2\nPasses\n"),
        ]);

        assert_eq!(store.load(4).unwrap().labels(), vec!["2a", "2b"]);

        let five = store.load(5).unwrap();
        assert_eq!(five.labels(), vec!["1", "2"]);
        assert!(five.ground_truth.starts_with("## 1"));
    }

    #[test]
    fn test_ground_truth_errors() {
        let (_dir, store) = store_with(&[
            ("6.png", "img"),
            ("7.png", "img"),
            ("7.md", "Everything is in the attached PDF."),
        ]);

        assert!(matches!(store.load(6), Err(AssignmentError::MissingGroundTruth(6))));
        assert!(matches!(
            store.load(7),
            Err(AssignmentError::EmptyAnswerKey { number: 7, .. })
        ));
    }
}
