//! Append-only grade log (`grades.jsonl`)
//!
//! Producers clone a [`LogSender`] and enqueue records; a single writer task
//! owns the file, so every record becomes exactly one line no matter how
//! many tasks append concurrently.

use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::analysis::{GradeTable, MalformedLine};
use crate::grading::GradeRecord;

/// Error type for the grade log
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Grade log writer has stopped")]
    Closed,

    #[error("Grade log writer panicked: {0}")]
    Writer(String),
}

/// Handle for enqueueing records
#[derive(Debug, Clone)]
pub struct LogSender {
    tx: mpsc::UnboundedSender<GradeRecord>,
}

impl LogSender {
    pub fn append(&self, record: GradeRecord) -> Result<(), LogError> {
        self.tx.send(record).map_err(|_| LogError::Closed)
    }
}

/// The single writer behind a grade log file
pub struct GradeLog {
    path: PathBuf,
    sender: LogSender,
    writer: JoinHandle<Result<usize, LogError>>,
}

impl GradeLog {
    /// Open (or create) the log in append mode and start the writer task
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| LogError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| LogError::Io {
                path: path.clone(),
                source,
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<GradeRecord>();
        let writer_path = path.clone();

        let writer = tokio::spawn(async move {
            let mut written = 0usize;
            while let Some(record) = rx.recv().await {
                let mut line = match serde_json::to_string(&record) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!(
                            "Dropping grade for {} assignment {}: {}",
                            record.tested_model,
                            record.assignment,
                            e
                        );
                        continue;
                    }
                };
                line.push('\n');

                let io_err = |source: std::io::Error| LogError::Io {
                    path: writer_path.clone(),
                    source,
                };
                file.write_all(line.as_bytes()).await.map_err(io_err)?;
                file.flush().await.map_err(io_err)?;
                written += 1;
            }
            Ok::<usize, LogError>(written)
        });

        tracing::debug!("Appending grades to {}", path.display());
        Ok(Self {
            path,
            sender: LogSender { tx },
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sender(&self) -> LogSender {
        self.sender.clone()
    }

    /// Close the queue and wait for the writer to drain it.
    ///
    /// Returns the number of lines written in this session. Clones of the
    /// sender still alive elsewhere keep the writer running until dropped.
    pub async fn finish(self) -> Result<usize, LogError> {
        drop(self.sender);
        match self.writer.await {
            Ok(result) => result,
            Err(e) => Err(LogError::Writer(e.to_string())),
        }
    }
}

/// Load every line of a grade log.
///
/// Blank lines are ignored. Lines that fail to parse are collected in
/// [`GradeTable::malformed`] instead of failing the load.
pub fn load_grade_table(path: impl AsRef<Path>) -> Result<GradeTable, LogError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| LogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_grade_lines(&content))
}

/// Parse JSONL text into a table
pub fn parse_grade_lines(content: &str) -> GradeTable {
    let mut records = Vec::new();
    let mut malformed = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<GradeRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Skipping malformed grade log line {}: {}", idx + 1, e);
                malformed.push(MalformedLine {
                    line_number: idx + 1,
                    error: e.to_string(),
                });
            }
        }
    }

    GradeTable::new(records).with_malformed(malformed)
}
