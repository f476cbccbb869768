use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Append-only destination for step panics captured by the executor.
///
/// Writes are serialized behind one lock; a failed write degrades to a
/// warning and the simulation keeps running.
#[derive(Debug)]
pub(crate) struct ErrorSink {
    file: Mutex<BufWriter<File>>,
}

impl ErrorSink {
    pub(crate) fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    pub(crate) fn append(&self, scenario: &str, step: &str, user: u64, error: &str) {
        let error = error.replace('\n', " ");
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let outcome = writeln!(file, "scenario={scenario} step={step} user={user} error={error}")
            .and_then(|()| file.flush());
        if let Err(err) = outcome {
            tracing::warn!(error = %err, "failed to append to the error sink");
        }
    }
}
