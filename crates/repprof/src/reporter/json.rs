//! JSON exporter.

use std::{
    fs,
    io::{self, BufWriter},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::{PrintingReporter, ProfileReport, RepetitionReport, Reporter, Verbosity};

/// Results collected by a [`JsonExporter`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ExportedResults {
    /// Latest reported profile, if any.
    pub profile: Option<ProfileReport>,
    /// Reported repetition tests in the reporting order.
    pub repetitions: Vec<RepetitionReport>,
}

/// Errors that can occur when writing exported results.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExportError {
    /// Error creating the parent directory for the output file.
    #[error("failed creating parent dir for `{}`: {source}", path.display())]
    CreateDir {
        /// Path to the output file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Error creating the output file.
    #[error("failed creating `{}`: {source}", path.display())]
    Create {
        /// Path to the output file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Error serializing results.
    #[error("failed writing `{}`: {source}", path.display())]
    Write {
        /// Path to the output file.
        path: PathBuf,
        /// Underlying serialization error.
        source: serde_json::Error,
    },
}

/// Reporter collecting profiles and repetition test results, and writing them to a JSON file
/// once reporting is finished.
#[derive(Debug)]
pub struct JsonExporter {
    out_path: PathBuf,
    results: ExportedResults,
}

impl JsonExporter {
    /// Creates an exporter writing to the specified path.
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            results: ExportedResults::default(),
        }
    }

    /// Returns the output path.
    pub fn out_path(&self) -> &Path {
        &self.out_path
    }

    /// Returns results collected so far.
    pub fn results(&self) -> &ExportedResults {
        &self.results
    }

    /// Writes collected results to the output path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parent directory cannot be created, or if writing to the file fails.
    pub fn write(&self) -> Result<(), ExportError> {
        let path = &self.out_path;
        if let Some(parent_dir) = path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| ExportError::CreateDir {
                path: path.clone(),
                source,
            })?;
        }

        let writer = fs::File::create(path).map_err(|source| ExportError::Create {
            path: path.clone(),
            source,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(writer), &self.results).map_err(|source| {
            ExportError::Write {
                path: path.clone(),
                source,
            }
        })
    }
}

impl Reporter for JsonExporter {
    fn report_profile(&mut self, report: &ProfileReport) {
        self.results.profile = Some(report.clone());
    }

    fn report_repetitions(&mut self, report: &RepetitionReport) {
        self.results.repetitions.push(report.clone());
    }

    fn ok(self: Box<Self>) {
        if let Err(err) = self.write() {
            PrintingReporter::stderr(Verbosity::Quiet).error(&err);
        }
    }
}
