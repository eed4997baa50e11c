//! Error types for the feature pipeline
//!
//! Degenerate signals (zero variance, too few usable timepoints) are never
//! errors; they are handled locally by each stage. Everything here aborts the
//! current subject.

use std::path::PathBuf;

use thiserror::Error;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required input file or directory does not exist
    #[error("Missing {what}: {}", .path.display())]
    MissingInput {
        /// Which artifact was expected (e.g. "BOLD volume")
        what: &'static str,
        /// Where it was expected
        path: PathBuf,
    },

    /// Filesystem failure while reading or writing an artifact
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Volume could not be decoded or has an unusable shape
    #[error("Invalid NIfTI volume: {0}")]
    Nifti(String),

    /// Confound table could not be parsed
    #[error("Invalid confound table: {0}")]
    Confounds(String),

    /// A confound column the stage cannot run without is absent
    #[error("Confound column '{0}' not found")]
    MissingConfound(String),

    /// Confound rows are not aligned with the volume's time axis
    #[error("Confound table has {rows} rows but the volume has {timepoints} timepoints")]
    TimepointMismatch {
        /// Rows in the confound table
        rows: usize,
        /// Timepoints in the volume
        timepoints: usize,
    },

    /// Atlas table could not be parsed
    #[error("Invalid atlas: {0}")]
    Atlas(String),

    /// A seed sphere contains no voxel of the volume
    #[error("Region {index} at ({x:.1}, {y:.1}, {z:.1}) mm contains no voxels")]
    EmptyRegion {
        /// 1-based region index
        index: usize,
        /// Seed x in mm
        x: f64,
        /// Seed y in mm
        y: f64,
        /// Seed z in mm
        z: f64,
    },

    /// Filter parameters are inconsistent
    #[error("Invalid filter: {0}")]
    Filter(String),

    /// Configuration file is malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A named feature is absent from the feature vector
    #[error("Feature '{0}' not found; feature definition and model are out of sync")]
    FeatureMismatch(String),

    /// Model bundle is malformed or inconsistent with the features
    #[error("Model bundle error: {0}")]
    Model(String),

    /// The external preprocessing step failed
    #[error("Preprocessing failed: {0}")]
    Preprocessing(String),

    /// The external scorer failed or returned malformed output
    #[error("Scorer failed: {0}")]
    Scorer(String),

    /// CSV/TSV reader or writer failure
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, PipelineError>;
