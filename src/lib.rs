//! Neuroscope: fMRI signal conditioning and entropy features
//!
//! This crate turns a preprocessed 4D BOLD volume and its confound table
//! into a fixed-length vector of regional entropy features, and prepares
//! that vector for an external classifier.
//!
//! # Modules
//! - `volume`: 4D volume container and affine helpers
//! - `nifti_io`: NIfTI-1 volume reading and writing
//! - `confounds`: Confound table parsing
//! - `scrub`: Motion scrubbing and repair
//! - `regress`: Nuisance regression
//! - `spatial`: Template resampling and Gaussian smoothing
//! - `filter`: Zero-phase Butterworth filtering
//! - `atlas`: Seed coordinates
//! - `roi`: Sphere-mean region signals
//! - `entropy`: Sample, differential, fuzzy and range entropy
//! - `features`: Feature vector layout and CSV I/O
//! - `selection`: Feature selection, scaling and scoring boundary
//! - `external`: Preprocessing container and process scorer
//! - `config`: TOML configuration
//! - `pipeline`: Stage orchestration

// Core modules
pub mod error;
pub mod signal;
pub mod volume;

// I/O modules
pub mod confounds;
pub mod nifti_io;

// Conditioning stages
pub mod filter;
pub mod regress;
pub mod scrub;
pub mod spatial;

// Feature extraction
pub mod atlas;
pub mod entropy;
pub mod features;
pub mod roi;

// Boundaries and orchestration
pub mod config;
pub mod external;
pub mod pipeline;
pub mod selection;

pub use atlas::{Atlas, AtlasRegion};
pub use config::PipelineConfig;
pub use confounds::ConfoundTable;
pub use error::{PipelineError, Result};
pub use features::{EntropyMetric, FeatureVector};
pub use pipeline::{OutputOptions, Pipeline, PipelineOutput};
pub use selection::{DiseaseTarget, FeatureSelection, ModelBundle, Prediction, Scorer};
pub use volume::Volume;
