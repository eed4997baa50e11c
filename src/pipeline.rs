//! End-to-end feature pipeline
//!
//! Stage order on the 4D volume: scrub and repair, nuisance regression,
//! resampling to the template grid, smoothing, band-pass. Region signals are
//! then sampled from the processed volume and reduced to the entropy
//! feature vector.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::atlas::Atlas;
use crate::config::PipelineConfig;
use crate::confounds::ConfoundTable;
use crate::error::Result;
use crate::features::{compute_features, FeatureVector};
use crate::filter::{bandpass_volume, BandPass};
use crate::nifti_io;
use crate::regress::regress_out;
use crate::roi::extract_region_series;
use crate::scrub::{repair, ScrubMask};
use crate::spatial::{resample_to_grid, smooth_fwhm, TemplateGrid};
use crate::volume::Volume;

/// Repetition time assumed when neither the header nor the config provide one (s)
pub const FALLBACK_TR: f64 = 2.0;

/// File name used when saving the processed volume into a directory
pub const PROCESSED_VOLUME_NAME: &str = "bold_final_processed.nii.gz";

/// Optional artifacts written by [`Pipeline::run_files`]
#[derive(Clone, Debug, Default)]
pub struct OutputOptions {
    /// Feature table (.csv)
    pub features_csv: Option<PathBuf>,
    /// Fully processed volume (.nii or .nii.gz)
    pub processed_volume: Option<PathBuf>,
}

/// Result of a full run
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    /// Entropy features in block order
    pub features: FeatureVector,
    /// Volume after every conditioning stage
    pub processed: Volume,
}

/// Configured pipeline bound to an atlas and a target grid
#[derive(Clone, Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    atlas: Arc<Atlas>,
    grid: TemplateGrid,
}

impl Pipeline {
    /// Build a pipeline; the target grid comes from the configured template
    /// image or defaults to MNI152 at 3 mm
    pub fn new(config: PipelineConfig, atlas: Arc<Atlas>) -> Result<Self> {
        config.validate()?;
        let grid = match &config.spatial.template {
            Some(path) => TemplateGrid::from_nifti_file(path)?,
            None => TemplateGrid::mni152_3mm(),
        };
        Ok(Self { config, atlas, grid })
    }

    /// Replace the target grid
    pub fn with_grid(mut self, grid: TemplateGrid) -> Self {
        self.grid = grid;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Shared atlas
    pub fn atlas(&self) -> &Arc<Atlas> {
        &self.atlas
    }

    /// Target grid
    pub fn grid(&self) -> &TemplateGrid {
        &self.grid
    }

    /// Effective repetition time for `volume`
    ///
    /// The configured override wins, then the header value; a missing header
    /// value falls back to [`FALLBACK_TR`].
    pub fn repetition_time(&self, volume: &Volume) -> f64 {
        if let Some(tr) = self.config.repetition_time {
            return tr;
        }
        if volume.tr.is_finite() && volume.tr > 0.0 {
            return volume.tr;
        }
        warn!("Volume header has no repetition time, assuming {} s", FALLBACK_TR);
        FALLBACK_TR
    }

    fn band_pass(&self, tr: f64) -> Result<BandPass> {
        let f = &self.config.filter;
        BandPass::design(f.order, f.high_pass, f.low_pass, tr)
    }

    /// Run the conditioning stages on the 4D volume
    ///
    /// # Arguments
    /// * `volume` - Preprocessed BOLD volume
    /// * `confounds` - Confound table aligned with the volume's timepoints
    pub fn clean_volume(&self, volume: &Volume, confounds: &ConfoundTable) -> Result<Volume> {
        confounds.check_alignment(volume.n_timepoints())?;
        let tr = self.repetition_time(volume);
        let mut volume = volume.clone();
        volume.tr = tr;
        let (nx, ny, nz, nt) = volume.dims();
        info!("Conditioning {}x{}x{} volume, {} timepoints, TR {} s", nx, ny, nz, nt, tr);

        info!("Step 1: Motion scrubbing");
        let mask = ScrubMask::from_confounds(confounds, self.config.repair.fd_threshold, nt)?;
        info!("{} of {} timepoints flagged", mask.len(), nt);
        let volume = repair(&volume, &mask)?;

        info!("Step 2: Nuisance regression");
        let reg = &self.config.regression;
        let volume = regress_out(&volume, confounds, &reg.component_prefix, reg.max_components)?;

        info!("Step 3: Spatial normalization");
        let volume = resample_to_grid(&volume, &self.grid)?;
        let volume = smooth_fwhm(&volume, self.config.spatial.fwhm_mm)?;

        info!("Step 4: Band-pass filtering");
        let filter = self.band_pass(tr)?;
        bandpass_volume(&volume, &filter)
    }

    /// Extract region signals from a processed volume and compute the features
    pub fn extract_features(&self, volume: &Volume) -> Result<FeatureVector> {
        let tr = self.repetition_time(volume);
        info!("Step 5: Region extraction");
        let filter = self.band_pass(tr)?;
        let signals = extract_region_series(volume, &self.atlas, self.config.roi.radius_mm, &filter)?;

        info!("Step 6: Entropy features");
        compute_features(&signals)
    }

    /// Run every stage on in-memory inputs
    pub fn run(&self, volume: &Volume, confounds: &ConfoundTable) -> Result<PipelineOutput> {
        let processed = self.clean_volume(volume, confounds)?;
        let features = self.extract_features(&processed)?;
        info!("Pipeline complete: {} features", features.len());
        Ok(PipelineOutput { features, processed })
    }

    /// Load the inputs from disk, run every stage, and write the requested artifacts
    pub fn run_files(&self, bold: &Path, confounds: &Path, options: &OutputOptions) -> Result<FeatureVector> {
        info!("Input BOLD: {}", bold.display());
        info!("Input confounds: {}", confounds.display());
        let volume = nifti_io::read_volume_file(bold)?;
        let table = ConfoundTable::from_path(confounds)?;

        let output = self.run(&volume, &table)?;

        if let Some(path) = &options.processed_volume {
            let path = if path.is_dir() { path.join(PROCESSED_VOLUME_NAME) } else { path.clone() };
            nifti_io::write_volume_file(&path, &output.processed)?;
            info!("Processed volume written to {}", path.display());
        }
        if let Some(path) = &options.features_csv {
            output.features.write_csv(path)?;
        }
        Ok(output.features)
    }
}
