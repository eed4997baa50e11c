//! Pipeline configuration via TOML files
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) reproduces the standard pipeline.
//!
//! ```toml
//! repetition_time = 2.0
//!
//! [repair]
//! fd_threshold = 0.2
//!
//! [filter]
//! low_pass = 0.08
//! high_pass = 0.009
//! order = 5
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::filter::{DEFAULT_HIGH_PASS, DEFAULT_LOW_PASS, DEFAULT_ORDER};
use crate::regress::{DEFAULT_COMPONENT_PREFIX, DEFAULT_MAX_COMPONENTS};
use crate::roi::DEFAULT_RADIUS_MM;
use crate::scrub::DEFAULT_FD_THRESHOLD;
use crate::spatial::DEFAULT_FWHM_MM;

/// Motion scrubbing settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Framewise displacement above which a frame is flagged (mm)
    pub fd_threshold: f64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self { fd_threshold: DEFAULT_FD_THRESHOLD }
    }
}

/// Nuisance regression settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Name prefix of noise-component columns
    pub component_prefix: String,
    /// Number of noise components to include
    pub max_components: usize,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            component_prefix: DEFAULT_COMPONENT_PREFIX.to_string(),
            max_components: DEFAULT_MAX_COMPONENTS,
        }
    }
}

/// Resampling and smoothing settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Gaussian smoothing width (mm)
    pub fwhm_mm: f64,
    /// Template image defining the target grid; MNI152 3 mm when absent
    pub template: Option<PathBuf>,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self { fwhm_mm: DEFAULT_FWHM_MM, template: None }
    }
}

/// Butterworth band-pass settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Upper edge of the pass band (Hz)
    pub low_pass: Option<f64>,
    /// Lower edge of the pass band (Hz)
    pub high_pass: Option<f64>,
    /// Filter order
    pub order: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            low_pass: Some(DEFAULT_LOW_PASS),
            high_pass: Some(DEFAULT_HIGH_PASS),
            order: DEFAULT_ORDER,
        }
    }
}

/// Region extraction settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiConfig {
    /// Sphere radius around each seed (mm)
    pub radius_mm: f64,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self { radius_mm: DEFAULT_RADIUS_MM }
    }
}

/// Full pipeline configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Overrides the repetition time read from the volume header (s)
    pub repetition_time: Option<f64>,
    /// Motion scrubbing
    pub repair: RepairConfig,
    /// Nuisance regression
    pub regression: RegressionConfig,
    /// Resampling and smoothing
    pub spatial: SpatialConfig,
    /// Band-pass filter
    pub filter: FilterConfig,
    /// Region extraction
    pub roi: RoiConfig,
}

impl PipelineConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingInput { what: "configuration file", path: path.to_path_buf() });
        }
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_toml(&text)
    }

    /// Reject values no stage can work with
    pub fn validate(&self) -> Result<()> {
        if let Some(tr) = self.repetition_time {
            if !(tr.is_finite() && tr > 0.0) {
                return Err(PipelineError::Config(format!("repetition_time must be positive, got {}", tr)));
            }
        }
        if !(self.spatial.fwhm_mm.is_finite() && self.spatial.fwhm_mm >= 0.0) {
            return Err(PipelineError::Config(format!("fwhm_mm must be non-negative, got {}", self.spatial.fwhm_mm)));
        }
        if !(self.roi.radius_mm.is_finite() && self.roi.radius_mm >= 0.0) {
            return Err(PipelineError::Config(format!("radius_mm must be non-negative, got {}", self.roi.radius_mm)));
        }
        if self.filter.order == 0 {
            return Err(PipelineError::Config("filter order must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.repair.fd_threshold, 0.2);
        assert_eq!(config.filter.low_pass, Some(0.08));
        assert_eq!(config.filter.high_pass, Some(0.009));
        assert_eq!(config.filter.order, 5);
        assert_eq!(config.spatial.fwhm_mm, 6.0);
        assert_eq!(config.roi.radius_mm, 5.0);
        assert_eq!(config.regression.max_components, 5);
        assert!(config.repetition_time.is_none());
    }

    #[test]
    fn test_partial_override() {
        let config = PipelineConfig::from_toml(
            "repetition_time = 0.8\n[filter]\nlow_pass = 0.1\n[spatial]\ntemplate = \"tpl.nii.gz\"\n",
        ).unwrap();
        assert_eq!(config.repetition_time, Some(0.8));
        assert_eq!(config.filter.low_pass, Some(0.1));
        assert_eq!(config.filter.high_pass, Some(0.009));
        assert_eq!(config.spatial.template, Some(PathBuf::from("tpl.nii.gz")));
        assert_eq!(config.spatial.fwhm_mm, 6.0);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(PipelineConfig::from_toml("repetition_time = -1.0"), Err(PipelineError::Config(_))));
        assert!(matches!(PipelineConfig::from_toml("[filter]\norder = 0"), Err(PipelineError::Config(_))));
        assert!(matches!(PipelineConfig::from_toml("[roi]\nradius_mm = \"five\""), Err(PipelineError::Config(_))));
    }
}
