//! Entropy feature vector
//!
//! Four blocks of per-region entropies in the fixed order
//! `[SaEn, DiffEn, FuEn, RaEn]`, regions ascending inside each block, named
//! `ROI_{index}_{metric}` with a 1-based region index. Downstream models
//! address features by these names, so the layout must not change.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use tracing::{debug, info, warn};

use crate::entropy::{
    differential_entropy, fuzzy_entropy, range_entropy, sample_entropy, tolerance,
    DEFAULT_FUZZY_EXPONENT, DEFAULT_ORDER, DEFAULT_R_RATIO,
};
use crate::error::{PipelineError, Result};
use crate::roi::RegionSignals;

/// Entropy metric of one feature block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntropyMetric {
    /// Sample entropy of the standardized signal
    Sample,
    /// Differential entropy of the raw signal
    Differential,
    /// Fuzzy entropy of the raw signal
    Fuzzy,
    /// Range entropy of the raw signal
    Range,
}

impl EntropyMetric {
    /// Blocks in feature-vector order
    pub const ALL: [EntropyMetric; 4] = [
        EntropyMetric::Sample,
        EntropyMetric::Differential,
        EntropyMetric::Fuzzy,
        EntropyMetric::Range,
    ];

    /// Name suffix used in feature names
    pub fn suffix(&self) -> &'static str {
        match self {
            EntropyMetric::Sample => "SaEn",
            EntropyMetric::Differential => "DiffEn",
            EntropyMetric::Fuzzy => "FuEn",
            EntropyMetric::Range => "RaEn",
        }
    }

    /// Evaluate the metric on one region signal
    pub fn compute(&self, series: &[f64]) -> f64 {
        let r = tolerance(series, DEFAULT_R_RATIO);
        match self {
            EntropyMetric::Sample => sample_entropy(series, DEFAULT_ORDER, r),
            EntropyMetric::Differential => differential_entropy(series),
            EntropyMetric::Fuzzy => fuzzy_entropy(series, DEFAULT_ORDER, r, DEFAULT_FUZZY_EXPONENT),
            EntropyMetric::Range => range_entropy(series, DEFAULT_ORDER, r),
        }
    }
}

/// Feature name for a 0-based region index
pub fn feature_name(region: usize, metric: EntropyMetric) -> String {
    format!("ROI_{}_{}", region + 1, metric.suffix())
}

/// Named feature values in fixed block order
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector {
    names: Vec<String>,
    values: Vec<f64>,
    index: HashMap<String, usize>,
}

impl FeatureVector {
    /// Pair names with values; names must be unique and match in count
    pub fn new(names: Vec<String>, values: Vec<f64>) -> Result<Self> {
        if names.len() != values.len() {
            return Err(PipelineError::FeatureMismatch(format!(
                "{} names for {} values", names.len(), values.len()
            )));
        }
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(PipelineError::FeatureMismatch(format!("duplicate feature '{}'", name)));
            }
        }
        Ok(Self { names, values, index })
    }

    /// Feature names in order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Feature values in order
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of features
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when there are no features
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of a named feature
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Value of a named feature
    pub fn get(&self, name: &str) -> Option<f64> {
        self.position(name).map(|i| self.values[i])
    }

    /// Write a one-row CSV with a header of feature names
    pub fn to_writer<W: std::io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = WriterBuilder::new().from_writer(writer);
        wtr.write_record(&self.names)?;
        wtr.write_record(self.values.iter().map(|v| v.to_string()))?;
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    /// Write the feature table to `path`
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
        self.to_writer(file)?;
        info!("Wrote {} features to {}", self.len(), path.display());
        Ok(())
    }

    /// Read the first data row of a feature table
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let names: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let record = rdr.records().next()
            .ok_or_else(|| PipelineError::FeatureMismatch("feature table has no data row".to_string()))??;

        let values = record.iter()
            .zip(names.iter())
            .map(|(raw, name)| {
                raw.trim().parse::<f64>().map_err(|_| {
                    PipelineError::FeatureMismatch(format!("feature '{}': cannot parse '{}'", name, raw))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        Self::new(names, values)
    }

    /// Read a feature table written by [`FeatureVector::write_csv`]
    pub fn read_csv(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingInput { what: "feature table", path: path.to_path_buf() });
        }
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_reader(file)
    }
}

/// Compute all four entropy blocks from the region signals
///
/// Sample entropy uses the standardized variant; the other metrics use the raw one.
pub fn compute_features(signals: &RegionSignals) -> Result<FeatureVector> {
    let n_regions = signals.raw.ncols();
    if signals.standardized.ncols() != n_regions {
        return Err(PipelineError::FeatureMismatch(format!(
            "{} standardized vs {} raw regions", signals.standardized.ncols(), n_regions
        )));
    }
    info!("Computing entropy features for {} regions", n_regions);

    let mut names = Vec::with_capacity(4 * n_regions);
    let mut values = Vec::with_capacity(4 * n_regions);
    for metric in EntropyMetric::ALL {
        let source = match metric {
            EntropyMetric::Sample => &signals.standardized,
            _ => &signals.raw,
        };
        for (r, column) in source.columns().into_iter().enumerate() {
            let series = column.to_vec();
            let value = metric.compute(&series);
            if !value.is_finite() {
                warn!("{} is {}", feature_name(r, metric), value);
            }
            names.push(feature_name(r, metric));
            values.push(value);
        }
        debug!("{} block done", metric.suffix());
    }

    FeatureVector::new(names, values)
}
