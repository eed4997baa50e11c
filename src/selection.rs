//! Feature selection and scaling adapter
//!
//! Boundary between the feature vector and an external classifier: pick the
//! features the model was fit on (by name), apply its fitted standard scaler
//! and optional PCA, hand the result to a [`Scorer`], and turn the class
//! probabilities into a [`Prediction`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::features::FeatureVector;

/// Which features a model consumes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSelection {
    /// Every feature in vector order
    All,
    /// The named features in the listed order
    Named(Vec<String>),
}

impl FeatureSelection {
    /// Resolve the selection against a feature vector
    ///
    /// A name that is not in the vector is an error; nothing is substituted.
    pub fn apply(&self, features: &FeatureVector) -> Result<Vec<f64>> {
        match self {
            FeatureSelection::All => Ok(features.values().to_vec()),
            FeatureSelection::Named(names) => names.iter()
                .map(|name| {
                    features.get(name)
                        .ok_or_else(|| PipelineError::FeatureMismatch(name.clone()))
                })
                .collect(),
        }
    }
}

/// Fitted standard scaler `(x - mean) / scale`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Per-feature mean
    pub mean: Vec<f64>,
    /// Per-feature scale; 0 is treated as 1
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Scale a selected feature vector
    pub fn transform(&self, x: &[f64]) -> Result<Vec<f64>> {
        if self.mean.len() != x.len() || self.scale.len() != x.len() {
            return Err(PipelineError::Model(format!(
                "scaler fit on {} features, got {}", self.mean.len(), x.len()
            )));
        }
        Ok(x.iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(&v, (&m, &s))| (v - m) / if s == 0.0 { 1.0 } else { s })
            .collect())
    }
}

/// Fitted principal component projection `components * (x - mean)`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pca {
    /// Per-feature mean removed before projection
    pub mean: Vec<f64>,
    /// One row per component
    pub components: Vec<Vec<f64>>,
}

impl Pca {
    /// Project a scaled feature vector onto the components
    pub fn transform(&self, x: &[f64]) -> Result<Vec<f64>> {
        if self.mean.len() != x.len() || self.components.iter().any(|c| c.len() != x.len()) {
            return Err(PipelineError::Model(format!(
                "PCA fit on {} features, got {}", self.mean.len(), x.len()
            )));
        }
        let centered: Vec<f64> = x.iter().zip(self.mean.iter()).map(|(v, m)| v - m).collect();
        Ok(self.components.iter()
            .map(|c| c.iter().zip(centered.iter()).map(|(a, b)| a * b).sum())
            .collect())
    }
}

/// Preprocessing state of a fitted classifier
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    /// Class labels in the scorer's probability order
    pub labels: Vec<String>,
    /// Feature selection; falls back to the disease target's default
    #[serde(default)]
    pub selection: Option<FeatureSelection>,
    /// Fitted scaler
    pub scaler: StandardScaler,
    /// Fitted PCA, if the model was trained on components
    #[serde(default)]
    pub pca: Option<Pca>,
}

impl ModelBundle {
    /// Parse a bundle from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let bundle: Self = serde_json::from_str(text)
            .map_err(|e| PipelineError::Model(format!("invalid model bundle: {}", e)))?;
        if bundle.labels.is_empty() {
            return Err(PipelineError::Model("model bundle has no class labels".to_string()));
        }
        Ok(bundle)
    }

    /// Read a bundle from a JSON file
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingInput { what: "model bundle", path: path.to_path_buf() });
        }
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_json(&text)
    }

    /// Selection to use for `target`
    ///
    /// An explicit bundle selection wins. Otherwise PCA models consume every
    /// feature and the rest use the target's published feature list.
    pub fn effective_selection(&self, target: Option<DiseaseTarget>) -> FeatureSelection {
        if let Some(sel) = &self.selection {
            return sel.clone();
        }
        match target {
            Some(t) if self.pca.is_none() => t.default_selection(),
            _ => FeatureSelection::All,
        }
    }

    /// Select, scale and project a feature vector
    pub fn prepare(&self, features: &FeatureVector, target: Option<DiseaseTarget>) -> Result<Vec<f64>> {
        let selected = self.effective_selection(target).apply(features)?;
        debug!("Selected {} of {} features", selected.len(), features.len());
        let scaled = self.scaler.transform(&selected)?;
        match &self.pca {
            Some(pca) => pca.transform(&scaled),
            None => Ok(scaled),
        }
    }
}

/// Black-box classifier returning one probability per class label
pub trait Scorer {
    /// Class probabilities for one prepared feature vector
    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>>;
}

/// Classification result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Arg-max class label
    pub primary_label: String,
    /// Probability of the primary label in percent
    pub confidence: f64,
    /// Probability in percent per lower-cased class label
    pub probabilities: BTreeMap<String, f64>,
}

impl Prediction {
    /// Build the prediction from labels and matching probabilities
    pub fn from_probabilities(labels: &[String], probabilities: &[f64]) -> Result<Self> {
        if labels.len() != probabilities.len() || labels.is_empty() {
            return Err(PipelineError::Scorer(format!(
                "{} probabilities for {} class labels", probabilities.len(), labels.len()
            )));
        }
        // First maximum wins on ties
        let mut best = 0;
        for (i, &p) in probabilities.iter().enumerate() {
            if p > probabilities[best] {
                best = i;
            }
        }
        let probs = labels.iter()
            .zip(probabilities.iter())
            .map(|(l, &p)| (l.to_lowercase(), p * 100.0))
            .collect();
        Ok(Self {
            primary_label: labels[best].clone(),
            confidence: probabilities[best] * 100.0,
            probabilities: probs,
        })
    }
}

/// Run the full adapter: prepare the features, score them, label the result
pub fn predict(
    bundle: &ModelBundle,
    features: &FeatureVector,
    target: Option<DiseaseTarget>,
    scorer: &dyn Scorer,
) -> Result<Prediction> {
    let prepared = bundle.prepare(features, target)?;
    let probabilities = scorer.predict_proba(&prepared)?;
    let prediction = Prediction::from_probabilities(&bundle.labels, &probabilities)?;
    info!("Prediction: {} ({:.1}%)", prediction.primary_label, prediction.confidence);
    Ok(prediction)
}

//=============================================================================
// Disease targets
//=============================================================================

const SCZ_FEATURES: [&str; 43] = [
    "ROI_86_SaEn", "ROI_144_SaEn", "ROI_188_SaEn", "ROI_129_FuEn", "ROI_168_DiffEn", "ROI_264_FuEn",
    "ROI_253_RaEn", "ROI_214_SaEn", "ROI_258_DiffEn", "ROI_209_RaEn", "ROI_232_RaEn", "ROI_209_SaEn",
    "ROI_181_RaEn", "ROI_24_SaEn", "ROI_21_FuEn", "ROI_150_SaEn", "ROI_36_SaEn", "ROI_115_DiffEn",
    "ROI_104_SaEn", "ROI_55_DiffEn", "ROI_256_SaEn", "ROI_247_SaEn", "ROI_104_RaEn", "ROI_170_DiffEn",
    "ROI_257_SaEn", "ROI_55_SaEn", "ROI_55_RaEn", "ROI_7_SaEn", "ROI_155_SaEn", "ROI_191_SaEn",
    "ROI_127_SaEn", "ROI_255_SaEn", "ROI_20_SaEn", "ROI_258_FuEn", "ROI_177_FuEn", "ROI_112_FuEn",
    "ROI_176_DiffEn", "ROI_242_DiffEn", "ROI_25_SaEn", "ROI_73_DiffEn", "ROI_127_RaEn", "ROI_96_DiffEn",
    "ROI_6_DiffEn",
];

/// The ADHD model uses the leading SCZ features
const ADHD_FEATURE_COUNT: usize = 15;

/// Condition a model discriminates from healthy controls
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiseaseTarget {
    /// Schizophrenia
    Scz,
    /// Attention-deficit/hyperactivity disorder
    Adhd,
    /// Bipolar disorder
    Bpd,
}

impl DiseaseTarget {
    /// Features the published model for this target was fit on
    pub fn default_selection(&self) -> FeatureSelection {
        let named = |names: &[&str]| FeatureSelection::Named(names.iter().map(|s| s.to_string()).collect());
        match self {
            DiseaseTarget::Scz => named(&SCZ_FEATURES),
            DiseaseTarget::Adhd => named(&SCZ_FEATURES[..ADHD_FEATURE_COUNT]),
            DiseaseTarget::Bpd => FeatureSelection::All,
        }
    }

    /// Lower-case short name
    pub fn as_str(&self) -> &'static str {
        match self {
            DiseaseTarget::Scz => "scz",
            DiseaseTarget::Adhd => "adhd",
            DiseaseTarget::Bpd => "bpd",
        }
    }
}

impl fmt::Display for DiseaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiseaseTarget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scz" => Ok(DiseaseTarget::Scz),
            "adhd" => Ok(DiseaseTarget::Adhd),
            "bpd" => Ok(DiseaseTarget::Bpd),
            other => Err(format!("unknown disease target '{}' (expected scz, adhd or bpd)", other)),
        }
    }
}
