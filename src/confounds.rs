//! Confound (nuisance covariate) table
//!
//! Reads the tab-separated confounds file produced by the preprocessing
//! step. Cells holding `n/a`, `nan` or nothing are kept as missing; each
//! stage decides how to treat them.

use std::fs::File;
use std::path::Path;

use csv::ReaderBuilder;

use crate::error::{PipelineError, Result};

/// Framewise displacement column used for scrubbing
pub const FRAMEWISE_DISPLACEMENT: &str = "FramewiseDisplacement";

/// Motion and tissue regressors, in design-matrix order
pub const BASE_NUISANCE_COLUMNS: [&str; 8] = [
    "X", "Y", "Z", "RotX", "RotY", "RotZ", "WhiteMatter", "GlobalSignal",
];

/// Per-timepoint nuisance covariates, one named column per regressor
#[derive(Clone, Debug, Default)]
pub struct ConfoundTable {
    names: Vec<String>,
    columns: Vec<Vec<Option<f64>>>,
    n_rows: usize,
}

fn parse_cell(raw: &str) -> std::result::Result<Option<f64>, std::num::ParseFloatError> {
    let cell = raw.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("n/a") || cell.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    cell.parse::<f64>().map(|v| if v.is_finite() { Some(v) } else { None })
}

impl ConfoundTable {
    /// Build a table from named columns of equal length
    pub fn from_columns(columns: Vec<(String, Vec<Option<f64>>)>) -> Result<Self> {
        let n_rows = columns.first().map_or(0, |(_, c)| c.len());
        if let Some((name, _)) = columns.iter().find(|(_, c)| c.len() != n_rows) {
            return Err(PipelineError::Confounds(format!(
                "column '{}' length differs from {} rows", name, n_rows
            )));
        }
        let (names, columns) = columns.into_iter().unzip();
        Ok(Self { names, columns, n_rows })
    }

    /// Parse tab-separated text with a header row
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let names: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        if names.is_empty() {
            return Err(PipelineError::Confounds("empty header".to_string()));
        }
        let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::new(); names.len()];

        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            for (col, raw) in record.iter().enumerate() {
                let value = parse_cell(raw).map_err(|_| {
                    PipelineError::Confounds(format!(
                        "row {}, column '{}': cannot parse '{}'", row + 1, names[col], raw
                    ))
                })?;
                columns[col].push(value);
            }
        }

        let n_rows = columns[0].len();
        Ok(Self { names, columns, n_rows })
    }

    /// Read a confounds .tsv file
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingInput { what: "confound table", path: path.to_path_buf() });
        }
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_reader(file)
    }

    /// Number of timepoints (rows)
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Column names in file order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Raw column with missing cells, if present
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.names.iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    /// Column with missing cells replaced by zero, if present
    pub fn column_filled(&self, name: &str) -> Option<Vec<f64>> {
        self.column(name).map(|c| c.iter().map(|v| v.unwrap_or(0.0)).collect())
    }

    /// Framewise displacement with missing cells (e.g. the first frame) as 0
    pub fn framewise_displacement(&self) -> Result<Vec<f64>> {
        self.column_filled(FRAMEWISE_DISPLACEMENT)
            .ok_or_else(|| PipelineError::MissingConfound(FRAMEWISE_DISPLACEMENT.to_string()))
    }

    /// Names of the regressors that enter the nuisance design, in order
    ///
    /// The base motion/tissue columns that exist, followed by the first
    /// `max_components` columns whose name starts with `component_prefix`.
    pub fn nuisance_columns(&self, component_prefix: &str, max_components: usize) -> Vec<String> {
        let mut selected: Vec<String> = BASE_NUISANCE_COLUMNS.iter()
            .filter(|&&c| self.column(c).is_some())
            .map(|c| c.to_string())
            .collect();

        selected.extend(
            self.names.iter()
                .filter(|n| n.starts_with(component_prefix))
                .take(max_components)
                .cloned(),
        );
        selected
    }

    /// Check the table is aligned with a volume's time axis
    pub fn check_alignment(&self, timepoints: usize) -> Result<()> {
        if self.n_rows != timepoints {
            return Err(PipelineError::TimepointMismatch { rows: self.n_rows, timepoints });
        }
        Ok(())
    }
}
