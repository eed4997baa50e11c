//! Seed-coordinate atlas
//!
//! An ordered list of region centres in world (MNI) millimetres. The atlas
//! is built once, wrapped in an `Arc`, and shared read-only by every
//! pipeline run. Its length fixes the feature dimensionality.

use std::fs::File;
use std::path::Path;

use csv::ReaderBuilder;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// One seed coordinate in world mm
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AtlasRegion {
    /// x (mm)
    pub x: f64,
    /// y (mm)
    pub y: f64,
    /// z (mm)
    pub z: f64,
}

impl AtlasRegion {
    /// Seed as an array
    pub fn coords(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Ordered collection of seed regions
#[derive(Clone, Debug, PartialEq)]
pub struct Atlas {
    regions: Vec<AtlasRegion>,
}

impl Atlas {
    /// Build an atlas from seed coordinates in atlas order
    pub fn from_coords(coords: &[[f64; 3]]) -> Result<Self> {
        if coords.is_empty() {
            return Err(PipelineError::Atlas("atlas has no regions".to_string()));
        }
        if let Some(i) = coords.iter().position(|c| c.iter().any(|v| !v.is_finite())) {
            return Err(PipelineError::Atlas(format!("region {} has a non-finite coordinate", i + 1)));
        }
        let regions = coords.iter()
            .map(|&[x, y, z]| AtlasRegion { x, y, z })
            .collect();
        Ok(Self { regions })
    }

    /// Parse a delimited table with `x`, `y`, `z` header columns
    ///
    /// Column names are matched case-insensitively; other columns are ignored.
    pub fn from_reader<R: std::io::Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let column = |name: &str| {
            headers.iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .ok_or_else(|| PipelineError::Atlas(format!("missing '{}' column", name)))
        };
        let cols = [column("x")?, column("y")?, column("z")?];

        let mut coords = Vec::new();
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            let mut c = [0.0; 3];
            for (d, &col) in cols.iter().enumerate() {
                let raw = record.get(col).unwrap_or("");
                c[d] = raw.parse::<f64>().map_err(|_| {
                    PipelineError::Atlas(format!("row {}: cannot parse '{}'", row + 1, raw))
                })?;
            }
            coords.push(c);
        }

        Self::from_coords(&coords)
    }

    /// Read an atlas table; `.tsv` and `.txt` are tab-separated, anything else comma-separated
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingInput { what: "atlas table", path: path.to_path_buf() });
        }
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") || ext.eq_ignore_ascii_case("txt") => b'\t',
            _ => b',',
        };
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let atlas = Self::from_reader(file, delimiter)?;
        debug!("Loaded {} atlas regions from {}", atlas.len(), path.display());
        Ok(atlas)
    }

    /// Regions in atlas order
    pub fn regions(&self) -> &[AtlasRegion] {
        &self.regions
    }

    /// Number of regions
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Always false for a constructed atlas
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_with_extra_columns() {
        let text = "roi,x,y,z\n1,-25,-98,-12\n2,27,-97,-13\n";
        let atlas = Atlas::from_reader(text.as_bytes(), b',').unwrap();
        assert_eq!(atlas.len(), 2);
        assert_eq!(atlas.regions()[1], AtlasRegion { x: 27.0, y: -97.0, z: -13.0 });
    }

    #[test]
    fn test_missing_column() {
        let err = Atlas::from_reader("x,y\n1,2\n".as_bytes(), b',').unwrap_err();
        assert!(matches!(err, PipelineError::Atlas(_)));
    }

    #[test]
    fn test_empty_atlas_rejected() {
        assert!(Atlas::from_coords(&[]).is_err());
        assert!(Atlas::from_reader("x,y,z\n".as_bytes(), b',').is_err());
    }

    #[test]
    fn test_tsv_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seeds.tsv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "X\tY\tZ\n0\t0\t0\n3\t-3\t6").unwrap();
        drop(f);

        let atlas = Atlas::from_path(&path).unwrap();
        assert_eq!(atlas.regions()[1].coords(), [3.0, -3.0, 6.0]);

        let missing = Atlas::from_path(&dir.path().join("none.csv"));
        assert!(matches!(missing, Err(PipelineError::MissingInput { .. })));
    }
}
