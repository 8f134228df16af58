//! Pipeline configuration
//!
//! File paths and years for one run. Loaded from TOML, then overridden
//! field by field from the command line.

use crate::crosswalk::BAY_AREA_COUNTIES;
use crate::error::{PipelineError, Result};
use crate::output::is_geojson_path;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Placeholder in `wac_table_path` replaced by the year being processed
pub const YEAR_PLACEHOLDER: &str = "{year}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// WAC table path, usually a template such as
    /// `data/wac/ca_wac_S000_JT00_{year}.csv`
    pub wac_table_path: String,

    /// LODES geography crosswalk
    pub crosswalk_path: PathBuf,

    /// Tract polygons (GeoJSON); without it density is skipped
    #[serde(default)]
    pub geometry_path: Option<PathBuf>,

    /// CSV, or GeoJSON when the extension is .geojson/.json
    pub output_path: PathBuf,

    /// Baseline year
    pub year_a: u16,

    /// Current year
    pub year_b: u16,

    /// County FIPS allow-list for the crosswalk filter
    #[serde(default = "default_counties")]
    pub counties: Vec<u32>,

    /// Property carrying the tract id in the geometry file
    #[serde(default = "default_geometry_id_field")]
    pub geometry_id_field: String,
}

fn default_counties() -> Vec<u32> {
    BAY_AREA_COUNTIES.to_vec()
}

fn default_geometry_id_field() -> String {
    "GEOID10".to_string()
}

impl PipelineConfig {
    pub fn new(
        wac_table_path: impl Into<String>,
        crosswalk_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        year_a: u16,
        year_b: u16,
    ) -> Self {
        PipelineConfig {
            wac_table_path: wac_table_path.into(),
            crosswalk_path: crosswalk_path.into(),
            geometry_path: None,
            output_path: output_path.into(),
            year_a,
            year_b,
            counties: default_counties(),
            geometry_id_field: default_geometry_id_field(),
        }
    }

    pub fn with_geometry(mut self, path: impl Into<PathBuf>) -> Self {
        self.geometry_path = Some(path.into());
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PipelineError::config(format!("invalid config: {}", e)))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::config_at(path, format!("cannot read config: {}", e)))?;
        toml::from_str(&text).map_err(|e| PipelineError::config_at(path, format!("invalid config: {}", e)))
    }

    /// WAC path for one year
    pub fn wac_path_for(&self, year: u16) -> PathBuf {
        wac_path_for(&self.wac_table_path, year)
    }

    /// Every input this run will open, in read order
    pub fn input_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![
            self.crosswalk_path.clone(),
            self.wac_path_for(self.year_a),
            self.wac_path_for(self.year_b),
        ];
        if let Some(geometry) = &self.geometry_path {
            paths.push(geometry.clone());
        }
        paths
    }

    /// Check years, counties, output format and that every input exists
    pub fn validate(&self) -> Result<()> {
        if self.year_a == self.year_b {
            return Err(PipelineError::config(format!(
                "year_a and year_b are both {}",
                self.year_a
            )));
        }
        if self.counties.is_empty() {
            return Err(PipelineError::config("county allow-list is empty"));
        }
        if is_geojson_path(&self.output_path) && self.geometry_path.is_none() {
            return Err(PipelineError::config(format!(
                "{} is GeoJSON output but no geometry_path is set",
                self.output_path.display()
            )));
        }
        ensure_inputs_exist(&self.input_paths())
    }
}

/// Substitute `{year}` in a WAC path template
pub fn wac_path_for(template: &str, year: u16) -> PathBuf {
    PathBuf::from(template.replace(YEAR_PLACEHOLDER, &year.to_string()))
}

/// First missing path becomes a Configuration error
pub fn ensure_inputs_exist(paths: &[PathBuf]) -> Result<()> {
    match paths.iter().find(|p| !p.is_file()) {
        Some(missing) => Err(PipelineError::config_at(missing, "input file not found")),
        None => Ok(()),
    }
}
