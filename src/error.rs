// 🚨 Error taxonomy for the pipeline
//
// DataIntegrity and Configuration are fatal: the driver aborts before any
// output is written. Join loss is NOT an error (see join.rs) and undefined
// ratios are values (None), not errors.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Raw counts do not reconcile, region has no jobs, or the crosswalk
    /// maps one block to two tracts
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// An input cannot be opened or parsed, or the configuration is invalid
    #[error("Configuration error ({}): {message}", path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "config".to_string()))]
    Configuration {
        path: Option<PathBuf>,
        message: String,
    },

    /// Area requested on geometry that is not in a projected CRS, or a
    /// malformed ring
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Quantile binning could not produce unique bin edges
    #[error("Classification error: {0}")]
    Classification(String),

    /// Output could not be written
    #[error("Output error ({}): {message}", path.display())]
    Output { path: PathBuf, message: String },
}

impl PipelineError {
    /// Configuration error tied to a specific input file
    pub fn config_at(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PipelineError::Configuration {
            path: Some(path.into()),
            message: message.into(),
        }
    }

    /// Configuration error not tied to a file (bad years, empty county list)
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Configuration {
            path: None,
            message: message.into(),
        }
    }

    pub fn output(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PipelineError::Output {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for errors that mean the data itself is wrong
    pub fn is_data_integrity(&self) -> bool {
        matches!(self, PipelineError::DataIntegrity(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, PipelineError::Configuration { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
