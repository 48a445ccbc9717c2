use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::DataSource;

#[derive(Debug, Error, Diagnostic)]
pub enum BasinError {
    #[error("invalid basin id: {0:?}")]
    InvalidBasinId(String),

    #[error("basin {0} not found in boundary index")]
    #[diagnostic(help("run `basin-dm list` to see the available basins"))]
    NotFound(String),

    #[error("{data_source} service unavailable: {message}")]
    SourceUnavailable {
        data_source: DataSource,
        message: String,
    },

    #[error("{data_source} service returned no data for the basin")]
    EmptyResult { data_source: DataSource },

    #[error("{data_source} request of {width}x{height} pixels exceeds the service limit of {max}")]
    RequestTooLarge {
        data_source: DataSource,
        width: u32,
        height: u32,
        max: u32,
    },

    #[error("failed to persist basin output: {0}")]
    Persistence(String),

    #[error("boundary index at {path} is unreadable: {message}")]
    #[diagnostic(help("delete the index file to rebuild it from the boundary service"))]
    IndexCorrupt { path: String, message: String },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("unsupported coordinate system EPSG:{0}")]
    UnsupportedCrs(u32),

    #[error("invalid region code: {0}")]
    InvalidRegion(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl BasinError {
    pub fn unavailable(data_source: DataSource, message: impl Into<String>) -> Self {
        BasinError::SourceUnavailable {
            data_source,
            message: message.into(),
        }
    }

    /// Pipeline stage a caller should report as failed.
    pub fn stage(&self) -> &'static str {
        match self {
            BasinError::SourceUnavailable { data_source, .. }
            | BasinError::EmptyResult { data_source }
            | BasinError::RequestTooLarge { data_source, .. } => data_source.stage(),
            BasinError::InvalidBasinId(_)
            | BasinError::NotFound(_)
            | BasinError::IndexCorrupt { .. }
            | BasinError::InvalidRegion(_) => DataSource::Boundary.stage(),
            BasinError::Persistence(_) | BasinError::Filesystem(_) => "persistence",
            BasinError::InvalidGeometry(_) | BasinError::UnsupportedCrs(_) => "normalization",
            BasinError::ConfigRead(_) | BasinError::ConfigParse(_) => "configuration",
        }
    }
}
