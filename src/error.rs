use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading data, fitting models or rendering figures
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error("Invalid PLINK bed file {path}: {details}")]
    InvalidBed { path: PathBuf, details: String },

    #[error("Invalid table at line {line}: {details}")]
    InvalidTable { line: usize, details: String },

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Design matrix is singular")]
    Singular,
}

pub type Result<T> = std::result::Result<T, Error>;
