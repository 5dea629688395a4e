use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TenebraError>;

#[derive(Debug, Error)]
pub enum TenebraError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("corruption: {0}")]
    Corruption(&'static str),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}
