use std::result;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid LIR at instruction {index}: {message}")]
    InvalidInstruction { index: usize, message: String },
    #[error("invalid LIR: {0}")]
    InvalidBody(String),
}

impl Error {
    pub fn at(index: usize, message: impl Into<String>) -> Self {
        Error::InvalidInstruction {
            index,
            message: message.into(),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::InvalidBody(s)
    }
}
