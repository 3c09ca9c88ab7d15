use std::error::Error;
use std::fmt;

/// The crate's result type.
pub type Result<T> = std::result::Result<T, MlError>;

/// Errors produced when numeric inputs violate an invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MlError {
    /// An input is unusable for domain reasons.
    InvalidInput(&'static str),
    /// Two shapes that must agree do not.
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
}

impl fmt::Display for MlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            MlError::ShapeMismatch { what, got, expected } => {
                write!(f, "shape mismatch: {what} is {got}, expected {expected}")
            }
        }
    }
}

impl Error for MlError {}
