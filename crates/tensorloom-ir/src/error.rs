//! Error types for the IR.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IrError {
    #[error("format order {order:?} is not a permutation of 0..{levels}")]
    InvalidFormatOrder { order: Vec<usize>, levels: usize },
    #[error("access to {tensor} has {actual} index variables, its format has {expected} levels")]
    AccessArityMismatch {
        tensor: String,
        expected: usize,
        actual: usize,
    },
    #[error("access to {tensor} repeats index variable {var}")]
    RepeatedIndexVariable { tensor: String, var: String },
}
