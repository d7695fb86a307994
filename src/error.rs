//! Error types shared by the tensor and estimator layers.
//!
//! Every failure here is a local, recoverable condition the caller can react
//! to (re-encrypt, reshape, fix parameters). Nothing in this crate reports a
//! failure by printing a diagnostic and returning a null value.

use thiserror::Error;

use crate::scalar::Dtype;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, HefitError>;

/// Failure modes of tensor construction, arithmetic and fitting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HefitError {
    /// Binary tensor operation on operands whose shapes differ in any axis.
    #[error("shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch {
        /// Shape of the left operand.
        left: Vec<usize>,
        /// Shape of the right operand.
        right: Vec<usize>,
    },

    /// Operation applied to a tensor of an unsupported rank.
    #[error("rank mismatch: expected rank {expected}, got rank {found}")]
    RankMismatch {
        /// Rank the operation requires.
        expected: usize,
        /// Rank of the tensor it received.
        found: usize,
    },

    /// Dtype pair for which no primitive path exists (e.g. Encoded⊕Encoded).
    #[error("unsupported dtype combination: {left:?} with {right:?}")]
    UnsupportedDtypeCombination {
        /// Dtype of the left operand.
        left: Dtype,
        /// Dtype of the right operand.
        right: Dtype,
    },

    /// Remaining noise budget fell to or below the requested floor.
    ///
    /// Raised only by explicit budget queries: the engine itself never
    /// errors on exhaustion, it silently decrypts to garbage.
    #[error("noise budget exhausted: {bits} bits remaining")]
    NoiseBudgetExhausted {
        /// Bits remaining on the worst ciphertext of the queried tensor.
        bits: i64,
    },

    /// Index beyond the first axis of a tensor.
    #[error("index {index} out of bounds for axis of length {len}")]
    IndexOutOfBounds {
        /// Offending index.
        index: usize,
        /// Axis length.
        len: usize,
    },

    /// Operands were built against different crypto contexts.
    #[error("operands belong to different crypto contexts")]
    ContextMismatch,

    /// Nested constructor input with rows of unequal length.
    #[error("ragged nested array: row {row} has length {len}, expected {expected}")]
    RaggedData {
        /// Row index of the first offending row.
        row: usize,
        /// Its length.
        len: usize,
        /// Length of the first row.
        expected: usize,
    },

    /// Tensor construction from empty input.
    #[error("cannot build a tensor from empty data")]
    EmptyTensor,

    /// `predict` called on an estimator that was never fitted.
    #[error("estimator has not been fitted")]
    NotFitted,

    /// Encryption parameters that fail validation.
    #[error("invalid encryption parameters: {reason}")]
    InvalidParams {
        /// Human-readable rejection reason.
        reason: String,
    },
}
