//! Error types for the marshaling layer.

use thiserror::Error;

use crate::tensor::TensorDataType;

/// Which side of the model a tensor index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorKind {
    Input,
    Output,
}

impl std::fmt::Display for TensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TensorKind::Input => write!(f, "input"),
            TensorKind::Output => write!(f, "output"),
        }
    }
}

/// Errors that can occur while loading a model or marshaling tensors.
///
/// Apart from `InferenceFailed`, none of the caller-contract variants leave
/// the session in an unusable state; the call can be retried with corrected
/// arguments.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// The engine rejected the model bytes or options.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Tensor-graph allocation failed after the model was loaded.
    #[error("failed to allocate tensors: {0}")]
    TensorAllocation(String),

    /// The engine reported a data type outside the supported set.
    #[error("unsupported tensor data type: {0}")]
    UnsupportedTensorType(String),

    /// The engine reported a dimension that cannot describe real data.
    #[error("invalid shape for tensor '{name}': {dims:?}")]
    InvalidShape { name: String, dims: Vec<i64> },

    /// Tensor index outside `0..count`.
    #[error("{kind} tensor index {index} out of range (valid range 0..{count})")]
    IndexOutOfRange {
        kind: TensorKind,
        index: usize,
        count: usize,
    },

    /// More inputs were supplied than the model declares.
    #[error("got {actual} inputs but the model has {expected}")]
    InputCountMismatch { expected: usize, actual: usize },

    /// An input's byte length differs from its tensor's current byte length.
    #[error("input {index}: expected {expected} bytes, got {actual}")]
    InputSizeMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// A flat output container has the wrong element count.
    #[error("output {index}: flat container holds {actual} elements, tensor has {expected}")]
    OutputSizeMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// A shaped output container has the wrong total leaf count.
    #[error("output {index}: container holds {actual} elements in total, tensor has {expected}")]
    OutputShapeMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// The container element type differs from the output tensor type.
    #[error("output {index}: container is {actual}, tensor is {expected}")]
    OutputTypeMismatch {
        index: usize,
        expected: TensorDataType,
        actual: TensorDataType,
    },

    /// The container is neither flat nor rectangular.
    #[error("unsupported output container shape: {0}")]
    UnsupportedContainerShape(String),

    /// The engine could not apply a new input shape.
    #[error("failed to resize input {index}: {reason}")]
    ResizeFailure { index: usize, reason: String },

    /// The session was released.
    #[error("session has been closed")]
    SessionClosed,

    /// The native invocation itself failed.
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// Input value could not be built.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A raw buffer is not a whole number of elements.
    #[error("{len} bytes is not a multiple of the {dtype} width ({width} bytes)")]
    ByteLengthMisaligned {
        dtype: TensorDataType,
        width: usize,
        len: usize,
    },

    /// Options file could not be parsed or written.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error when reading model or options files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
