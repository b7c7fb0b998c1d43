use crate::shape::Shape;

// Error — the single error type used across the whole library
//
// One enum keeps propagation simple: every layer returns the same Result
// and callers match on the variant (or on the coarser ErrorKind) to decide
// what went wrong. The interpreter wraps failures in `AtOp` so a caller
// can localize a fault to an operator index and name without parsing
// message strings.

/// All errors that can occur within Vole.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shape mismatch between two tensors.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Operation requires a specific rank.
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// DType mismatch between tensors in a binary operation.
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch {
        expected: crate::DType,
        got: crate::DType,
    },

    /// Dimension index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Narrow/slice operation out of bounds.
    #[error("narrow out of bounds: dim {dim}, start {start}, len {len}, dim_size {dim_size}")]
    NarrowOutOfBounds {
        dim: usize,
        start: usize,
        len: usize,
        dim_size: usize,
    },

    /// Element count mismatch when creating or reshaping a tensor.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Malformed or internally-inconsistent job description: missing
    /// configuration variant, unknown operator kind, unresolved name.
    #[error("config error: {0}")]
    Config(String),

    /// Graph-construction bug surfaced at execution time: cross-mesh
    /// operator invocation or a degenerate zero-element global tensor.
    #[error("placement error: {0}")]
    Placement(String),

    /// No redistribution transform exists between two signatures.
    #[error("boxing error: no transform from {src} to {dst} ({detail})")]
    Boxing {
        src: String,
        dst: String,
        detail: String,
    },

    /// A failure localized to one operator of a job.
    #[error("op {index} ('{op_name}') failed: {source}")]
    AtOp {
        index: usize,
        op_name: String,
        #[source]
        source: Box<Error>,
    },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

/// Coarse classification of a failure, per the interpreter's contract.
/// Everything that is not a configuration, placement, or boxing problem
/// is treated as a kernel failure and propagated verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Placement,
    Boxing,
    Kernel,
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Wrap an error with the operator index and name it occurred at.
    pub fn at_op(index: usize, op_name: impl Into<String>, source: Error) -> Self {
        Error::AtOp {
            index,
            op_name: op_name.into(),
            source: Box::new(source),
        }
    }

    /// Classify this error, looking through `AtOp` wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::Placement(_) => ErrorKind::Placement,
            Error::Boxing { .. } => ErrorKind::Boxing,
            Error::AtOp { source, .. } => source.kind(),
            _ => ErrorKind::Kernel,
        }
    }
}

/// Convenience Result type used throughout Vole.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::Config("x".into()).kind(), ErrorKind::Config);
        assert_eq!(Error::Placement("x".into()).kind(), ErrorKind::Placement);
        assert_eq!(Error::msg("x").kind(), ErrorKind::Kernel);
        let wrapped = Error::at_op(3, "add0", Error::Placement("mesh".into()));
        assert_eq!(wrapped.kind(), ErrorKind::Placement);
    }

    #[test]
    fn test_at_op_display_carries_context() {
        let e = Error::at_op(2, "relu1", Error::Config("unknown op".into()));
        let s = e.to_string();
        assert!(s.contains("op 2"));
        assert!(s.contains("relu1"));
    }
}
