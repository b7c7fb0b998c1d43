use std::fmt;
use std::hash::Hash;

use crate::dtype::DType;
use crate::error::Result;
use crate::layout::Layout;
use crate::shape::Shape;

// Backend — abstraction over compute devices and their kernels
//
// Each backend (CPU today, accelerators behind the same seam) implements
// this trait with its own storage and device types. Keeping the numeric
// implementations behind a trait is what lets the interpreter treat kernel
// execution as an opaque blocking call: it hands storage + layout in and
// waits for storage out, with no retry or wrapping policy of its own.
//
// The tradeoff of a trait over an enum is that Tensor becomes generic
// (Tensor<B: Backend>), but new backends then land as separate crates
// without touching this one.

/// Identifies a compute device (e.g., "cpu:0", "cpu:1").
///
/// Devices are hashable and comparable because device meshes (ordered
/// device sets) key the boxing-transform memo table.
pub trait BackendDevice: Clone + fmt::Debug + PartialEq + Eq + Hash + Send + Sync + 'static {
    /// A human-readable name for this device (e.g., "cpu:0").
    fn name(&self) -> String;

    /// Parse a device from its tag form ("cpu", "cpu:1"). Returns None
    /// for tags this backend does not recognize.
    fn parse(tag: &str) -> Option<Self>;
}

/// A storage buffer holding tensor data on a specific device.
pub trait BackendStorage: Clone + Send + Sync + 'static {
    /// The data type of the elements in this storage.
    fn dtype(&self) -> DType;

    /// Total number of elements in this storage.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Element-wise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Exp,
    Log,
    Sqrt,
    Relu,
    Sigmoid,
    Tanh,
}

/// Reduction operations along dimension(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
    Min,
}

/// The main Backend trait. All operations take storage + layout (which
/// encodes shape/strides/offset) and return new storage: immutable
/// semantics, no in-place mutation.
pub trait Backend: Clone + Send + Sync + fmt::Debug + 'static {
    /// The device type for this backend.
    type Device: BackendDevice;
    /// The storage type for this backend.
    type Storage: BackendStorage;

    // Creation

    /// Allocate storage filled with zeros.
    fn zeros(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Allocate storage filled with a constant value.
    fn full(shape: &Shape, val: f64, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Create storage from a flat f64 slice, converting to the target dtype.
    fn from_f64_slice(data: &[f64], dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Create storage with random uniform values in [0, 1).
    fn rand_uniform(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Create storage with random normal values (mean=0, std=1).
    fn rand_normal(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    // Element-wise ops

    /// Apply a binary op element-wise. The layouts carry broadcasting and
    /// non-contiguous access.
    fn binary_op(
        op: BinaryOp,
        lhs: &Self::Storage,
        lhs_layout: &Layout,
        rhs: &Self::Storage,
        rhs_layout: &Layout,
    ) -> Result<Self::Storage>;

    /// Apply a unary op element-wise.
    fn unary_op(op: UnaryOp, input: &Self::Storage, layout: &Layout) -> Result<Self::Storage>;

    // Reductions

    /// Reduce along specific dimensions. If `dims` is empty, reduce over
    /// all elements.
    fn reduce_op(
        op: ReduceOp,
        input: &Self::Storage,
        layout: &Layout,
        dims: &[usize],
        keep_dim: bool,
    ) -> Result<Self::Storage>;

    // Matrix multiplication

    /// 2-D matrix multiply: C = A @ B.
    fn matmul(
        lhs: &Self::Storage,
        lhs_layout: &Layout,
        rhs: &Self::Storage,
        rhs_layout: &Layout,
    ) -> Result<Self::Storage>;

    // Data movement

    /// Make a contiguous copy of the storage following the given layout.
    fn to_contiguous(input: &Self::Storage, layout: &Layout) -> Result<Self::Storage>;

    /// Copy data out to a host Vec<f64> (for inspection and transfers).
    fn to_f64_vec(input: &Self::Storage, layout: &Layout) -> Result<Vec<f64>>;

    /// Concatenate storages along `dim` into one contiguous storage.
    /// Each entry is (storage, layout); `out_shape` is pre-validated.
    fn cat(
        inputs: &[(&Self::Storage, &Layout)],
        out_shape: &Shape,
        dim: usize,
    ) -> Result<Self::Storage>;

    /// Cast storage to a different dtype.
    ///
    /// The default implementation round-trips through f64 on the host;
    /// backends with native conversion kernels should override it.
    fn cast(
        input: &Self::Storage,
        layout: &Layout,
        dtype: DType,
        device: &Self::Device,
    ) -> Result<Self::Storage> {
        let data = Self::to_f64_vec(input, layout)?;
        Self::from_f64_slice(&data, dtype, device)
    }
}
