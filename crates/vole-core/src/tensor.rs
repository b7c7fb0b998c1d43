use std::sync::{Arc, RwLock};

use crate::backend::{Backend, BackendStorage, BinaryOp, ReduceOp, UnaryOp};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::shape::Shape;

// Tensor — a local (single-device) tensor handle
//
// MEMORY MODEL:
//
//   The inner data is wrapped in Arc, so cloning a Tensor is O(1) (just a
//   refcount bump) and multiple handles can share the same underlying
//   storage. Views (narrow, transpose, the interpreter's zero-copy view
//   path) share the storage Arc and differ only in their Layout.
//
//   Storage sits behind Arc<RwLock<Storage>> so concurrent readers work
//   and an in-place update through one handle is observed by every other
//   handle sharing the storage. That observability is exactly what the
//   view path guarantees: mutating a reshape output mutates its input.
//
// Ownership in the interpreter: a tensor stays alive while any environment
// slot or in-flight operator holds a handle; dropping the last handle
// (liveness eviction included) releases the storage.

/// Unique identifier for a tensor handle. Two handles with the same id are
/// clones of one another (aliases); two views of the same storage have
/// different ids but shared storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(u64);

impl Default for TensorId {
    fn default() -> Self {
        Self::new()
    }
}

impl TensorId {
    /// Generate a new unique tensor ID (global atomic counter).
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TensorId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Inner data of a tensor, shared via Arc.
struct TensorInner<B: Backend> {
    id: TensorId,
    /// The raw data on the backend's device. Shared between views.
    storage: Arc<RwLock<B::Storage>>,
    /// Memory layout: shape + strides + offset.
    layout: Layout,
    dtype: DType,
    device: B::Device,
}

/// An n-dimensional array on a specific backend device.
pub struct Tensor<B: Backend> {
    inner: Arc<TensorInner<B>>,
}

// Manual Clone: Arc::clone is cheap and keeps the same TensorId.
impl<B: Backend> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        Tensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(id={:?}, shape={}, dtype={}, device={:?})",
            self.inner.id,
            self.inner.layout.shape(),
            self.inner.dtype,
            self.inner.device,
        )
    }
}

impl<B: Backend> Tensor<B> {
    // Internal constructors

    fn from_storage(storage: B::Storage, layout: Layout, dtype: DType, device: B::Device) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                storage: Arc::new(RwLock::new(storage)),
                layout,
                dtype,
                device,
            }),
        }
    }

    /// A view sharing the same storage but with a different layout.
    fn view_with_layout(&self, layout: Layout) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                storage: Arc::clone(&self.inner.storage),
                layout,
                dtype: self.inner.dtype,
                device: self.inner.device.clone(),
            }),
        }
    }

    // Accessors

    /// Unique handle ID.
    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    /// The shape of this tensor.
    pub fn shape(&self) -> &Shape {
        self.inner.layout.shape()
    }

    /// The dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        self.inner.layout.dims()
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.inner.layout.rank()
    }

    /// Total number of elements.
    pub fn elem_count(&self) -> usize {
        self.inner.layout.elem_count()
    }

    /// Data type of the elements.
    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// The device this tensor is on.
    pub fn device(&self) -> &B::Device {
        &self.inner.device
    }

    /// The memory layout (shape + strides + offset).
    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    /// Whether this tensor is contiguous in memory.
    pub fn is_contiguous(&self) -> bool {
        self.inner.layout.is_contiguous()
    }

    /// Whether this tensor shares its backing storage with `other`
    /// (alias or view relationship).
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner.storage, &other.inner.storage)
    }

    fn read_storage(&self) -> Result<std::sync::RwLockReadGuard<'_, B::Storage>> {
        self.inner
            .storage
            .read()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    fn write_storage(&self) -> Result<std::sync::RwLockWriteGuard<'_, B::Storage>> {
        self.inner
            .storage
            .write()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    // In-place mutation

    /// Replace the underlying storage data in place.
    ///
    /// The write goes through the shared `Arc<RwLock<Storage>>`, so every
    /// view and alias of this storage observes the new values. The layout
    /// is unchanged; `new_data` must cover the whole backing storage.
    pub fn update_data_inplace(&self, new_data: &[f64]) -> Result<()> {
        let expected = self.read_storage()?.len();
        if new_data.len() != expected {
            return Err(Error::msg(format!(
                "update_data_inplace: expected {} elements, got {}",
                expected,
                new_data.len()
            )));
        }
        let new_storage = B::from_f64_slice(new_data, self.dtype(), self.device())?;
        let mut guard = self.write_storage()?;
        *guard = new_storage;
        Ok(())
    }

    // Creation

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Self> {
        let shape = shape.into();
        let layout = Layout::contiguous(shape.clone());
        let storage = B::zeros(&shape, dtype, device)?;
        Ok(Self::from_storage(storage, layout, dtype, device.clone()))
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Self> {
        Self::full(shape, 1.0, dtype, device)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(
        shape: impl Into<Shape>,
        val: f64,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let shape = shape.into();
        let layout = Layout::contiguous(shape.clone());
        let storage = B::full(&shape, val, dtype, device)?;
        Ok(Self::from_storage(storage, layout, dtype, device.clone()))
    }

    /// Create a tensor from a flat slice of f64 values, converting to the
    /// requested dtype.
    pub fn from_f64_slice(
        data: &[f64],
        shape: impl Into<Shape>,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                shape: shape.clone(),
                expected: shape.elem_count(),
                got: data.len(),
            });
        }
        let layout = Layout::contiguous(shape);
        let storage = B::from_f64_slice(data, dtype, device)?;
        Ok(Self::from_storage(storage, layout, dtype, device.clone()))
    }

    /// Create a tensor with random uniform values in [0, 1).
    pub fn rand(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Self> {
        let shape = shape.into();
        let layout = Layout::contiguous(shape.clone());
        let storage = B::rand_uniform(&shape, dtype, device)?;
        Ok(Self::from_storage(storage, layout, dtype, device.clone()))
    }

    /// Create a tensor with random normal values (mean=0, std=1).
    pub fn randn(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Self> {
        let shape = shape.into();
        let layout = Layout::contiguous(shape.clone());
        let storage = B::rand_normal(&shape, dtype, device)?;
        Ok(Self::from_storage(storage, layout, dtype, device.clone()))
    }

    /// Zeros with the same shape, dtype, and device as `other`.
    pub fn zeros_like(other: &Self) -> Result<Self> {
        Self::zeros(other.shape().clone(), other.dtype(), other.device())
    }

    // Views (no data copy)

    /// Narrow (slice) along a dimension. Shares storage with self.
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self> {
        let new_layout = self.inner.layout.narrow(dim, start, len)?;
        Ok(self.view_with_layout(new_layout))
    }

    /// Transpose two dimensions. Shares storage with self.
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Self> {
        let new_layout = self.inner.layout.transpose(dim0, dim1)?;
        Ok(self.view_with_layout(new_layout))
    }

    /// Reinterpret this tensor under a new shape without copying data.
    ///
    /// The element counts must match and the current layout must be
    /// row-major (any base offset is fine). The result shares storage and
    /// keeps the offset, so writes through either handle are visible in
    /// both. This is the primitive behind the interpreter's view path.
    pub fn basic_view(&self, new_shape: impl Into<Shape>) -> Result<Self> {
        let new_shape = new_shape.into();
        if new_shape.elem_count() != self.elem_count() {
            return Err(Error::ElementCountMismatch {
                shape: new_shape.clone(),
                expected: self.elem_count(),
                got: new_shape.elem_count(),
            });
        }
        if !self.inner.layout.is_view_compatible() {
            return Err(Error::msg(
                "basic_view requires a row-major layout; call contiguous() first",
            ));
        }
        let strides = new_shape.stride_contiguous();
        let layout = Layout::new(new_shape, strides, self.inner.layout.offset());
        Ok(self.view_with_layout(layout))
    }

    /// Reshape to a new shape with the same element count. Copies only if
    /// the current layout is not row-major.
    pub fn reshape(&self, new_shape: impl Into<Shape>) -> Result<Self> {
        let new_shape = new_shape.into();
        if new_shape.elem_count() != self.elem_count() {
            return Err(Error::ElementCountMismatch {
                shape: new_shape.clone(),
                expected: self.elem_count(),
                got: new_shape.elem_count(),
            });
        }
        let base = if self.inner.layout.is_view_compatible() {
            self.clone()
        } else {
            self.contiguous()?
        };
        base.basic_view(new_shape)
    }

    /// Insert a dimension of size 1 at `dim`. A view when the layout is
    /// row-major, a copy otherwise.
    pub fn unsqueeze(&self, dim: usize) -> Result<Self> {
        let rank = self.rank();
        if dim > rank {
            return Err(Error::DimOutOfRange { dim, rank });
        }
        let mut dims = self.dims().to_vec();
        dims.insert(dim, 1);
        self.reshape(dims)
    }

    /// Ensure the tensor is contiguous in memory. Already-contiguous
    /// tensors return a cheap clone; otherwise the data is copied.
    pub fn contiguous(&self) -> Result<Self> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }
        let storage = self.read_storage()?;
        let new_storage = B::to_contiguous(&storage, &self.inner.layout)?;
        drop(storage);
        let new_layout = Layout::contiguous(self.shape().clone());
        Ok(Self::from_storage(
            new_storage,
            new_layout,
            self.inner.dtype,
            self.inner.device.clone(),
        ))
    }

    // Data movement

    /// Materialize this tensor on another device. Same-device calls are a
    /// cheap clone; cross-device transfers round-trip through the host.
    pub fn to_device(&self, device: &B::Device) -> Result<Self> {
        if self.device() == device {
            return Ok(self.clone());
        }
        let data = self.to_f64_vec()?;
        Self::from_f64_slice(&data, self.shape().clone(), self.dtype(), device)
    }

    /// Cast to a different dtype. Same-dtype casts are a cheap clone.
    pub fn to_dtype(&self, dtype: DType) -> Result<Self> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        let storage = self.read_storage()?;
        let new_storage = B::cast(&storage, &self.inner.layout, dtype, self.device())?;
        drop(storage);
        let layout = Layout::contiguous(self.shape().clone());
        Ok(Self::from_storage(
            new_storage,
            layout,
            dtype,
            self.inner.device.clone(),
        ))
    }

    /// Copy the logical values out as a host Vec<f64>, in row-major order.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let storage = self.read_storage()?;
        B::to_f64_vec(&storage, &self.inner.layout)
    }

    /// Read a single-element tensor as an f64 scalar.
    pub fn to_scalar_f64(&self) -> Result<f64> {
        if self.elem_count() != 1 {
            return Err(Error::msg(format!(
                "to_scalar_f64 on tensor with {} elements",
                self.elem_count()
            )));
        }
        Ok(self.to_f64_vec()?[0])
    }

    // Element-wise arithmetic

    fn binary_impl(&self, rhs: &Self, op: BinaryOp) -> Result<Self> {
        if self.dtype() != rhs.dtype() {
            return Err(Error::DTypeMismatch {
                expected: self.dtype(),
                got: rhs.dtype(),
            });
        }
        let out_shape = Shape::broadcast_shape(self.shape(), rhs.shape())?;
        let lhs = self.contiguous()?;
        let rhs = rhs.contiguous()?;
        let lhs_layout = Layout::new(
            out_shape.clone(),
            lhs.shape().broadcast_strides(&out_shape),
            0,
        );
        let rhs_layout = Layout::new(
            out_shape.clone(),
            rhs.shape().broadcast_strides(&out_shape),
            0,
        );
        let l = lhs.read_storage()?;
        let r = rhs.read_storage()?;
        let storage = B::binary_op(op, &l, &lhs_layout, &r, &rhs_layout)?;
        drop(l);
        drop(r);
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(out_shape),
            self.dtype(),
            self.inner.device.clone(),
        ))
    }

    pub fn add(&self, rhs: &Self) -> Result<Self> {
        self.binary_impl(rhs, BinaryOp::Add)
    }

    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        self.binary_impl(rhs, BinaryOp::Sub)
    }

    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        self.binary_impl(rhs, BinaryOp::Mul)
    }

    pub fn div(&self, rhs: &Self) -> Result<Self> {
        self.binary_impl(rhs, BinaryOp::Div)
    }

    fn unary_impl(&self, op: UnaryOp) -> Result<Self> {
        let storage = self.read_storage()?;
        let out = B::unary_op(op, &storage, &self.inner.layout)?;
        drop(storage);
        Ok(Self::from_storage(
            out,
            Layout::contiguous(self.shape().clone()),
            self.dtype(),
            self.inner.device.clone(),
        ))
    }

    pub fn neg(&self) -> Result<Self> {
        self.unary_impl(UnaryOp::Neg)
    }

    pub fn exp(&self) -> Result<Self> {
        self.unary_impl(UnaryOp::Exp)
    }

    pub fn log(&self) -> Result<Self> {
        self.unary_impl(UnaryOp::Log)
    }

    pub fn sqrt(&self) -> Result<Self> {
        self.unary_impl(UnaryOp::Sqrt)
    }

    pub fn relu(&self) -> Result<Self> {
        self.unary_impl(UnaryOp::Relu)
    }

    pub fn sigmoid(&self) -> Result<Self> {
        self.unary_impl(UnaryOp::Sigmoid)
    }

    pub fn tanh(&self) -> Result<Self> {
        self.unary_impl(UnaryOp::Tanh)
    }

    // Reductions

    fn reduce_impl(&self, op: ReduceOp, dims: &[usize], keep_dim: bool) -> Result<Self> {
        for &d in dims {
            if d >= self.rank() {
                return Err(Error::DimOutOfRange {
                    dim: d,
                    rank: self.rank(),
                });
            }
        }
        let storage = self.read_storage()?;
        let out = B::reduce_op(op, &storage, &self.inner.layout, dims, keep_dim)?;
        drop(storage);
        let out_shape = reduced_shape(self.shape(), dims, keep_dim);
        Ok(Self::from_storage(
            out,
            Layout::contiguous(out_shape),
            self.dtype(),
            self.inner.device.clone(),
        ))
    }

    /// Sum along the given dimensions (all dimensions when empty).
    pub fn sum(&self, dims: &[usize], keep_dim: bool) -> Result<Self> {
        self.reduce_impl(ReduceOp::Sum, dims, keep_dim)
    }

    /// Sum over all elements into a scalar-shaped tensor.
    pub fn sum_all(&self) -> Result<Self> {
        self.reduce_impl(ReduceOp::Sum, &[], false)
    }

    // Matrix multiplication

    /// 2-D matrix multiply.
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        if self.rank() != 2 || rhs.rank() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: self.rank().max(rhs.rank()),
            });
        }
        if self.dtype() != rhs.dtype() {
            return Err(Error::DTypeMismatch {
                expected: self.dtype(),
                got: rhs.dtype(),
            });
        }
        let (m, k1) = (self.dims()[0], self.dims()[1]);
        let (k2, n) = (rhs.dims()[0], rhs.dims()[1]);
        if k1 != k2 {
            return Err(Error::ShapeMismatch {
                expected: self.shape().clone(),
                got: rhs.shape().clone(),
            });
        }
        let l = self.read_storage()?;
        let r = rhs.read_storage()?;
        let storage = B::matmul(&l, &self.inner.layout, &r, &rhs.inner.layout)?;
        drop(l);
        drop(r);
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(Shape::from((m, n))),
            self.dtype(),
            self.inner.device.clone(),
        ))
    }

    // Concatenation

    /// Concatenate tensors along `dim` into a new contiguous tensor.
    pub fn cat(tensors: &[Self], dim: usize) -> Result<Self> {
        let first = tensors
            .first()
            .ok_or_else(|| Error::msg("cat requires at least one tensor"))?;
        let rank = first.rank();
        if dim >= rank {
            return Err(Error::DimOutOfRange { dim, rank });
        }
        let mut cat_dim = 0;
        for t in tensors {
            if t.rank() != rank {
                return Err(Error::RankMismatch {
                    expected: rank,
                    got: t.rank(),
                });
            }
            if t.dtype() != first.dtype() {
                return Err(Error::DTypeMismatch {
                    expected: first.dtype(),
                    got: t.dtype(),
                });
            }
            for d in 0..rank {
                if d != dim && t.dims()[d] != first.dims()[d] {
                    return Err(Error::ShapeMismatch {
                        expected: first.shape().clone(),
                        got: t.shape().clone(),
                    });
                }
            }
            cat_dim += t.dims()[dim];
        }
        let mut out_dims = first.dims().to_vec();
        out_dims[dim] = cat_dim;
        let out_shape = Shape::new(out_dims);

        let guards: Vec<_> = tensors
            .iter()
            .map(|t| t.read_storage())
            .collect::<Result<Vec<_>>>()?;
        let pairs: Vec<(&B::Storage, &Layout)> = guards
            .iter()
            .zip(tensors.iter())
            .map(|(g, t)| (&**g, t.layout()))
            .collect();
        let storage = B::cat(&pairs, &out_shape, dim)?;
        drop(pairs);
        drop(guards);
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(out_shape),
            first.dtype(),
            first.inner.device.clone(),
        ))
    }
}

/// The output shape of a reduction over `dims` (all dims when empty).
fn reduced_shape(shape: &Shape, dims: &[usize], keep_dim: bool) -> Shape {
    let reduce_all = dims.is_empty();
    let mut out = Vec::new();
    for (d, &size) in shape.dims().iter().enumerate() {
        let reduced = reduce_all || dims.contains(&d);
        if reduced {
            if keep_dim {
                out.push(1);
            }
        } else {
            out.push(size);
        }
    }
    Shape::new(out)
}
