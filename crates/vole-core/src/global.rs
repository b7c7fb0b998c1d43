use std::sync::{Arc, OnceLock};

use crate::backend::Backend;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::mesh::{balanced_range, DeviceMesh};
use crate::sbp::{NdSbp, SbpParallel};
use crate::shape::Shape;
use crate::tensor::Tensor;

// GlobalTensor — a logical tensor distributed across a device mesh
//
// The in-process representation holds every rank's local shard, so one
// process can execute a whole mesh's worth of SPMD work (the same way a
// data-parallel wrapper runs all replicas in one process). A consumer
// observes the *logical* value:
//
//   Broadcast   — every shard is the full value
//   Split(d)    — shards concatenated along d reconstruct the value
//   PartialSum  — shards summed element-wise reconstruct the value
//
// The GlobalId is an instance id assigned at most once per tensor: it
// disambiguates two distinct global tensors that happen to share an
// environment name across graph executions. Assignment is a two-phase
// affair (resolve, then assign-if-absent) driven by the interpreter.

/// Instance id of a global tensor, assigned at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(u64);

impl GlobalId {
    fn fresh() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        GlobalId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct GlobalInner<B: Backend> {
    logical_shape: Shape,
    dtype: DType,
    mesh: Arc<DeviceMesh<B>>,
    nd_sbp: NdSbp,
    /// One local shard per mesh rank, in rank order.
    shards: Vec<Tensor<B>>,
    /// Assigned lazily and exactly once; see `ensure_id`.
    id: OnceLock<GlobalId>,
}

/// A logical tensor whose data is split, replicated, or partially-reduced
/// across a [`DeviceMesh`].
pub struct GlobalTensor<B: Backend> {
    inner: Arc<GlobalInner<B>>,
}

impl<B: Backend> Clone for GlobalTensor<B> {
    fn clone(&self) -> Self {
        GlobalTensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> std::fmt::Debug for GlobalTensor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GlobalTensor(shape={}, dtype={}, sbp={}, mesh={:?})",
            self.inner.logical_shape, self.inner.dtype, self.inner.nd_sbp, self.inner.mesh,
        )
    }
}

impl<B: Backend> GlobalTensor<B> {
    /// Assemble a global tensor from per-rank shards.
    ///
    /// The shard list must cover every mesh rank in order, agree on dtype,
    /// and each shard's shape must match what the signature prescribes for
    /// its rank. The logical shape is recovered from the shards.
    pub fn from_shards(
        shards: Vec<Tensor<B>>,
        mesh: Arc<DeviceMesh<B>>,
        nd_sbp: NdSbp,
    ) -> Result<Self> {
        if shards.len() != mesh.num_ranks() {
            return Err(Error::Placement(format!(
                "{} shards for a mesh of {} ranks",
                shards.len(),
                mesh.num_ranks()
            )));
        }
        if nd_sbp.num_axes() != mesh.num_axes() {
            return Err(Error::Placement(format!(
                "signature {} has {} axes but mesh hierarchy {} has {}",
                nd_sbp,
                nd_sbp.num_axes(),
                mesh.hierarchy(),
                mesh.num_axes()
            )));
        }
        let dtype = shards[0].dtype();
        for s in &shards {
            if s.dtype() != dtype {
                return Err(Error::DTypeMismatch {
                    expected: dtype,
                    got: s.dtype(),
                });
            }
        }
        let logical_shape = infer_logical_shape(&mesh, &nd_sbp, &shards)?;
        for (rank, shard) in shards.iter().enumerate() {
            let expected = shard_shape(&logical_shape, &nd_sbp, &mesh, rank)?;
            if shard.shape() != &expected {
                return Err(Error::ShapeMismatch {
                    expected,
                    got: shard.shape().clone(),
                });
            }
        }
        Ok(GlobalTensor {
            inner: Arc::new(GlobalInner {
                logical_shape,
                dtype,
                mesh,
                nd_sbp,
                shards,
                id: OnceLock::new(),
            }),
        })
    }

    /// Distribute a logical tensor over a mesh with the given signature.
    ///
    /// Split axes scatter balanced contiguous slices; broadcast replicates;
    /// partial-sum puts the full value on the axis' first coordinate and
    /// zeros elsewhere (a valid addend decomposition).
    pub fn from_logical(
        logical: &Tensor<B>,
        mesh: Arc<DeviceMesh<B>>,
        nd_sbp: NdSbp,
    ) -> Result<Self> {
        if nd_sbp.num_axes() != mesh.num_axes() {
            return Err(Error::Placement(format!(
                "signature {} does not match mesh hierarchy {}",
                nd_sbp,
                mesh.hierarchy()
            )));
        }
        let mut vals = vec![logical.clone()];
        for (axis, sbp) in nd_sbp.axes().iter().enumerate() {
            let len = mesh.hierarchy().dims()[axis];
            let mut next = Vec::with_capacity(vals.len() * len);
            for v in &vals {
                match sbp {
                    SbpParallel::Broadcast => {
                        for _ in 0..len {
                            next.push(v.clone());
                        }
                    }
                    SbpParallel::Split(d) => {
                        let total = v.shape().dim(*d)?;
                        for j in 0..len {
                            let (start, part) = balanced_range(total, len, j);
                            next.push(v.narrow(*d, start, part)?.contiguous()?);
                        }
                    }
                    SbpParallel::PartialSum => {
                        next.push(v.clone());
                        for _ in 1..len {
                            next.push(Tensor::zeros_like(v)?);
                        }
                    }
                }
            }
            vals = next;
        }
        let shards = vals
            .into_iter()
            .enumerate()
            .map(|(rank, v)| v.to_device(mesh.device(rank)))
            .collect::<Result<Vec<_>>>()?;
        Self::from_shards(shards, mesh, nd_sbp)
    }

    // Accessors

    pub fn logical_shape(&self) -> &Shape {
        &self.inner.logical_shape
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn mesh(&self) -> &Arc<DeviceMesh<B>> {
        &self.inner.mesh
    }

    pub fn nd_sbp(&self) -> &NdSbp {
        &self.inner.nd_sbp
    }

    /// Logical element count.
    pub fn elem_count(&self) -> usize {
        self.inner.logical_shape.elem_count()
    }

    /// The local shard held by the given mesh rank.
    pub fn shard(&self, rank: usize) -> &Tensor<B> {
        &self.inner.shards[rank]
    }

    pub fn shards(&self) -> &[Tensor<B>] {
        &self.inner.shards
    }

    /// Whether two handles refer to the same global tensor instance.
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // Identity — two-phase: resolve, then assign-if-absent.

    /// The instance id, if one has been assigned.
    pub fn try_id(&self) -> Option<GlobalId> {
        self.inner.id.get().copied()
    }

    /// Assign a fresh instance id unless one is already present, and
    /// return it. Idempotent: concurrent callers converge on one id.
    pub fn ensure_id(&self) -> GlobalId {
        *self.inner.id.get_or_init(GlobalId::fresh)
    }

    /// Materialize the logical value as a single local tensor on the
    /// mesh's first device.
    pub fn to_logical(&self) -> Result<Tensor<B>> {
        let home = self.inner.mesh.device(0);
        let mut vals = self
            .inner
            .shards
            .iter()
            .map(|s| s.to_device(home))
            .collect::<Result<Vec<_>>>()?;
        // Collapse hierarchy axes from last to first; with row-major rank
        // order the last axis always groups consecutive entries.
        for axis in (0..self.inner.nd_sbp.num_axes()).rev() {
            let len = self.inner.mesh.hierarchy().dims()[axis];
            let sbp = self.inner.nd_sbp.axes()[axis];
            let mut next = Vec::with_capacity(vals.len() / len);
            for group in vals.chunks(len) {
                let merged = match sbp {
                    SbpParallel::Broadcast => group[0].clone(),
                    SbpParallel::Split(d) => Tensor::cat(group, d)?,
                    SbpParallel::PartialSum => {
                        let mut acc = group[0].clone();
                        for g in &group[1..] {
                            acc = acc.add(g)?;
                        }
                        acc
                    }
                };
                next.push(merged);
            }
            vals = next;
        }
        vals.into_iter()
            .next()
            .ok_or_else(|| Error::msg("axis collapse of a non-empty mesh left no value"))
    }
}

/// The shard shape rank `rank` holds for a logical shape under `nd_sbp`.
pub fn shard_shape<B: Backend>(
    logical: &Shape,
    nd_sbp: &NdSbp,
    mesh: &DeviceMesh<B>,
    rank: usize,
) -> Result<Shape> {
    let mut dims = logical.dims().to_vec();
    for (axis, sbp) in nd_sbp.axes().iter().enumerate() {
        if let SbpParallel::Split(d) = sbp {
            if *d >= dims.len() {
                return Err(Error::DimOutOfRange {
                    dim: *d,
                    rank: dims.len(),
                });
            }
            let len = mesh.hierarchy().dims()[axis];
            let coord = axis_coord(mesh, rank, axis);
            dims[*d] = balanced_range(dims[*d], len, coord).1;
        }
    }
    Ok(Shape::new(dims))
}

/// Recover the logical shape from per-rank shard shapes.
fn infer_logical_shape<B: Backend>(
    mesh: &DeviceMesh<B>,
    nd_sbp: &NdSbp,
    shards: &[Tensor<B>],
) -> Result<Shape> {
    let mut dims = shards[0].dims().to_vec();
    let mut split_seen = vec![false; dims.len()];
    for (axis, sbp) in nd_sbp.axes().iter().enumerate() {
        if let SbpParallel::Split(d) = sbp {
            if *d >= dims.len() {
                return Err(Error::DimOutOfRange {
                    dim: *d,
                    rank: dims.len(),
                });
            }
            if split_seen[*d] {
                return Err(Error::msg(format!(
                    "dimension {} is split by more than one mesh axis",
                    d
                )));
            }
            split_seen[*d] = true;
            let group = mesh.axis_group(axis, 0);
            dims[*d] = group.iter().map(|&r| shards[r].dims()[*d]).sum();
        }
    }
    Ok(Shape::new(dims))
}

fn axis_coord<B: Backend>(mesh: &DeviceMesh<B>, rank: usize, axis: usize) -> usize {
    let len = mesh.hierarchy().dims()[axis];
    let stride: usize = mesh.hierarchy().dims()[axis + 1..].iter().product();
    (rank / stride) % len
}
