//! # vole-cpu
//!
//! CPU backend for Vole: typed storage buffers, strided element-wise
//! kernels, a rayon-parallel matmul, and rand-backed fills.
//!
//! A [`CpuDevice`] carries an ordinal ("cpu:0", "cpu:1", ...), so a single
//! process can stand up a whole device mesh of logical CPU devices; the
//! distributed interpreter's SPMD simulation runs every rank in-process.

use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use vole_core::backend::{Backend, BackendDevice, BackendStorage, BinaryOp, ReduceOp, UnaryOp};
use vole_core::{DType, Error, Layout, Result, Shape, Tensor, WithDType};

/// Convenience alias for tensors on the CPU backend.
pub type CpuTensor = Tensor<CpuBackend>;

// CpuDevice

/// A logical CPU device, identified by ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuDevice {
    ordinal: usize,
}

impl CpuDevice {
    pub fn new(ordinal: usize) -> Self {
        CpuDevice { ordinal }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        CpuDevice { ordinal: 0 }
    }
}

impl BackendDevice for CpuDevice {
    fn name(&self) -> String {
        format!("cpu:{}", self.ordinal)
    }

    fn parse(tag: &str) -> Option<Self> {
        let rest = match tag.strip_prefix("cpu") {
            Some(rest) => rest,
            None => return None,
        };
        if rest.is_empty() {
            return Some(CpuDevice::new(0));
        }
        let ordinal = rest.strip_prefix(':')?.parse().ok()?;
        Some(CpuDevice::new(ordinal))
    }
}

// CpuStorage — one Vec per dtype

/// Flat host buffer holding tensor elements of one dtype.
#[derive(Debug, Clone)]
pub enum CpuStorage {
    F16(Vec<half::f16>),
    BF16(Vec<half::bf16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    U8(Vec<u8>),
    U32(Vec<u32>),
    I64(Vec<i64>),
}

impl BackendStorage for CpuStorage {
    fn dtype(&self) -> DType {
        match self {
            CpuStorage::F16(_) => DType::F16,
            CpuStorage::BF16(_) => DType::BF16,
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::F64(_) => DType::F64,
            CpuStorage::U8(_) => DType::U8,
            CpuStorage::U32(_) => DType::U32,
            CpuStorage::I64(_) => DType::I64,
        }
    }

    fn len(&self) -> usize {
        match self {
            CpuStorage::F16(v) => v.len(),
            CpuStorage::BF16(v) => v.len(),
            CpuStorage::F32(v) => v.len(),
            CpuStorage::F64(v) => v.len(),
            CpuStorage::U8(v) => v.len(),
            CpuStorage::U32(v) => v.len(),
            CpuStorage::I64(v) => v.len(),
        }
    }
}

/// Dispatch a generic function over the typed buffer of one storage.
/// `$f` is instantiated once per dtype with the element type in scope.
macro_rules! with_storage {
    ($storage:expr, |$vec:ident| $body:expr) => {
        match $storage {
            CpuStorage::F16($vec) => CpuStorage::F16($body),
            CpuStorage::BF16($vec) => CpuStorage::BF16($body),
            CpuStorage::F32($vec) => CpuStorage::F32($body),
            CpuStorage::F64($vec) => CpuStorage::F64($body),
            CpuStorage::U8($vec) => CpuStorage::U8($body),
            CpuStorage::U32($vec) => CpuStorage::U32($body),
            CpuStorage::I64($vec) => CpuStorage::I64($body),
        }
    };
}

/// Dispatch over a same-dtype storage pair; errors on mixed dtypes.
macro_rules! with_storage_pair {
    ($lhs:expr, $rhs:expr, |$a:ident, $b:ident| $body:expr) => {
        match ($lhs, $rhs) {
            (CpuStorage::F16($a), CpuStorage::F16($b)) => Ok(CpuStorage::F16($body)),
            (CpuStorage::BF16($a), CpuStorage::BF16($b)) => Ok(CpuStorage::BF16($body)),
            (CpuStorage::F32($a), CpuStorage::F32($b)) => Ok(CpuStorage::F32($body)),
            (CpuStorage::F64($a), CpuStorage::F64($b)) => Ok(CpuStorage::F64($body)),
            (CpuStorage::U8($a), CpuStorage::U8($b)) => Ok(CpuStorage::U8($body)),
            (CpuStorage::U32($a), CpuStorage::U32($b)) => Ok(CpuStorage::U32($body)),
            (CpuStorage::I64($a), CpuStorage::I64($b)) => Ok(CpuStorage::I64($body)),
            (lhs, rhs) => Err(Error::DTypeMismatch {
                expected: lhs.dtype(),
                got: rhs.dtype(),
            }),
        }
    };
}

// Generic strided helpers. Math runs in f64 and converts back through
// WithDType, which keeps one implementation per op across all dtypes.

fn map1<T: WithDType>(data: &[T], layout: &Layout, f: impl Fn(f64) -> f64) -> Vec<T> {
    layout
        .strided_indices()
        .map(|i| T::from_f64(f(data[i].to_f64())))
        .collect()
}

fn map2<T: WithDType>(
    lhs: &[T],
    lhs_layout: &Layout,
    rhs: &[T],
    rhs_layout: &Layout,
    f: impl Fn(f64, f64) -> f64,
) -> Vec<T> {
    lhs_layout
        .strided_indices()
        .zip(rhs_layout.strided_indices())
        .map(|(i, j)| T::from_f64(f(lhs[i].to_f64(), rhs[j].to_f64())))
        .collect()
}

fn gather<T: WithDType>(data: &[T], layout: &Layout) -> Vec<T> {
    layout.strided_indices().map(|i| data[i]).collect()
}

fn fill<T: WithDType>(count: usize, val: f64) -> Vec<T> {
    vec![T::from_f64(val); count]
}

fn convert<T: WithDType>(data: &[f64]) -> Vec<T> {
    data.iter().map(|&v| T::from_f64(v)).collect()
}

// keep_dim only changes the output *shape*, which the tensor layer
// computes; the reduced buffer is identical either way.
fn reduce<T: WithDType>(data: &[T], layout: &Layout, dims: &[usize], op: ReduceOp) -> Vec<T> {
    let in_dims = layout.dims();
    let reduce_all = dims.is_empty();
    let reduced: Vec<bool> = (0..in_dims.len())
        .map(|d| reduce_all || dims.contains(&d))
        .collect();

    // Output shape with reduced dims kept at size 1 for index math;
    // squeezing afterwards is just a reinterpretation of the same buffer.
    let keep_dims: Vec<usize> = in_dims
        .iter()
        .enumerate()
        .map(|(d, &s)| if reduced[d] { 1 } else { s })
        .collect();
    let out_count: usize = keep_dims.iter().product::<usize>().max(1);
    let out_strides = Shape::new(keep_dims.clone()).stride_contiguous();

    let init = match op {
        ReduceOp::Sum | ReduceOp::Mean => 0.0,
        ReduceOp::Max => f64::NEG_INFINITY,
        ReduceOp::Min => f64::INFINITY,
    };
    let mut acc = vec![init; out_count];
    let mut counts = vec![0usize; out_count];

    let mut index = vec![0usize; in_dims.len()];
    for flat in layout.strided_indices() {
        let mut out_idx = 0;
        for (d, &i) in index.iter().enumerate() {
            if !reduced[d] {
                out_idx += i * out_strides[d];
            }
        }
        let v = data[flat].to_f64();
        match op {
            ReduceOp::Sum | ReduceOp::Mean => acc[out_idx] += v,
            ReduceOp::Max => acc[out_idx] = acc[out_idx].max(v),
            ReduceOp::Min => acc[out_idx] = acc[out_idx].min(v),
        }
        counts[out_idx] += 1;
        // Advance the multi-dimensional index, rightmost dim first.
        for d in (0..in_dims.len()).rev() {
            index[d] += 1;
            if index[d] < in_dims[d] {
                break;
            }
            index[d] = 0;
        }
    }
    if op == ReduceOp::Mean {
        for (a, &c) in acc.iter_mut().zip(counts.iter()) {
            if c > 0 {
                *a /= c as f64;
            }
        }
    }
    acc.into_iter().map(T::from_f64).collect()
}

// CpuBackend

/// The CPU compute backend.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    type Device = CpuDevice;
    type Storage = CpuStorage;

    fn zeros(shape: &Shape, dtype: DType, device: &CpuDevice) -> Result<CpuStorage> {
        Self::full(shape, 0.0, dtype, device)
    }

    fn full(shape: &Shape, val: f64, dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        let n = shape.elem_count();
        Ok(match dtype {
            DType::F16 => CpuStorage::F16(fill(n, val)),
            DType::BF16 => CpuStorage::BF16(fill(n, val)),
            DType::F32 => CpuStorage::F32(fill(n, val)),
            DType::F64 => CpuStorage::F64(fill(n, val)),
            DType::U8 => CpuStorage::U8(fill(n, val)),
            DType::U32 => CpuStorage::U32(fill(n, val)),
            DType::I64 => CpuStorage::I64(fill(n, val)),
        })
    }

    fn from_f64_slice(data: &[f64], dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        Ok(match dtype {
            DType::F16 => CpuStorage::F16(convert(data)),
            DType::BF16 => CpuStorage::BF16(convert(data)),
            DType::F32 => CpuStorage::F32(convert(data)),
            DType::F64 => CpuStorage::F64(data.to_vec()),
            DType::U8 => CpuStorage::U8(convert(data)),
            DType::U32 => CpuStorage::U32(convert(data)),
            DType::I64 => CpuStorage::I64(convert(data)),
        })
    }

    fn rand_uniform(shape: &Shape, dtype: DType, device: &CpuDevice) -> Result<CpuStorage> {
        let mut rng = rand::thread_rng();
        let data: Vec<f64> = (0..shape.elem_count()).map(|_| rng.gen::<f64>()).collect();
        Self::from_f64_slice(&data, dtype, device)
    }

    fn rand_normal(shape: &Shape, dtype: DType, device: &CpuDevice) -> Result<CpuStorage> {
        let mut rng = rand::thread_rng();
        let data: Vec<f64> = (0..shape.elem_count())
            .map(|_| rng.sample(StandardNormal))
            .collect();
        Self::from_f64_slice(&data, dtype, device)
    }

    fn binary_op(
        op: BinaryOp,
        lhs: &CpuStorage,
        lhs_layout: &Layout,
        rhs: &CpuStorage,
        rhs_layout: &Layout,
    ) -> Result<CpuStorage> {
        let f = match op {
            BinaryOp::Add => |a: f64, b: f64| a + b,
            BinaryOp::Sub => |a: f64, b: f64| a - b,
            BinaryOp::Mul => |a: f64, b: f64| a * b,
            BinaryOp::Div => |a: f64, b: f64| a / b,
        };
        with_storage_pair!(lhs, rhs, |a, b| map2(a, lhs_layout, b, rhs_layout, f))
    }

    fn unary_op(op: UnaryOp, input: &CpuStorage, layout: &Layout) -> Result<CpuStorage> {
        let f = match op {
            UnaryOp::Neg => |v: f64| -v,
            UnaryOp::Exp => f64::exp,
            UnaryOp::Log => f64::ln,
            UnaryOp::Sqrt => f64::sqrt,
            UnaryOp::Relu => |v: f64| v.max(0.0),
            UnaryOp::Sigmoid => |v: f64| 1.0 / (1.0 + (-v).exp()),
            UnaryOp::Tanh => f64::tanh,
        };
        Ok(with_storage!(input, |v| map1(v, layout, f)))
    }

    fn reduce_op(
        op: ReduceOp,
        input: &CpuStorage,
        layout: &Layout,
        dims: &[usize],
        _keep_dim: bool,
    ) -> Result<CpuStorage> {
        Ok(with_storage!(input, |v| reduce(v, layout, dims, op)))
    }

    fn matmul(
        lhs: &CpuStorage,
        lhs_layout: &Layout,
        rhs: &CpuStorage,
        rhs_layout: &Layout,
    ) -> Result<CpuStorage> {
        if lhs.dtype() != rhs.dtype() {
            return Err(Error::DTypeMismatch {
                expected: lhs.dtype(),
                got: rhs.dtype(),
            });
        }
        let (m, k) = (lhs_layout.dims()[0], lhs_layout.dims()[1]);
        let n = rhs_layout.dims()[1];
        // Gather both operands into row-major f64 buffers, then multiply
        // row-parallel. Accumulation in f64 regardless of dtype.
        let a = Self::to_f64_vec(lhs, lhs_layout)?;
        let b = Self::to_f64_vec(rhs, rhs_layout)?;
        let mut out = vec![0.0f64; m * n];
        out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            for p in 0..k {
                let av = a[i * k + p];
                if av == 0.0 {
                    continue;
                }
                let brow = &b[p * n..(p + 1) * n];
                for (j, r) in row.iter_mut().enumerate() {
                    *r += av * brow[j];
                }
            }
        });
        Self::from_f64_slice(&out, lhs.dtype(), &CpuDevice::default())
    }

    fn to_contiguous(input: &CpuStorage, layout: &Layout) -> Result<CpuStorage> {
        Ok(with_storage!(input, |v| gather(v, layout)))
    }

    fn to_f64_vec(input: &CpuStorage, layout: &Layout) -> Result<Vec<f64>> {
        macro_rules! collect_f64 {
            ($vec:expr) => {
                layout
                    .strided_indices()
                    .map(|i| $vec[i].to_f64())
                    .collect()
            };
        }
        Ok(match input {
            CpuStorage::F16(v) => collect_f64!(v),
            CpuStorage::BF16(v) => collect_f64!(v),
            CpuStorage::F32(v) => collect_f64!(v),
            CpuStorage::F64(v) => collect_f64!(v),
            CpuStorage::U8(v) => collect_f64!(v),
            CpuStorage::U32(v) => collect_f64!(v),
            CpuStorage::I64(v) => collect_f64!(v),
        })
    }

    fn cat(
        inputs: &[(&CpuStorage, &Layout)],
        out_shape: &Shape,
        dim: usize,
    ) -> Result<CpuStorage> {
        // Walk the inputs in logical order, interleaving one block per
        // input for every index prefix before `dim`.
        let inner: usize = out_shape.dims()[dim + 1..].iter().product();
        let outer: usize = out_shape.dims()[..dim].iter().product::<usize>().max(1);

        let gathered: Vec<Vec<f64>> = inputs
            .iter()
            .map(|(s, l)| Self::to_f64_vec(s, l))
            .collect::<Result<Vec<_>>>()?;
        let mut out = Vec::with_capacity(out_shape.elem_count());
        for o in 0..outer {
            for ((_, layout), data) in inputs.iter().zip(gathered.iter()) {
                let block = layout.dims()[dim] * inner;
                out.extend_from_slice(&data[o * block..(o + 1) * block]);
            }
        }
        Self::from_f64_slice(&out, inputs[0].0.dtype(), &CpuDevice::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev() -> CpuDevice {
        CpuDevice::default()
    }

    #[test]
    fn test_device_parse() {
        assert_eq!(CpuDevice::parse("cpu"), Some(CpuDevice::new(0)));
        assert_eq!(CpuDevice::parse("cpu:3"), Some(CpuDevice::new(3)));
        assert_eq!(CpuDevice::parse("cuda:0"), None);
        assert_eq!(CpuDevice::parse("cpu:x"), None);
        assert_eq!(CpuDevice::new(2).name(), "cpu:2");
    }

    #[test]
    fn test_binary_add_broadcast() {
        let a = CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), DType::F32, &dev())
            .unwrap();
        let b = CpuTensor::from_f64_slice(&[10.0, 20.0, 30.0], 3, DType::F32, &dev()).unwrap();
        let c = a.add(&b).unwrap();
        assert_eq!(c.dims(), &[2, 3]);
        assert_eq!(c.to_f64_vec().unwrap(), vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn test_binary_dtype_mismatch() {
        let a = CpuTensor::from_f64_slice(&[1.0], 1, DType::F32, &dev()).unwrap();
        let b = CpuTensor::from_f64_slice(&[1.0], 1, DType::F64, &dev()).unwrap();
        assert!(a.add(&b).is_err());
    }

    #[test]
    fn test_unary_relu() {
        let a = CpuTensor::from_f64_slice(&[-2.0, 0.0, 3.0], 3, DType::F64, &dev()).unwrap();
        assert_eq!(a.relu().unwrap().to_f64_vec().unwrap(), vec![0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_matmul() {
        let a = CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0], (2, 2), DType::F64, &dev()).unwrap();
        let b = CpuTensor::from_f64_slice(&[5.0, 6.0, 7.0, 8.0], (2, 2), DType::F64, &dev()).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.to_f64_vec().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_respects_transposed_layout() {
        let a = CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0], (2, 2), DType::F64, &dev()).unwrap();
        let at = a.transpose(0, 1).unwrap();
        let b = CpuTensor::from_f64_slice(&[1.0, 0.0, 0.0, 1.0], (2, 2), DType::F64, &dev()).unwrap();
        let c = at.matmul(&b).unwrap();
        assert_eq!(c.to_f64_vec().unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_reduce_sum_axis() {
        let a = CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), DType::F64, &dev())
            .unwrap();
        let s = a.sum(&[1], false).unwrap();
        assert_eq!(s.dims(), &[2]);
        assert_eq!(s.to_f64_vec().unwrap(), vec![6.0, 15.0]);
        let s_all = a.sum_all().unwrap();
        assert_eq!(s_all.to_scalar_f64().unwrap(), 21.0);
    }

    #[test]
    fn test_cat_along_dims() {
        let a = CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0], (2, 2), DType::F64, &dev()).unwrap();
        let b = CpuTensor::from_f64_slice(&[5.0, 6.0, 7.0, 8.0], (2, 2), DType::F64, &dev()).unwrap();
        let c0 = CpuTensor::cat(&[a.clone(), b.clone()], 0).unwrap();
        assert_eq!(c0.dims(), &[4, 2]);
        assert_eq!(c0.to_f64_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let c1 = CpuTensor::cat(&[a, b], 1).unwrap();
        assert_eq!(c1.dims(), &[2, 4]);
        assert_eq!(c1.to_f64_vec().unwrap(), vec![1.0, 2.0, 5.0, 6.0, 3.0, 4.0, 7.0, 8.0]);
    }

    #[test]
    fn test_narrow_then_contiguous() {
        let a = CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), DType::F64, &dev())
            .unwrap();
        let n = a.narrow(1, 1, 2).unwrap();
        assert!(n.shares_storage(&a));
        assert_eq!(n.to_f64_vec().unwrap(), vec![2.0, 3.0, 5.0, 6.0]);
        let c = n.contiguous().unwrap();
        assert!(!c.shares_storage(&a));
        assert_eq!(c.to_f64_vec().unwrap(), vec![2.0, 3.0, 5.0, 6.0]);
    }

    #[test]
    fn test_basic_view_shares_storage_and_writes_through() {
        let a = CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0], (2, 2), DType::F64, &dev()).unwrap();
        let v = a.basic_view(4usize).unwrap();
        assert!(v.shares_storage(&a));
        assert_eq!(v.dims(), &[4]);
        a.update_data_inplace(&[9.0, 9.0, 9.0, 9.0]).unwrap();
        assert_eq!(v.to_f64_vec().unwrap(), vec![9.0, 9.0, 9.0, 9.0]);
    }

    #[test]
    fn test_basic_view_element_count_mismatch() {
        let a = CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0], (2, 2), DType::F64, &dev()).unwrap();
        assert!(a.basic_view((3usize, 2usize)).is_err());
    }

    #[test]
    fn test_to_device_cross_ordinal() {
        let a = CpuTensor::from_f64_slice(&[1.0, 2.0], 2, DType::F32, &dev()).unwrap();
        let b = a.to_device(&CpuDevice::new(1)).unwrap();
        assert_eq!(b.device(), &CpuDevice::new(1));
        assert_eq!(b.to_f64_vec().unwrap(), vec![1.0, 2.0]);
        // same-device move is an alias, not a copy
        let c = a.to_device(&dev()).unwrap();
        assert!(c.shares_storage(&a));
    }

    #[test]
    fn test_cast() {
        let a = CpuTensor::from_f64_slice(&[1.5, 2.5], 2, DType::F64, &dev()).unwrap();
        let b = a.to_dtype(DType::I64).unwrap();
        assert_eq!(b.dtype(), DType::I64);
        assert_eq!(b.to_f64_vec().unwrap(), vec![1.0, 2.0]);
    }
}
