use std::collections::HashMap;

use vole_core::{Backend, DType, Error, Result, Shape, Tensor};

use super::builder::OpExpr;

// Op registry — name → numeric implementation
//
// The interpreter resolves operator kinds by name against this closed
// registry; an unknown kind is a config error at operator-build time.
// Kernels receive the built expr (for attributes), the gathered input
// tensors on their native devices, and the device the operator is
// declared to execute on (only source kernels like `constant` need it).
//
// Kernel failures propagate unchanged; the executor adds no validation
// beyond output-arity matching.

/// A numeric operator implementation over local tensors.
pub type Kernel<B> =
    fn(&OpExpr, &[Tensor<B>], &<B as Backend>::Device) -> Result<Vec<Tensor<B>>>;

/// The closed set of operator kinds this interpreter can execute.
pub struct OpRegistry<B: Backend> {
    kernels: HashMap<&'static str, Kernel<B>>,
}

impl<B: Backend> OpRegistry<B> {
    /// Registry with the built-in operator set.
    pub fn with_builtin_ops() -> Self {
        let mut kernels: HashMap<&'static str, Kernel<B>> = HashMap::new();
        kernels.insert("add", binary_add);
        kernels.insert("sub", binary_sub);
        kernels.insert("mul", binary_mul);
        kernels.insert("div", binary_div);
        kernels.insert("matmul", matmul);
        kernels.insert("neg", unary_neg);
        kernels.insert("exp", unary_exp);
        kernels.insert("log", unary_log);
        kernels.insert("sqrt", unary_sqrt);
        kernels.insert("relu", unary_relu);
        kernels.insert("sigmoid", unary_sigmoid);
        kernels.insert("tanh", unary_tanh);
        kernels.insert("reduce_sum", reduce_sum);
        kernels.insert("reshape", reshape);
        kernels.insert("expand_dims", expand_dims);
        kernels.insert("cast", cast);
        kernels.insert("constant", constant);
        OpRegistry { kernels }
    }

    /// Register (or replace) a kernel under a kind name.
    pub fn register(&mut self, name: &'static str, kernel: Kernel<B>) {
        self.kernels.insert(name, kernel);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    /// Resolve a kind name to its kernel.
    pub fn get(&self, name: &str) -> Result<Kernel<B>> {
        self.kernels
            .get(name)
            .copied()
            .ok_or_else(|| Error::Config(format!("unregistered operator kind '{}'", name)))
    }
}

/// The restricted allow-list of shape-only operators eligible for the
/// zero-copy view path.
pub fn is_view_op(name: &str) -> bool {
    matches!(name, "reshape" | "expand_dims")
}

/// Pure output-shape inference for view-path operators.
pub fn infer_view_shape(expr: &OpExpr, input: &Shape) -> Result<Shape> {
    match expr.op_type_name() {
        "reshape" => {
            let spec = expr.require_attr("shape")?.as_shape().ok_or_else(|| {
                Error::Config("reshape attribute 'shape' must be a shape".into())
            })?;
            resolve_reshape_dims(spec, input.elem_count())
        }
        "expand_dims" => {
            let axis = expr.require_attr("axis")?.as_int().ok_or_else(|| {
                Error::Config("expand_dims attribute 'axis' must be an int".into())
            })?;
            let rank = input.rank() as i64;
            let axis = if axis < 0 { axis + rank + 1 } else { axis };
            if axis < 0 || axis > rank {
                return Err(Error::DimOutOfRange {
                    dim: axis.unsigned_abs() as usize,
                    rank: input.rank(),
                });
            }
            let mut dims = input.dims().to_vec();
            dims.insert(axis as usize, 1);
            Ok(Shape::new(dims))
        }
        other => Err(Error::Config(format!("'{}' is not a view operator", other))),
    }
}

/// Resolve a reshape target, allowing a single -1 wildcard dimension.
fn resolve_reshape_dims(spec: &[i64], elem_count: usize) -> Result<Shape> {
    let mut wildcard = None;
    let mut known: usize = 1;
    let mut dims = Vec::with_capacity(spec.len());
    for (i, &d) in spec.iter().enumerate() {
        if d == -1 {
            if wildcard.is_some() {
                return Err(Error::Config("reshape allows at most one -1 dim".into()));
            }
            wildcard = Some(i);
            dims.push(0);
        } else if d < 0 {
            return Err(Error::Config(format!("invalid reshape dimension {}", d)));
        } else {
            known *= d as usize;
            dims.push(d as usize);
        }
    }
    if let Some(i) = wildcard {
        if known == 0 || elem_count % known != 0 {
            return Err(Error::ElementCountMismatch {
                shape: Shape::new(dims.clone()),
                expected: elem_count,
                got: known,
            });
        }
        dims[i] = elem_count / known;
    }
    let shape = Shape::new(dims);
    if shape.elem_count() != elem_count {
        return Err(Error::ElementCountMismatch {
            expected: elem_count,
            got: shape.elem_count(),
            shape,
        });
    }
    Ok(shape)
}

// Kernels

fn want_arity<B: Backend>(expr: &OpExpr, inputs: &[Tensor<B>], n: usize) -> Result<()> {
    if inputs.len() != n {
        return Err(Error::msg(format!(
            "'{}' expects {} inputs, got {}",
            expr.op_type_name(),
            n,
            inputs.len()
        )));
    }
    Ok(())
}

macro_rules! binary_kernel {
    ($fn_name:ident, $method:ident) => {
        fn $fn_name<B: Backend>(
            expr: &OpExpr,
            inputs: &[Tensor<B>],
            _device: &B::Device,
        ) -> Result<Vec<Tensor<B>>> {
            want_arity(expr, inputs, 2)?;
            Ok(vec![inputs[0].$method(&inputs[1])?])
        }
    };
}

macro_rules! unary_kernel {
    ($fn_name:ident, $method:ident) => {
        fn $fn_name<B: Backend>(
            expr: &OpExpr,
            inputs: &[Tensor<B>],
            _device: &B::Device,
        ) -> Result<Vec<Tensor<B>>> {
            want_arity(expr, inputs, 1)?;
            Ok(vec![inputs[0].$method()?])
        }
    };
}

binary_kernel!(binary_add, add);
binary_kernel!(binary_sub, sub);
binary_kernel!(binary_mul, mul);
binary_kernel!(binary_div, div);
binary_kernel!(matmul, matmul);

unary_kernel!(unary_neg, neg);
unary_kernel!(unary_exp, exp);
unary_kernel!(unary_log, log);
unary_kernel!(unary_sqrt, sqrt);
unary_kernel!(unary_relu, relu);
unary_kernel!(unary_sigmoid, sigmoid);
unary_kernel!(unary_tanh, tanh);

fn reduce_sum<B: Backend>(
    expr: &OpExpr,
    inputs: &[Tensor<B>],
    _device: &B::Device,
) -> Result<Vec<Tensor<B>>> {
    want_arity(expr, inputs, 1)?;
    let input = &inputs[0];
    let dims: Vec<usize> = match expr.attr("axis") {
        Some(attr) => attr
            .as_ints()
            .ok_or_else(|| Error::Config("reduce_sum attribute 'axis' must be ints".into()))?
            .iter()
            .map(|&a| {
                let rank = input.rank() as i64;
                let a = if a < 0 { a + rank } else { a };
                a as usize
            })
            .collect(),
        None => Vec::new(),
    };
    let keep_dim = expr.attr("keepdims").and_then(|a| a.as_bool()).unwrap_or(false);
    Ok(vec![input.sum(&dims, keep_dim)?])
}

fn reshape<B: Backend>(
    expr: &OpExpr,
    inputs: &[Tensor<B>],
    _device: &B::Device,
) -> Result<Vec<Tensor<B>>> {
    want_arity(expr, inputs, 1)?;
    let shape = infer_view_shape(expr, inputs[0].shape())?;
    Ok(vec![inputs[0].reshape(shape)?])
}

fn expand_dims<B: Backend>(
    expr: &OpExpr,
    inputs: &[Tensor<B>],
    _device: &B::Device,
) -> Result<Vec<Tensor<B>>> {
    want_arity(expr, inputs, 1)?;
    let shape = infer_view_shape(expr, inputs[0].shape())?;
    Ok(vec![inputs[0].reshape(shape)?])
}

fn cast<B: Backend>(
    expr: &OpExpr,
    inputs: &[Tensor<B>],
    _device: &B::Device,
) -> Result<Vec<Tensor<B>>> {
    want_arity(expr, inputs, 1)?;
    let dtype: DType = expr
        .require_attr("dtype")?
        .as_str()
        .ok_or_else(|| Error::Config("cast attribute 'dtype' must be a string".into()))?
        .parse()?;
    Ok(vec![inputs[0].to_dtype(dtype)?])
}

fn constant<B: Backend>(
    expr: &OpExpr,
    inputs: &[Tensor<B>],
    device: &B::Device,
) -> Result<Vec<Tensor<B>>> {
    want_arity(expr, inputs, 0)?;
    let value = expr
        .require_attr("value")?
        .as_float()
        .ok_or_else(|| Error::Config("constant attribute 'value' must be a float".into()))?;
    let dims = expr
        .require_attr("shape")?
        .as_shape()
        .ok_or_else(|| Error::Config("constant attribute 'shape' must be a shape".into()))?;
    if dims.iter().any(|&d| d < 0) {
        return Err(Error::Config("constant shape must be non-negative".into()));
    }
    let shape = Shape::new(dims.iter().map(|&d| d as usize).collect());
    let dtype: DType = match expr.attr("dtype") {
        Some(attr) => attr
            .as_str()
            .ok_or_else(|| Error::Config("constant attribute 'dtype' must be a string".into()))?
            .parse()?,
        None => DType::F32,
    };
    Ok(vec![Tensor::full(shape, value, dtype, device)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_reshape_dims() {
        assert_eq!(resolve_reshape_dims(&[2, 3], 6).unwrap().dims(), &[2, 3]);
        assert_eq!(resolve_reshape_dims(&[-1, 3], 6).unwrap().dims(), &[2, 3]);
        assert_eq!(resolve_reshape_dims(&[-1], 6).unwrap().dims(), &[6]);
        assert!(resolve_reshape_dims(&[4, 3], 6).is_err());
        assert!(resolve_reshape_dims(&[-1, -1], 6).is_err());
        assert!(resolve_reshape_dims(&[-1, 4], 6).is_err());
    }

    #[test]
    fn test_view_allow_list() {
        assert!(is_view_op("reshape"));
        assert!(is_view_op("expand_dims"));
        assert!(!is_view_op("add"));
        assert!(!is_view_op("transpose"));
    }
}
