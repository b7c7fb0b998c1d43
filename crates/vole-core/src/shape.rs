use std::fmt;

// Shape — n-dimensional extent of a tensor
//
// The shape determines how many elements a tensor holds (product of dims),
// the default row-major strides, and whether two tensors are compatible
// under broadcasting. For distributed tensors it additionally describes
// the *logical* extent: the extent a consumer observes regardless of how
// the data is sharded across a device mesh.

/// N-dimensional shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions (0 for scalar).
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements. A scalar shape `[]` has 1 element;
    /// a shape containing a zero dimension has 0.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product()
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> crate::Result<usize> {
        self.0.get(d).copied().ok_or(crate::Error::DimOutOfRange {
            dim: d,
            rank: self.rank(),
        })
    }

    /// Compute the contiguous (row-major) strides for this shape.
    ///
    /// For shape [2, 3, 4] the strides are [12, 4, 1]: the last dimension
    /// is contiguous in memory and each earlier dimension jumps by the
    /// product of the dimensions after it.
    pub fn stride_contiguous(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.rank()];
        if self.rank() > 0 {
            strides[self.rank() - 1] = 1;
            for i in (0..self.rank() - 1).rev() {
                strides[i] = strides[i + 1] * self.0[i + 1];
            }
        }
        strides
    }

    /// Compute the broadcast output shape of two input shapes.
    ///
    /// NumPy rules: align from the right; dims are compatible when equal
    /// or when one of them is 1; missing leading dims are treated as 1.
    pub fn broadcast_shape(lhs: &Shape, rhs: &Shape) -> crate::Result<Shape> {
        let l = lhs.dims();
        let r = rhs.dims();
        let max_rank = l.len().max(r.len());
        let mut result = Vec::with_capacity(max_rank);

        for i in 0..max_rank {
            let ld = if i < l.len() { l[l.len() - 1 - i] } else { 1 };
            let rd = if i < r.len() { r[r.len() - 1 - i] } else { 1 };
            if ld == rd {
                result.push(ld);
            } else if ld == 1 {
                result.push(rd);
            } else if rd == 1 {
                result.push(ld);
            } else {
                return Err(crate::Error::msg(format!(
                    "shapes {} and {} are not broadcast-compatible",
                    lhs, rhs
                )));
            }
        }

        result.reverse();
        Ok(Shape::new(result))
    }

    /// Strides that make a contiguous tensor of this shape read as `target`.
    ///
    /// Dimensions of size 1 (and missing leading dimensions) get stride 0,
    /// repeating the single element across the broadcast extent.
    pub fn broadcast_strides(&self, target: &Shape) -> Vec<usize> {
        let self_dims = self.dims();
        let target_dims = target.dims();
        let self_strides = self.stride_contiguous();

        let mut result = vec![0usize; target_dims.len()];
        let offset = target_dims.len() - self_dims.len();
        for i in 0..self_dims.len() {
            if self_dims[i] == target_dims[i + offset] {
                result[i + offset] = self_strides[i];
            }
        }
        result
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<()> for Shape {
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize,)> for Shape {
    fn from((d0,): (usize,)) -> Self {
        Shape(vec![d0])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elem_count() {
        assert_eq!(Shape::from(()).elem_count(), 1);
        assert_eq!(Shape::from((3, 4)).elem_count(), 12);
        assert_eq!(Shape::new(vec![2, 0, 3]).elem_count(), 0);
    }

    #[test]
    fn test_contiguous_strides() {
        assert_eq!(Shape::from((2, 3, 4)).stride_contiguous(), vec![12, 4, 1]);
        assert_eq!(Shape::from(()).stride_contiguous(), Vec::<usize>::new());
    }

    #[test]
    fn test_broadcast_shape() {
        let out = Shape::broadcast_shape(&Shape::from((3, 1)), &Shape::from((1, 4))).unwrap();
        assert_eq!(out.dims(), &[3, 4]);
        let out = Shape::broadcast_shape(&Shape::from((2, 3)), &Shape::from(3usize)).unwrap();
        assert_eq!(out.dims(), &[2, 3]);
        assert!(Shape::broadcast_shape(&Shape::from(3usize), &Shape::from(4usize)).is_err());
    }

    #[test]
    fn test_broadcast_strides() {
        let s = Shape::from((3, 1));
        let target = Shape::from((3, 4));
        assert_eq!(s.broadcast_strides(&target), vec![1, 0]);
    }
}
