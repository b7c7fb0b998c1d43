use std::fmt;
use std::hash::{Hash, Hasher};

use crate::backend::{Backend, BackendDevice};
use crate::error::{Error, Result};
use crate::shape::Shape;

// DeviceMesh — the fixed device set a global tensor is defined over
//
// A mesh is an ordered list of devices arranged in an n-dimensional
// hierarchy (a 1-D mesh of 4 devices has hierarchy [4]; a 2x2 mesh has
// hierarchy [2, 2]). Distribution signatures name one SbpParallel per
// hierarchy axis. Rank order is row-major over the hierarchy.
//
// Meshes compare by value (device list + hierarchy): boxing never moves
// data between different meshes, it only changes how data is split across
// one mesh, so mesh equality is the gate every global operator input must
// pass.

/// The fixed set of devices a global tensor's distribution is defined over.
pub struct DeviceMesh<B: Backend> {
    devices: Vec<B::Device>,
    hierarchy: Shape,
}

impl<B: Backend> DeviceMesh<B> {
    /// Create a mesh from an ordered device list and a hierarchy whose
    /// element count must equal the device count.
    pub fn new(devices: Vec<B::Device>, hierarchy: impl Into<Shape>) -> Result<Self> {
        let hierarchy = hierarchy.into();
        if devices.is_empty() {
            return Err(Error::Placement("device mesh has no devices".into()));
        }
        if hierarchy.rank() == 0 || hierarchy.elem_count() != devices.len() {
            return Err(Error::Placement(format!(
                "mesh hierarchy {} does not cover {} devices",
                hierarchy,
                devices.len()
            )));
        }
        Ok(DeviceMesh { devices, hierarchy })
    }

    /// A flat 1-D mesh over the given devices.
    pub fn flat(devices: Vec<B::Device>) -> Result<Self> {
        let n = devices.len();
        Self::new(devices, n)
    }

    /// Number of ranks (devices) in the mesh.
    pub fn num_ranks(&self) -> usize {
        self.devices.len()
    }

    /// The device holding the given rank.
    pub fn device(&self, rank: usize) -> &B::Device {
        &self.devices[rank]
    }

    /// All devices in rank order.
    pub fn devices(&self) -> &[B::Device] {
        &self.devices
    }

    /// The mesh hierarchy (one entry per axis).
    pub fn hierarchy(&self) -> &Shape {
        &self.hierarchy
    }

    /// Number of hierarchy axes.
    pub fn num_axes(&self) -> usize {
        self.hierarchy.rank()
    }

    /// Whether the mesh consists of a single device.
    pub fn is_single_device(&self) -> bool {
        self.devices.len() == 1
    }

    /// The ranks that form the group containing `rank` along `axis`:
    /// ranks whose hierarchy coordinates agree everywhere except `axis`,
    /// in increasing axis-coordinate order.
    pub fn axis_group(&self, axis: usize, rank: usize) -> Vec<usize> {
        let len = self.hierarchy.dims()[axis];
        let stride: usize = self.hierarchy.dims()[axis + 1..].iter().product();
        let coord = (rank / stride) % len;
        let base = rank - coord * stride;
        (0..len).map(|j| base + j * stride).collect()
    }

    /// All axis groups along `axis`, each in increasing coordinate order.
    pub fn axis_groups(&self, axis: usize) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.num_ranks()];
        let mut groups = Vec::new();
        for rank in 0..self.num_ranks() {
            if seen[rank] {
                continue;
            }
            let group = self.axis_group(axis, rank);
            for &r in &group {
                seen[r] = true;
            }
            groups.push(group);
        }
        groups
    }
}

impl<B: Backend> Clone for DeviceMesh<B> {
    fn clone(&self) -> Self {
        DeviceMesh {
            devices: self.devices.clone(),
            hierarchy: self.hierarchy.clone(),
        }
    }
}

impl<B: Backend> PartialEq for DeviceMesh<B> {
    fn eq(&self, other: &Self) -> bool {
        self.devices == other.devices && self.hierarchy == other.hierarchy
    }
}

impl<B: Backend> Eq for DeviceMesh<B> {}

impl<B: Backend> Hash for DeviceMesh<B> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.devices.hash(state);
        self.hierarchy.hash(state);
    }
}

impl<B: Backend> fmt::Debug for DeviceMesh<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceMesh({} @ [", self.hierarchy)?;
        for (i, d) in self.devices.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d.name())?;
        }
        write!(f, "])")
    }
}

/// Balanced partition of `total` elements into `parts`: the first
/// `total % parts` parts get one extra element. Returns (start, len)
/// for part `idx`.
pub fn balanced_range(total: usize, parts: usize, idx: usize) -> (usize, usize) {
    let base = total / parts;
    let rem = total % parts;
    let len = base + usize::from(idx < rem);
    let start = idx * base + idx.min(rem);
    (start, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_range() {
        // 10 elements over 4 parts: 3, 3, 2, 2
        assert_eq!(balanced_range(10, 4, 0), (0, 3));
        assert_eq!(balanced_range(10, 4, 1), (3, 3));
        assert_eq!(balanced_range(10, 4, 2), (6, 2));
        assert_eq!(balanced_range(10, 4, 3), (8, 2));
        // even split
        assert_eq!(balanced_range(8, 2, 1), (4, 4));
        // fewer elements than parts
        assert_eq!(balanced_range(1, 3, 0), (0, 1));
        assert_eq!(balanced_range(1, 3, 2), (1, 0));
    }
}
