use std::sync::Arc;

use vole_core::mesh::balanced_range;
use vole_core::{
    Backend, DeviceMesh, Error, GlobalTensor, NdSbp, Result, SbpParallel, Shape, Tensor,
};

// BoxingPlan — a validated, reusable redistribution recipe
//
// A plan is one per-axis step for every mesh axis whose signature entry
// differs between source and target. Applying a step touches only the
// ranks of that axis' groups; with row-major rank order, a group is the
// set of ranks that agree on every other axis coordinate.
//
// Each step preserves the logical value:
//
//   S(d) -> B   all-gather: concatenate the group's shards along d
//   P    -> B   all-reduce: sum the group's shards element-wise
//   B    -> S(d) local slice: each rank keeps its balanced range of d
//   S(a) -> S(b) re-split: gather along a, slice along b
//   P    -> S(d) reduce then slice
//   B    -> P   first rank keeps the value, the rest hold zeros
//   S(d) -> P   gather, then first rank keeps the value
//
// Only participant devices (the ranks a group names) take part in a
// step's data movement; the mesh's rank set is exactly the participant
// set, so group iteration is the participation guard.

/// One per-axis redistribution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AxisStep {
    axis: usize,
    src: SbpParallel,
    dst: SbpParallel,
}

impl AxisStep {
    fn route_name(&self) -> &'static str {
        match (self.src, self.dst) {
            (SbpParallel::Split(_), SbpParallel::Broadcast) => "all-gather",
            (SbpParallel::PartialSum, SbpParallel::Broadcast) => "all-reduce-sum",
            (SbpParallel::Broadcast, SbpParallel::Split(_)) => "local-slice",
            (SbpParallel::Split(_), SbpParallel::Split(_)) => "re-split",
            (SbpParallel::PartialSum, SbpParallel::Split(_)) => "reduce-scatter",
            (SbpParallel::Broadcast, SbpParallel::PartialSum) => "broadcast-to-partial",
            (SbpParallel::Split(_), SbpParallel::PartialSum) => "gather-to-partial",
            _ => "identity",
        }
    }
}

/// A memoizable transform from one distribution signature to another on a
/// fixed mesh, for a fixed logical shape. Pure: applying it never mutates
/// the input tensor, and applying it twice gives equal results.
#[derive(Debug)]
pub struct BoxingPlan {
    steps: Vec<AxisStep>,
    route: String,
}

impl BoxingPlan {
    /// Build a plan from `src` to `dst` over a mesh with the given
    /// hierarchy. Fails with a boxing error when the signatures cannot be
    /// reconciled (axis arity mismatch, split of a nonexistent dimension).
    pub fn plan(src: &NdSbp, dst: &NdSbp, hierarchy: &Shape, logical: &Shape) -> Result<Self> {
        let boxing_err = |detail: String| Error::Boxing {
            src: src.to_string(),
            dst: dst.to_string(),
            detail,
        };
        if src.num_axes() != hierarchy.rank() || dst.num_axes() != hierarchy.rank() {
            return Err(boxing_err(format!(
                "signatures must cover {} mesh axes",
                hierarchy.rank()
            )));
        }
        for sbp in src.axes().iter().chain(dst.axes()) {
            if let SbpParallel::Split(d) = sbp {
                if *d >= logical.rank() {
                    return Err(boxing_err(format!(
                        "split dimension {} out of range for shape {}",
                        d, logical
                    )));
                }
            }
        }
        let steps: Vec<AxisStep> = src
            .axes()
            .iter()
            .zip(dst.axes())
            .enumerate()
            .filter(|(_, (s, d))| s != d)
            .map(|(axis, (s, d))| AxisStep {
                axis,
                src: *s,
                dst: *d,
            })
            .collect();
        let route = steps
            .iter()
            .map(AxisStep::route_name)
            .collect::<Vec<_>>()
            .join("+");
        Ok(BoxingPlan { steps, route })
    }

    /// Human-readable route description, used by the boxing trace.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Apply the plan to a global tensor, producing a new global tensor
    /// with the target signature and the same logical value.
    pub fn apply<B: Backend>(&self, input: &GlobalTensor<B>, dst: &NdSbp) -> Result<GlobalTensor<B>> {
        let mesh = Arc::clone(input.mesh());
        let mut vals: Vec<Tensor<B>> = input.shards().to_vec();
        for step in &self.steps {
            for group in mesh.axis_groups(step.axis) {
                apply_axis_step(&mut vals, &group, &mesh, step)?;
            }
        }
        GlobalTensor::from_shards(vals, mesh, dst.clone())
    }
}

fn apply_axis_step<B: Backend>(
    vals: &mut [Tensor<B>],
    group: &[usize],
    mesh: &DeviceMesh<B>,
    step: &AxisStep,
) -> Result<()> {
    let home = mesh.device(group[0]);
    match (step.src, step.dst) {
        (SbpParallel::Split(d), SbpParallel::Broadcast) => {
            let full = gather_group(vals, group, d, home)?;
            for &r in group {
                vals[r] = full.to_device(mesh.device(r))?;
            }
        }
        (SbpParallel::PartialSum, SbpParallel::Broadcast) => {
            let full = reduce_group(vals, group, home)?;
            for &r in group {
                vals[r] = full.to_device(mesh.device(r))?;
            }
        }
        (SbpParallel::Broadcast, SbpParallel::Split(d)) => {
            slice_group(vals, group, d)?;
        }
        (SbpParallel::Split(a), SbpParallel::Split(b)) => {
            let full = gather_group(vals, group, a, home)?;
            for &r in group {
                vals[r] = full.to_device(mesh.device(r))?;
            }
            slice_group(vals, group, b)?;
        }
        (SbpParallel::PartialSum, SbpParallel::Split(d)) => {
            let full = reduce_group(vals, group, home)?;
            for &r in group {
                vals[r] = full.to_device(mesh.device(r))?;
            }
            slice_group(vals, group, d)?;
        }
        (SbpParallel::Broadcast, SbpParallel::PartialSum) => {
            for &r in &group[1..] {
                vals[r] = Tensor::zeros_like(&vals[r])?;
            }
        }
        (SbpParallel::Split(d), SbpParallel::PartialSum) => {
            let full = gather_group(vals, group, d, home)?;
            vals[group[0]] = full.to_device(home)?;
            for &r in &group[1..] {
                vals[r] = Tensor::zeros(
                    full.shape().clone(),
                    full.dtype(),
                    mesh.device(r),
                )?;
            }
        }
        // Equal pairs never become steps.
        (src, dst) if src == dst => {}
        _ => unreachable!("all signature pairs are covered"),
    }
    Ok(())
}

/// Concatenate a group's shards along `dim` on the group's first device.
fn gather_group<B: Backend>(
    vals: &[Tensor<B>],
    group: &[usize],
    dim: usize,
    home: &B::Device,
) -> Result<Tensor<B>> {
    let parts: Vec<Tensor<B>> = group
        .iter()
        .map(|&r| vals[r].to_device(home))
        .collect::<Result<Vec<_>>>()?;
    Tensor::cat(&parts, dim)
}

/// Sum a group's shards element-wise on the group's first device.
fn reduce_group<B: Backend>(
    vals: &[Tensor<B>],
    group: &[usize],
    home: &B::Device,
) -> Result<Tensor<B>> {
    let mut acc = vals[group[0]].to_device(home)?;
    for &r in &group[1..] {
        acc = acc.add(&vals[r].to_device(home)?)?;
    }
    Ok(acc)
}

/// Each rank of a group keeps its balanced slice of dimension `dim`.
fn slice_group<B: Backend>(vals: &mut [Tensor<B>], group: &[usize], dim: usize) -> Result<()> {
    for (j, &r) in group.iter().enumerate() {
        let total = vals[r].shape().dim(dim)?;
        let (start, len) = balanced_range(total, group.len(), j);
        vals[r] = vals[r].narrow(dim, start, len)?.contiguous()?;
    }
    Ok(())
}
