use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// SBP — per-mesh-axis distribution signatures
//
// A global tensor's data is laid out across a device mesh according to one
// SbpParallel per mesh axis:
//
//   Split(d)   — the logical dimension d is partitioned across the axis
//   Broadcast  — every device on the axis holds the full data
//   PartialSum — every device holds an addend; the logical value is the sum
//
// Two signatures being unequal is what triggers boxing. The signature maps
// here are the declared, per-operator requirements that arrive with the job
// description; serde derives let that description be carried by whatever
// persistence layer sits outside this crate.

/// How a global tensor is distributed along one mesh axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SbpParallel {
    /// Partitioned along logical dimension `.0` of the tensor.
    Split(usize),
    /// Fully replicated.
    Broadcast,
    /// Element-wise partial sum; devices hold addends of the logical value.
    PartialSum,
}

impl fmt::Display for SbpParallel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SbpParallel::Split(d) => write!(f, "S({})", d),
            SbpParallel::Broadcast => write!(f, "B"),
            SbpParallel::PartialSum => write!(f, "P"),
        }
    }
}

/// The full distribution signature of a global tensor: one [`SbpParallel`]
/// per mesh axis, in axis order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NdSbp(Vec<SbpParallel>);

impl NdSbp {
    pub fn new(axes: Vec<SbpParallel>) -> Self {
        NdSbp(axes)
    }

    /// Signature for a 1-D mesh.
    pub fn single(sbp: SbpParallel) -> Self {
        NdSbp(vec![sbp])
    }

    pub fn axes(&self) -> &[SbpParallel] {
        &self.0
    }

    pub fn num_axes(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for NdSbp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, sbp) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", sbp)?;
        }
        write!(f, ")")
    }
}

impl From<SbpParallel> for NdSbp {
    fn from(sbp: SbpParallel) -> Self {
        NdSbp::single(sbp)
    }
}

/// Per-operator signature map: input/output binding name (`"x_0"`,
/// `"out_0"`, …) to the distribution the operator requires there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SbpSignature {
    bn_to_nd_sbp: BTreeMap<String, NdSbp>,
}

impl SbpSignature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the signature required for a binding name.
    pub fn set(mut self, bn: impl Into<String>, nd_sbp: impl Into<NdSbp>) -> Self {
        self.bn_to_nd_sbp.insert(bn.into(), nd_sbp.into());
        self
    }

    /// Look up the signature for a binding name.
    pub fn get(&self, bn: &str) -> crate::Result<&NdSbp> {
        self.bn_to_nd_sbp.get(bn).ok_or_else(|| {
            crate::Error::Config(format!("no distribution signature for binding '{}'", bn))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let sig = NdSbp::new(vec![SbpParallel::Split(0), SbpParallel::Broadcast]);
        assert_eq!(sig.to_string(), "(S(0), B)");
        assert_eq!(NdSbp::single(SbpParallel::PartialSum).to_string(), "(P)");
    }

    #[test]
    fn test_signature_lookup() {
        let sig = SbpSignature::new()
            .set("x_0", SbpParallel::Broadcast)
            .set("out_0", SbpParallel::Split(1));
        assert_eq!(sig.get("x_0").unwrap(), &NdSbp::single(SbpParallel::Broadcast));
        assert!(sig.get("y_0").is_err());
    }
}
