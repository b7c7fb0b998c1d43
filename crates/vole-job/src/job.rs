use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use vole_core::SbpSignature;

use crate::conf::{
    IdentityConf, LearningRateScheduleConf, OperatorConf, OpTypeConf, OutputConf, UserOpConf,
};

// Job — the complete graph description handed to the interpreter
//
// The net's declared operator order is trusted to be topologically valid;
// the interpreter performs no reordering and no independent validation
// beyond the name-resolution errors a misordered net naturally produces.

/// Devices an operator (and its global tensors) executes on: a device tag,
/// the device ordinals under that tag, and an optional mesh hierarchy
/// (defaults to flat).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelConf {
    pub device_tag: String,
    pub device_ids: Vec<usize>,
    #[serde(default)]
    pub hierarchy: Option<Vec<usize>>,
}

/// Assigns one ParallelConf to a group of operator names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementGroup {
    pub op_names: Vec<String>,
    pub parallel_conf: ParallelConf,
}

/// A complete job: operator net, placement, per-operator distribution
/// signatures, and the variable/input op names used to seed an execution
/// environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub net: Vec<OperatorConf>,
    #[serde(default)]
    pub placement: Vec<PlacementGroup>,
    /// Operator name to its required distribution signature map.
    #[serde(default)]
    pub parallel_view: BTreeMap<String, SbpSignature>,
    /// Variable op names; the caller supplies one tensor per name, seeded
    /// into the environment as "<name>/out".
    #[serde(default)]
    pub variable_ops: Vec<String>,
    /// Graph-input op names; the caller supplies tensors positionally,
    /// seeded as "<name>/out".
    #[serde(default)]
    pub input_ops: Vec<String>,
}

impl Job {
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder::new(name)
    }
}

/// Fluent construction of jobs, mostly for tests and examples.
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        JobBuilder {
            job: Job {
                name: name.into(),
                net: Vec::new(),
                placement: Vec::new(),
                parallel_view: BTreeMap::new(),
                variable_ops: Vec::new(),
                input_ops: Vec::new(),
            },
        }
    }

    /// Declare a graph input op; its tensor is supplied positionally at
    /// run time and lands in the environment as "<name>/out".
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.job.input_ops.push(name.into());
        self
    }

    /// Declare a variable op; its tensor is supplied by name at run time.
    pub fn variable(mut self, name: impl Into<String>) -> Self {
        self.job.variable_ops.push(name.into());
        self
    }

    /// Append a user operator with a single output binding "out".
    ///
    /// `inputs` are (binding name, tensor names); the output tensor name
    /// becomes "<op-name>/out_0".
    pub fn user_op(
        mut self,
        name: &str,
        op_type_name: &str,
        inputs: Vec<(String, Vec<String>)>,
    ) -> Self {
        let out_name = format!("{}/out_0", name);
        self.job.net.push(OperatorConf {
            name: name.to_string(),
            device_tag: "cpu:0".to_string(),
            conf: OpTypeConf::User(UserOpConf {
                op_type_name: op_type_name.to_string(),
                attrs: BTreeMap::new(),
                inputs,
                outputs: vec![("out".to_string(), vec![out_name])],
            }),
        });
        self
    }

    /// Append a fully-specified operator.
    pub fn op(mut self, conf: OperatorConf) -> Self {
        self.job.net.push(conf);
        self
    }

    /// Append an identity op aliasing `input` as "<name>/out".
    pub fn identity(mut self, name: &str, input: &str) -> Self {
        self.job.net.push(OperatorConf {
            name: name.to_string(),
            device_tag: "cpu:0".to_string(),
            conf: OpTypeConf::Identity(IdentityConf {
                input: input.to_string(),
                out: "out".to_string(),
            }),
        });
        self
    }

    /// Append an output op returning `input`.
    pub fn output(mut self, name: &str, input: &str) -> Self {
        self.job.net.push(OperatorConf {
            name: name.to_string(),
            device_tag: "cpu:0".to_string(),
            conf: OpTypeConf::Output(OutputConf {
                input: input.to_string(),
            }),
        });
        self
    }

    /// Append a constant learning-rate schedule op.
    pub fn learning_rate(mut self, name: &str, rate: f64) -> Self {
        self.job.net.push(OperatorConf {
            name: name.to_string(),
            device_tag: "cpu:0".to_string(),
            conf: OpTypeConf::LearningRateSchedule(LearningRateScheduleConf {
                learning_rate: rate,
                out: "out".to_string(),
                decay: None,
            }),
        });
        self
    }

    /// Place a set of operators on a device group.
    pub fn placement(
        mut self,
        op_names: Vec<String>,
        device_tag: &str,
        device_ids: Vec<usize>,
    ) -> Self {
        self.job.placement.push(PlacementGroup {
            op_names,
            parallel_conf: ParallelConf {
                device_tag: device_tag.to_string(),
                device_ids,
                hierarchy: None,
            },
        });
        self
    }

    /// Record the distribution signature an operator requires.
    pub fn signature(mut self, op_name: &str, signature: SbpSignature) -> Self {
        self.job.parallel_view.insert(op_name.to_string(), signature);
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_shapes_a_job() {
        let job = Job::builder("two_plus_three")
            .input("a")
            .input("b")
            .user_op(
                "add0",
                "add",
                vec![("x".to_string(), vec!["a/out".to_string(), "b/out".to_string()])],
            )
            .output("out0", "add0/out_0")
            .build();
        assert_eq!(job.net.len(), 2);
        assert_eq!(job.input_ops, vec!["a", "b"]);
        assert!(job.net[0].user_conf().is_some());
        assert!(job.net[1].user_conf().is_none());
    }
}
