use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// Operator configurations
//
// One OperatorConf per graph node, in declared (already topological)
// order. The payload is a closed tagged union: the interpreter dispatches
// with an exhaustive match, so adding a kind is a compile-time checklist
// rather than a chain of `has_*_conf()` probes.

/// A single attribute value on a user operator. Attributes are copied
/// verbatim from the configuration into the built operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Ints(Vec<i64>),
    Shape(Vec<i64>),
}

impl AttrValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            AttrValue::Ints(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_shape(&self) -> Option<&[i64]> {
        match self {
            AttrValue::Shape(v) => Some(v),
            _ => None,
        }
    }
}

/// Configuration of a user (kernel-backed) operator.
///
/// `inputs` and `outputs` are ordered named bindings; each binding name
/// maps to the tensor names (`"<producer>/<bn>"`) feeding or fed by it.
/// An input bound to k tensors becomes k positional sub-bindings
/// `name_0 .. name_{k-1}` when the operator is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserOpConf {
    pub op_type_name: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
    #[serde(default)]
    pub inputs: Vec<(String, Vec<String>)>,
    pub outputs: Vec<(String, Vec<String>)>,
}

/// Aliases an existing environment name under a new name, without copying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityConf {
    /// The tensor name to alias (e.g. "producer/out_0").
    pub input: String,
    /// Output binding name; the alias lands at "<op-name>/<out>".
    pub out: String,
}

/// Captures a tensor as one of the graph's return values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConf {
    /// The tensor name to return (e.g. "loss/out_0").
    pub input: String,
}

/// Learning-rate schedule configuration.
///
/// Only the non-decaying constant rate is executable; any decay policy
/// present must be rejected by the interpreter rather than approximated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRateScheduleConf {
    pub learning_rate: f64,
    pub out: String,
    #[serde(default)]
    pub decay: Option<LearningRateDecayConf>,
}

/// A decay policy. Carried through deserialization so the interpreter can
/// name it in the rejection error, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRateDecayConf {
    pub policy: String,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

/// The closed set of operator payloads this interpreter understands.
/// `Other` carries the original kind name for kinds handled by execution
/// backends outside this interpreter; they are skipped, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpTypeConf {
    User(UserOpConf),
    Identity(IdentityConf),
    Output(OutputConf),
    LearningRateSchedule(LearningRateScheduleConf),
    Other(String),
}

/// One operator of the job's net: a name, the device tag it executes on,
/// and its typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConf {
    pub name: String,
    pub device_tag: String,
    pub conf: OpTypeConf,
}

impl OperatorConf {
    /// The user payload, if this is a user operator.
    pub fn user_conf(&self) -> Option<&UserOpConf> {
        match &self.conf {
            OpTypeConf::User(c) => Some(c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_accessors() {
        assert_eq!(AttrValue::Int(3).as_int(), Some(3));
        assert_eq!(AttrValue::Int(3).as_float(), None);
        assert_eq!(AttrValue::Shape(vec![2, -1]).as_shape(), Some(&[2, -1][..]));
    }

    #[test]
    fn test_operator_conf_deserializes_from_persisted_form() {
        // The persistence layer is external; this just pins down that a
        // structured description round-trips into the tagged union.
        let text = r#"{
            "name": "add0",
            "device_tag": "cpu:0",
            "conf": {
                "User": {
                    "op_type_name": "add",
                    "attrs": {},
                    "inputs": [["x", ["a/out", "b/out"]]],
                    "outputs": [["out", ["add0/out_0"]]]
                }
            }
        }"#;
        let conf: OperatorConf = serde_json::from_str(text).unwrap();
        assert_eq!(conf.name, "add0");
        let user = conf.user_conf().unwrap();
        assert_eq!(user.op_type_name, "add");
        assert_eq!(user.inputs[0].1.len(), 2);
    }
}
