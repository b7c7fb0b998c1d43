use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use vole_core::{Backend, Error, Result, Shape};
use vole_job::{AttrValue, OperatorConf, OpTypeConf, TICK_INPUT_NAME};

use super::ops::OpRegistry;

// OpExpr — an executable operator handle built from one configuration
//
// Built at most once per operator position of a job (the session caches
// the table); attributes are copied verbatim and each named input binding
// expands into one positional sub-binding per physical tensor:
// an input "x" bound to 3 tensors contributes "x_0", "x_1", "x_2".
// The scheduling-only tick input is skipped entirely; it never carries
// data and never becomes a sub-binding.

/// An executable operator: resolved kind, attributes, positional
/// sub-bindings, and output names, plus the view-path shape cache.
#[derive(Debug)]
pub struct OpExpr {
    op_type_name: String,
    attrs: BTreeMap<String, AttrValue>,
    /// Positional input sub-binding names ("x_0", "x_1", …), in the
    /// gather order of the configuration's input bindings.
    input_bns: Vec<String>,
    /// Positional output binding names ("out_0", …).
    output_bns: Vec<String>,
    /// Flattened output tensor names (the environment keys written).
    output_names: Vec<String>,
    /// Memoized shape inference for the view path, keyed by input device
    /// and shapes (attributes are fixed per expr).
    infer_cache: Mutex<HashMap<InferKey, Shape>>,
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct InferKey {
    device: String,
    shapes: Vec<Shape>,
}

impl OpExpr {
    /// Build an operator handle from a user-operator configuration.
    ///
    /// Fails when the configuration carries no user payload or names an
    /// operator kind the registry does not know.
    pub fn from_conf<B: Backend>(conf: &OperatorConf, registry: &OpRegistry<B>) -> Result<OpExpr> {
        let user = match &conf.conf {
            OpTypeConf::User(user) => user,
            other => {
                return Err(Error::Config(format!(
                    "operator '{}' has no user payload (found {} variant)",
                    conf.name,
                    variant_name(other)
                )))
            }
        };
        if !registry.contains(&user.op_type_name) {
            return Err(Error::Config(format!(
                "unregistered operator kind '{}'",
                user.op_type_name
            )));
        }
        let mut input_bns = Vec::new();
        for (ibn, names) in &user.inputs {
            if ibn == TICK_INPUT_NAME {
                continue;
            }
            for i in 0..names.len() {
                input_bns.push(format!("{}_{}", ibn, i));
            }
        }
        let mut output_bns = Vec::new();
        let mut output_names = Vec::new();
        for (obn, names) in &user.outputs {
            for (i, name) in names.iter().enumerate() {
                output_bns.push(format!("{}_{}", obn, i));
                output_names.push(name.clone());
            }
        }
        Ok(OpExpr {
            op_type_name: user.op_type_name.clone(),
            attrs: user.attrs.clone(),
            input_bns,
            output_bns,
            output_names,
            infer_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn op_type_name(&self) -> &str {
        &self.op_type_name
    }

    pub fn input_bns(&self) -> &[String] {
        &self.input_bns
    }

    pub fn output_bns(&self) -> &[String] {
        &self.output_bns
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// An attribute by name, if present.
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    /// An attribute the operator cannot run without.
    pub fn require_attr(&self, name: &str) -> Result<&AttrValue> {
        self.attrs.get(name).ok_or_else(|| {
            Error::Config(format!(
                "operator kind '{}' requires attribute '{}'",
                self.op_type_name, name
            ))
        })
    }

    /// Look up (or compute and memoize) the output shape for the view
    /// path. `infer` must be a pure function of the key.
    pub fn cached_output_shape(
        &self,
        device: String,
        shapes: Vec<Shape>,
        infer: impl FnOnce() -> Result<Shape>,
    ) -> Result<Shape> {
        let key = InferKey { device, shapes };
        {
            let cache = self
                .infer_cache
                .lock()
                .map_err(|_| Error::msg("shape-inference cache lock poisoned"))?;
            if let Some(shape) = cache.get(&key) {
                return Ok(shape.clone());
            }
        }
        let shape = infer()?;
        let mut cache = self
            .infer_cache
            .lock()
            .map_err(|_| Error::msg("shape-inference cache lock poisoned"))?;
        cache.entry(key).or_insert_with(|| shape.clone());
        Ok(shape)
    }
}

fn variant_name(conf: &OpTypeConf) -> &'static str {
    match conf {
        OpTypeConf::User(_) => "User",
        OpTypeConf::Identity(_) => "Identity",
        OpTypeConf::Output(_) => "Output",
        OpTypeConf::LearningRateSchedule(_) => "LearningRateSchedule",
        OpTypeConf::Other(_) => "Other",
    }
}
