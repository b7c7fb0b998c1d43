use std::collections::HashMap;

use vole_core::{Backend, Error, GlobalTensor, Result, Tensor};
use vole_job::Job;

// Environment — the per-execution name → tensor mapping
//
// Keys are operator-output identifiers ("<op-name>/<output-bn>"). A name
// is unique at any instant, may be removed exactly once by liveness
// eviction, and is never rewritten. The environment is exclusively owned
// by one execution; nothing here is shared across runs.

/// A tensor threaded between operators: local (single-device) or global
/// (mesh-distributed).
#[derive(Debug, Clone)]
pub enum Value<B: Backend> {
    Local(Tensor<B>),
    Global(GlobalTensor<B>),
}

impl<B: Backend> Value<B> {
    pub fn is_local(&self) -> bool {
        matches!(self, Value::Local(_))
    }

    pub fn as_local(&self) -> Result<&Tensor<B>> {
        match self {
            Value::Local(t) => Ok(t),
            Value::Global(g) => Err(Error::Config(format!(
                "expected a local tensor, got a global tensor with signature {}",
                g.nd_sbp()
            ))),
        }
    }

    pub fn as_global(&self) -> Result<&GlobalTensor<B>> {
        match self {
            Value::Global(g) => Ok(g),
            Value::Local(_) => Err(Error::Config(
                "expected a global tensor, got a local tensor".into(),
            )),
        }
    }
}

/// The name → tensor mapping scoped to one graph execution.
#[derive(Debug)]
pub struct Environment<B: Backend> {
    slots: HashMap<String, Value<B>>,
}

impl<B: Backend> Environment<B> {
    pub fn new() -> Self {
        Environment {
            slots: HashMap::new(),
        }
    }

    /// Seed a fresh environment from a job's variable tensors (by name)
    /// and graph-input tensors (positional). Each op name `n` lands as
    /// key `"n/out"`.
    pub fn seed(
        job: &Job,
        inputs: &[Value<B>],
        variables: &HashMap<String, Value<B>>,
    ) -> Result<Self> {
        let mut env = Environment::new();
        for name in &job.variable_ops {
            let value = variables.get(name).ok_or_else(|| {
                Error::Config(format!("no tensor supplied for variable op '{}'", name))
            })?;
            env.insert(format!("{}/out", name), value.clone())?;
        }
        if inputs.len() != job.input_ops.len() {
            return Err(Error::Config(format!(
                "job declares {} graph inputs, caller supplied {}",
                job.input_ops.len(),
                inputs.len()
            )));
        }
        for (name, value) in job.input_ops.iter().zip(inputs) {
            env.insert(format!("{}/out", name), value.clone())?;
        }
        Ok(env)
    }

    /// Bind a name. Names are write-once: rebinding is a config error.
    pub fn insert(&mut self, name: String, value: Value<B>) -> Result<()> {
        if self.slots.contains_key(&name) {
            return Err(Error::Config(format!("tensor name '{}' produced twice", name)));
        }
        self.slots.insert(name, value);
        Ok(())
    }

    /// Resolve a name. Unresolved lookups are config errors: every
    /// consumed name must have been produced or pre-seeded.
    pub fn lookup(&self, name: &str) -> Result<&Value<B>> {
        self.slots
            .get(name)
            .ok_or_else(|| Error::Config(format!("unresolved tensor name '{}'", name)))
    }

    /// Drop the binding for a name that the liveness table marked dead.
    /// The name must be present: a missed eviction means the liveness
    /// invariant was broken upstream.
    pub fn evict(&mut self, name: &str) -> Result<()> {
        match self.slots.remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::Config(format!(
                "liveness eviction expected live name '{}'",
                name
            ))),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterate over the live names (arbitrary order).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}

impl<B: Backend> Default for Environment<B> {
    fn default() -> Self {
        Self::new()
    }
}
