use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use vole_core::{
    Backend, BackendDevice, DeviceMesh, DType, Error, GlobalTensor, Result, Tensor,
};
use vole_job::{Job, OperatorConf, OpTypeConf, TICK_INPUT_NAME};

use crate::boxing::{BoxingDecision, BoxingKey, BoxingLogger, BoxingRouter, LogBoxingLogger};

use super::builder::OpExpr;
use super::env::{Environment, Value};
use super::liveness::compute_liveness;
use super::ops::{infer_view_shape, is_view_op, OpRegistry};

// Session — drives op-by-op execution of one job
//
// A session owns the job, its liveness table, the resolved placement map,
// the kernel registry, and the boxing router. A single logical thread
// drives each `run` in declared operator order; concurrency lives below
// (inside kernels and boxing), and distinct runs may proceed concurrently
// on distinct environments. The only cross-run shared mutable state is
// the lazily-built op-expr table and the boxing memo, both read-mostly
// with losers-discard population.

/// The result of one graph execution: the declared outputs in declaration
/// order, plus the final environment for inspection.
#[derive(Debug)]
pub struct RunResult<B: Backend> {
    pub outputs: Vec<Value<B>>,
    pub env: Environment<B>,
}

impl<B: Backend> RunResult<B> {
    /// The i-th declared output.
    pub fn output(&self, i: usize) -> Option<&Value<B>> {
        self.outputs.get(i)
    }
}

/// Explicit "already inside identity assignment" flag, threaded through
/// the global execution path so nested global work never re-triggers
/// output identity tagging.
struct IdentityScope {
    active: bool,
}

impl IdentityScope {
    fn new() -> Self {
        IdentityScope { active: false }
    }

    /// Enter the scope; true when this is the outermost entry.
    fn enter(&mut self) -> bool {
        if self.active {
            false
        } else {
            self.active = true;
            true
        }
    }

    fn exit(&mut self) {
        self.active = false;
    }
}

/// A reusable interpreter for one job.
pub struct Session<B: Backend> {
    job: Job,
    liveness: Vec<Vec<String>>,
    placement: HashMap<String, Arc<DeviceMesh<B>>>,
    registry: OpRegistry<B>,
    router: BoxingRouter<B>,
    logger: Arc<dyn BoxingLogger>,
    boxing_label: String,
    /// Built on first run, shared read-only afterwards. A first-run race
    /// builds redundantly; one table wins the set.
    op_exprs: OnceLock<Vec<Option<Arc<OpExpr>>>>,
}

impl<B: Backend> Session<B> {
    /// Create a session with the default (log-facade) boxing logger.
    pub fn new(job: Job) -> Result<Self> {
        Self::with_logger(job, Arc::new(LogBoxingLogger))
    }

    /// Create a session reporting boxing decisions to `logger`.
    pub fn with_logger(job: Job, logger: Arc<dyn BoxingLogger>) -> Result<Self> {
        let liveness = compute_liveness(&job);
        let placement = resolve_placement::<B>(&job)?;
        Ok(Session {
            job,
            liveness,
            placement,
            registry: OpRegistry::with_builtin_ops(),
            router: BoxingRouter::new(),
            logger,
            boxing_label: String::new(),
            op_exprs: OnceLock::new(),
        })
    }

    /// Label attached to every boxing decision reported from this session.
    pub fn set_boxing_label(&mut self, label: impl Into<String>) {
        self.boxing_label = label.into();
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Register an additional operator kernel. Must happen before the
    /// first run (the op-expr table is built once).
    pub fn register_kernel(&mut self, name: &'static str, kernel: super::ops::Kernel<B>) {
        self.registry.register(name, kernel);
    }

    /// The boxing memo (observability / tests).
    pub fn boxing_router(&self) -> &BoxingRouter<B> {
        &self.router
    }

    /// Execute the job: seed an environment from `variables` (by name)
    /// and `inputs` (positional), run every operator in declared order,
    /// and return the declared outputs in declaration order.
    pub fn run(
        &self,
        inputs: &[Value<B>],
        variables: &HashMap<String, Value<B>>,
    ) -> Result<RunResult<B>> {
        let exprs = self.op_exprs()?;
        let mut env = Environment::seed(&self.job, inputs, variables)?;
        let mut outputs = Vec::new();
        let mut id_scope = IdentityScope::new();
        for (i, conf) in self.job.net.iter().enumerate() {
            self.interpret_op(i, conf, exprs, &mut env, &mut outputs, &mut id_scope)
                .map_err(|e| Error::at_op(i, conf.name.as_str(), e))?;
            for name in &self.liveness[i] {
                env.evict(name)
                    .map_err(|e| Error::at_op(i, conf.name.as_str(), e))?;
            }
        }
        Ok(RunResult { outputs, env })
    }

    /// The cached per-operator expr table, built on first use.
    fn op_exprs(&self) -> Result<&[Option<Arc<OpExpr>>]> {
        if self.op_exprs.get().is_none() {
            let built = self
                .job
                .net
                .iter()
                .map(|conf| match &conf.conf {
                    OpTypeConf::User(_) => {
                        Ok(Some(Arc::new(OpExpr::from_conf(conf, &self.registry)?)))
                    }
                    _ => Ok(None),
                })
                .collect::<Result<Vec<_>>>()?;
            let _ = self.op_exprs.set(built);
        }
        Ok(self.op_exprs.get().expect("op-expr table populated"))
    }

    fn interpret_op(
        &self,
        index: usize,
        conf: &OperatorConf,
        exprs: &[Option<Arc<OpExpr>>],
        env: &mut Environment<B>,
        outputs: &mut Vec<Value<B>>,
        id_scope: &mut IdentityScope,
    ) -> Result<()> {
        match &conf.conf {
            OpTypeConf::User(user) => {
                let expr = exprs[index]
                    .as_ref()
                    .ok_or_else(|| Error::Config("missing op expr for user operator".into()))?;
                self.run_user_op(conf, user, expr, env, id_scope)
            }
            OpTypeConf::LearningRateSchedule(lr) => {
                // Only the naive constant rate is executable; decay
                // policies are rejected outright rather than approximated.
                if let Some(decay) = &lr.decay {
                    return Err(Error::Config(format!(
                        "learning-rate decay policy '{}' is not supported; only a constant rate",
                        decay.policy
                    )));
                }
                let device = parse_device::<B>(&conf.device_tag)?;
                let rate = Tensor::full(1usize, lr.learning_rate, DType::F32, &device)?;
                env.insert(format!("{}/{}", conf.name, lr.out), Value::Local(rate))
            }
            OpTypeConf::Identity(identity) => {
                // Alias: the new name shares the existing handle, no copy.
                let value = env.lookup(&identity.input)?.clone();
                env.insert(format!("{}/{}", conf.name, identity.out), value)
            }
            OpTypeConf::Output(output) => {
                outputs.push(env.lookup(&output.input)?.clone());
                Ok(())
            }
            // Kinds handled by other execution backends are not ours to
            // reject.
            OpTypeConf::Other(_) => Ok(()),
        }
    }

    fn run_user_op(
        &self,
        conf: &OperatorConf,
        user: &vole_job::UserOpConf,
        expr: &Arc<OpExpr>,
        env: &mut Environment<B>,
        id_scope: &mut IdentityScope,
    ) -> Result<()> {
        let device = parse_device::<B>(&conf.device_tag)?;
        // Gather inputs, casting local tensors onto the operator's
        // declared device when they live elsewhere.
        let mut inputs = Vec::new();
        for (ibn, names) in &user.inputs {
            if ibn == TICK_INPUT_NAME {
                continue;
            }
            for name in names {
                let value = match env.lookup(name)? {
                    Value::Local(t) if t.device() != &device => {
                        Value::Local(t.to_device(&device)?)
                    }
                    other => other.clone(),
                };
                inputs.push(value);
            }
        }
        if inputs.iter().all(Value::is_local) {
            let locals = inputs
                .iter()
                .map(|v| Ok(v.as_local()?.clone()))
                .collect::<Result<Vec<_>>>()?;
            if is_view_op(expr.op_type_name()) && locals.len() == 1 {
                self.run_view_op(expr, &locals[0], env)
            } else {
                self.run_local_op(expr, &locals, &device, env)
            }
        } else {
            self.run_global_op(conf, expr, &inputs, env, id_scope)
        }
    }

    /// View path: shape-only operators produce a zero-copy view over the
    /// input's storage. The output shape comes from the memoized
    /// inference cache.
    fn run_view_op(
        &self,
        expr: &Arc<OpExpr>,
        input: &Tensor<B>,
        env: &mut Environment<B>,
    ) -> Result<()> {
        let shape = expr.cached_output_shape(
            input.device().name(),
            vec![input.shape().clone()],
            || infer_view_shape(expr, input.shape()),
        )?;
        let out = if input.layout().is_view_compatible() {
            input.basic_view(shape)?
        } else {
            // A strided input cannot be re-viewed in place; compact it
            // first, then view the compacted storage.
            input.contiguous()?.basic_view(shape)?
        };
        env.insert(expr.output_names()[0].clone(), Value::Local(out))
    }

    /// Normal local path: one kernel invocation, one output per declared
    /// output name. Kernel errors propagate unchanged.
    fn run_local_op(
        &self,
        expr: &Arc<OpExpr>,
        inputs: &[Tensor<B>],
        device: &B::Device,
        env: &mut Environment<B>,
    ) -> Result<()> {
        let kernel = self.registry.get(expr.op_type_name())?;
        let outs = kernel(expr, inputs, device)?;
        if outs.len() != expr.output_names().len() {
            return Err(Error::msg(format!(
                "kernel '{}' produced {} outputs, expected {}",
                expr.op_type_name(),
                outs.len(),
                expr.output_names().len()
            )));
        }
        for (name, out) in expr.output_names().iter().zip(outs) {
            env.insert(name.clone(), Value::Local(out))?;
        }
        Ok(())
    }

    /// Global path: reconcile every input's distribution signature with
    /// the operator's declared one (boxing where they differ), then run
    /// the kernel once per mesh rank and wrap the outputs with their
    /// declared signatures.
    fn run_global_op(
        &self,
        conf: &OperatorConf,
        expr: &Arc<OpExpr>,
        inputs: &[Value<B>],
        env: &mut Environment<B>,
        id_scope: &mut IdentityScope,
    ) -> Result<()> {
        let mesh = self
            .placement
            .get(&conf.name)
            .ok_or_else(|| Error::Config(format!("no placement for operator '{}'", conf.name)))?;
        let signature = self.job.parallel_view.get(&conf.name).ok_or_else(|| {
            Error::Config(format!(
                "no distribution signature for operator '{}'",
                conf.name
            ))
        })?;

        let mut reconciled = Vec::with_capacity(inputs.len());
        for (i, value) in inputs.iter().enumerate() {
            let global = match value {
                Value::Global(g) => g,
                Value::Local(_) => {
                    return Err(Error::Config(format!(
                        "operator '{}' mixes local and global inputs",
                        conf.name
                    )))
                }
            };
            let binding = &expr.input_bns()[i];
            if global.elem_count() == 0 {
                return Err(Error::Placement(format!(
                    "global tensor bound to '{}' has no logical elements",
                    binding
                )));
            }
            if global.mesh().as_ref() != mesh.as_ref() {
                return Err(Error::Placement(format!(
                    "input '{}' lives on {:?} but the operator executes on {:?}",
                    binding,
                    global.mesh(),
                    mesh
                )));
            }
            let target = signature.get(binding)?;
            if mesh.is_single_device() || global.nd_sbp() == target {
                // The decision is reported even when nothing moves, so
                // the external trace stays complete.
                self.log_decision(conf, binding, "none", global, target);
                reconciled.push(global.clone());
            } else {
                let plan = self.router.get_or_plan(BoxingKey {
                    src: global.nd_sbp().clone(),
                    dst: target.clone(),
                    src_mesh: Arc::clone(mesh),
                    dst_mesh: Arc::clone(mesh),
                    logical_shape: global.logical_shape().clone(),
                })?;
                // Trace the chosen transform before applying it.
                self.log_decision(conf, binding, plan.route(), global, target);
                reconciled.push(plan.apply(global, target)?);
            }
        }

        // One kernel invocation per participant rank, SPMD-style, with
        // the operator's declared output signatures as context.
        let kernel = self.registry.get(expr.op_type_name())?;
        let num_outputs = expr.output_names().len();
        let mut per_output: Vec<Vec<Tensor<B>>> = (0..num_outputs).map(|_| Vec::new()).collect();
        for rank in 0..mesh.num_ranks() {
            let locals: Vec<Tensor<B>> = reconciled
                .iter()
                .map(|g| g.shard(rank).clone())
                .collect();
            let outs = kernel(expr, &locals, mesh.device(rank))?;
            if outs.len() != num_outputs {
                return Err(Error::msg(format!(
                    "kernel '{}' produced {} outputs, expected {}",
                    expr.op_type_name(),
                    outs.len(),
                    num_outputs
                )));
            }
            for (j, out) in outs.into_iter().enumerate() {
                per_output[j].push(out);
            }
        }

        // Tag outputs with fresh global identities only at the outermost
        // level; nested global work must not re-trigger assignment.
        let outermost = id_scope.enter();
        let result: Result<()> = (|| {
            for (j, shards) in per_output.into_iter().enumerate() {
                let out_sbp = signature.get(&expr.output_bns()[j])?.clone();
                let out = GlobalTensor::from_shards(shards, Arc::clone(mesh), out_sbp)?;
                if outermost {
                    out.ensure_id();
                }
                env.insert(expr.output_names()[j].clone(), Value::Global(out))?;
            }
            Ok(())
        })();
        if outermost {
            id_scope.exit();
        }
        result
    }

    fn log_decision(
        &self,
        conf: &OperatorConf,
        binding: &str,
        route: &str,
        input: &GlobalTensor<B>,
        target: &vole_core::NdSbp,
    ) {
        self.logger.log(&BoxingDecision {
            label: self.boxing_label.clone(),
            op_name: conf.name.clone(),
            binding: binding.to_string(),
            route: route.to_string(),
            src: input.nd_sbp().clone(),
            dst: target.clone(),
            mesh: format!("{:?}", input.mesh()),
            logical_shape: input.logical_shape().clone(),
        });
    }
}

fn parse_device<B: Backend>(tag: &str) -> Result<B::Device> {
    B::Device::parse(tag)
        .ok_or_else(|| Error::Config(format!("unrecognized device tag '{}'", tag)))
}

/// Resolve every placement group into a device mesh and index it by
/// operator name.
fn resolve_placement<B: Backend>(job: &Job) -> Result<HashMap<String, Arc<DeviceMesh<B>>>> {
    let mut map = HashMap::new();
    for group in &job.placement {
        let conf = &group.parallel_conf;
        let devices = conf
            .device_ids
            .iter()
            .map(|id| parse_device::<B>(&format!("{}:{}", conf.device_tag, id)))
            .collect::<Result<Vec<_>>>()?;
        let mesh = match &conf.hierarchy {
            Some(h) => DeviceMesh::new(devices, h.clone())?,
            None => DeviceMesh::flat(devices)?,
        };
        let mesh = Arc::new(mesh);
        for name in &group.op_names {
            map.insert(name.clone(), Arc::clone(&mesh));
        }
    }
    Ok(map)
}
