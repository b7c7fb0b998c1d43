//! # Vole
//!
//! A dataflow-graph interpreter for distributed tensor computation.
//!
//! Given a declarative job (an ordered operator list plus placement and
//! per-tensor distribution annotations), the interpreter executes the
//! graph op-by-op, producing intermediate and final tensors, and inserts
//! cross-device redistribution ("boxing") whenever an operator's declared
//! input distribution differs from what is actually available.
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `vole-core` | Tensor, Shape, DType, Layout, Backend trait, SBP signatures, device meshes, global tensors |
//! | `vole-cpu` | CPU backend with rayon-parallel matmul; multiple logical devices per process |
//! | `vole-job` | The job description: operator configs, placement, signature maps |
//! | `vole` | The interpreter: environment, liveness, operator builder, local/global executors, boxing |
//!
//! ## Modules
//!
//! - [`exec`] — session, environment, liveness analysis, op registry
//! - [`boxing`] — redistribution plans, the memoizing router, decision logging

/// Re-export core types.
pub use vole_core::{
    Backend, BackendDevice, BackendStorage, DeviceMesh, DType, Error, ErrorKind, GlobalId,
    GlobalTensor, Layout, NdSbp, Result, SbpParallel, SbpSignature, Shape, Tensor, TensorId,
};

/// Re-export the CPU backend.
pub use vole_cpu::{CpuBackend, CpuDevice, CpuStorage, CpuTensor};

/// Re-export the job description types.
pub use vole_job::{
    AttrValue, IdentityConf, Job, JobBuilder, LearningRateDecayConf, LearningRateScheduleConf,
    OperatorConf, OpTypeConf, OutputConf, ParallelConf, PlacementGroup, UserOpConf,
    TICK_INPUT_NAME,
};

/// Boxing — global-tensor redistribution between distribution signatures.
pub mod boxing;

/// Graph execution — session, environment, liveness, operator registry.
pub mod exec;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::boxing::{BoxingDecision, BoxingLogger, BoxingRouter, RecordingBoxingLogger};
    pub use crate::exec::{compute_liveness, Environment, OpRegistry, RunResult, Session, Value};
    pub use crate::{
        CpuBackend, CpuDevice, CpuTensor, DeviceMesh, DType, ErrorKind, GlobalTensor, Job, NdSbp,
        SbpParallel, SbpSignature, Shape, Tensor,
    };
}
