// Executor — runs a job description on the tensor runtime
//
// The interpreter walks the job's net in declared order, dispatching each
// operator to the local executor (all inputs on one device) or the
// distribution resolver (mesh-distributed inputs, boxing as needed),
// wiring results into the environment, and evicting names the liveness
// table marks dead.
//
// USAGE:
//   let job = Job::builder("forward")
//       .input("a").input("b")
//       .user_op("add0", "add", vec![("x".into(), vec!["a/out".into(), "b/out".into()])])
//       .output("out0", "add0/out_0")
//       .build();
//   let session = Session::<CpuBackend>::new(job)?;
//   let result = session.run(&inputs, &variables)?;

mod builder;
mod env;
mod interpreter;
mod liveness;
mod ops;

pub use builder::OpExpr;
pub use env::{Environment, Value};
pub use interpreter::{RunResult, Session};
pub use liveness::compute_liveness;
pub use ops::{infer_view_shape, is_view_op, Kernel, OpRegistry};
