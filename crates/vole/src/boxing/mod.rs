// Boxing — redistribution of global tensors between signatures
//
// When an operator's declared input signature differs from what a tensor
// actually has, the interpreter requests a boxing transform: a pure
// data-movement plan that changes how values are laid out across the mesh
// without changing the logical value. Plans are memoized per
// (source signature, target signature, mesh, mesh, logical shape) in a
// [`BoxingRouter`] owned by the session: explicit state passed by the
// caller, not a process-wide singleton.
//
// Every boxing *decision*, including "no transform needed", is reported
// through the [`BoxingLogger`] seam so an external trace stays complete.

mod logger;
mod plan;
mod router;

pub use logger::{BoxingDecision, BoxingLogger, LogBoxingLogger, RecordingBoxingLogger};
pub use plan::BoxingPlan;
pub use router::{BoxingKey, BoxingRouter};
