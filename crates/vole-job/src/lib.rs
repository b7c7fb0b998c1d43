//! # vole-job
//!
//! The job description the interpreter consumes: an ordered list of
//! operator configurations, a placement map, and per-operator
//! distribution-signature requirements.
//!
//! Everything here is plain serde-derived data. How a job is persisted or
//! produced (a compiler front end, a file, a wire format) is someone
//! else's concern; the interpreter treats the deserialized structure as
//! opaque input and trusts its declared operator order.

mod conf;
mod job;

pub use conf::{
    AttrValue, IdentityConf, LearningRateDecayConf, LearningRateScheduleConf, OperatorConf,
    OpTypeConf, OutputConf, UserOpConf,
};
pub use job::{Job, JobBuilder, ParallelConf, PlacementGroup};

/// The scheduling-only sentinel input name. Bindings under this name carry
/// no data and are skipped everywhere tensors are gathered or counted.
pub const TICK_INPUT_NAME: &str = "UserSourceOpTickInput";
