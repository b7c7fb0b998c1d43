use std::fmt;
use std::sync::Mutex;

use vole_core::{NdSbp, Shape};

// BoxingLogger — the observability seam for boxing decisions
//
// Every reconciliation of one operator input produces exactly one
// decision record, whether or not a transform ends up being applied
// (`route == "none"` for the no-op case), so an external trace of the
// execution is complete.

/// One boxing decision: which input of which operator, what signatures
/// were compared, and which route (if any) was chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxingDecision {
    /// Caller-supplied label for the surrounding execution.
    pub label: String,
    /// The operator whose input was reconciled.
    pub op_name: String,
    /// The positional input binding name ("x_0", …).
    pub binding: String,
    /// The chosen route ("none" when no transform was needed).
    pub route: String,
    pub src: NdSbp,
    pub dst: NdSbp,
    /// Debug rendering of the mesh the tensors live on.
    pub mesh: String,
    pub logical_shape: Shape,
}

impl fmt::Display for BoxingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.label.is_empty() {
            write!(f, "[{}] ", self.label)?;
        }
        write!(
            f,
            "boxing {}:{} {} -> {} via {} on {} shape {}",
            self.op_name, self.binding, self.src, self.dst, self.route, self.mesh,
            self.logical_shape
        )
    }
}

/// Receives every boxing decision made during execution.
pub trait BoxingLogger: Send + Sync {
    fn log(&self, decision: &BoxingDecision);
}

/// Default logger: emits each decision through the `log` facade.
pub struct LogBoxingLogger;

impl BoxingLogger for LogBoxingLogger {
    fn log(&self, decision: &BoxingDecision) {
        log::debug!(target: "vole::boxing", "{}", decision);
    }
}

/// Test logger that records every decision for later inspection.
#[derive(Default)]
pub struct RecordingBoxingLogger {
    records: Mutex<Vec<BoxingDecision>>,
}

impl RecordingBoxingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of everything logged so far.
    pub fn decisions(&self) -> Vec<BoxingDecision> {
        self.records.lock().expect("logger lock poisoned").clone()
    }
}

impl BoxingLogger for RecordingBoxingLogger {
    fn log(&self, decision: &BoxingDecision) {
        self.records
            .lock()
            .expect("logger lock poisoned")
            .push(decision.clone());
    }
}
