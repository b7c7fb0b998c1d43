use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use vole_core::{Backend, DeviceMesh, NdSbp, Result, Shape};

use super::plan::BoxingPlan;

// BoxingRouter — memoized transform lookup
//
// The router is the only cross-execution shared state besides the op-expr
// table. It is read-mostly: a populate race may build the same plan twice,
// but exactly one candidate wins the insert and the loser is discarded.
// No reader ever observes a partially-built entry.

/// Memo key: source and target signature, the (identical) source and
/// target mesh, and the logical shape being moved.
pub struct BoxingKey<B: Backend> {
    pub src: NdSbp,
    pub dst: NdSbp,
    pub src_mesh: Arc<DeviceMesh<B>>,
    pub dst_mesh: Arc<DeviceMesh<B>>,
    pub logical_shape: Shape,
}

impl<B: Backend> Clone for BoxingKey<B> {
    fn clone(&self) -> Self {
        BoxingKey {
            src: self.src.clone(),
            dst: self.dst.clone(),
            src_mesh: Arc::clone(&self.src_mesh),
            dst_mesh: Arc::clone(&self.dst_mesh),
            logical_shape: self.logical_shape.clone(),
        }
    }
}

impl<B: Backend> PartialEq for BoxingKey<B> {
    fn eq(&self, other: &Self) -> bool {
        self.src == other.src
            && self.dst == other.dst
            && *self.src_mesh == *other.src_mesh
            && *self.dst_mesh == *other.dst_mesh
            && self.logical_shape == other.logical_shape
    }
}

impl<B: Backend> Eq for BoxingKey<B> {}

impl<B: Backend> Hash for BoxingKey<B> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.src.hash(state);
        self.dst.hash(state);
        self.src_mesh.hash(state);
        self.dst_mesh.hash(state);
        self.logical_shape.hash(state);
    }
}

/// Caches one [`BoxingPlan`] per distinct key. Owned by the session and
/// shared read-mostly between concurrent executions.
pub struct BoxingRouter<B: Backend> {
    memo: RwLock<HashMap<BoxingKey<B>, Arc<BoxingPlan>>>,
}

impl<B: Backend> Default for BoxingRouter<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> BoxingRouter<B> {
    pub fn new() -> Self {
        BoxingRouter {
            memo: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the plan for a key, building and caching it on first use.
    pub fn get_or_plan(&self, key: BoxingKey<B>) -> Result<Arc<BoxingPlan>> {
        if let Ok(memo) = self.memo.read() {
            if let Some(plan) = memo.get(&key) {
                return Ok(Arc::clone(plan));
            }
        }
        // Build outside the lock; a racing thread's candidate may win.
        let candidate = Arc::new(BoxingPlan::plan(
            &key.src,
            &key.dst,
            key.src_mesh.hierarchy(),
            &key.logical_shape,
        )?);
        let mut memo = self
            .memo
            .write()
            .map_err(|_| vole_core::Error::msg("boxing memo lock poisoned"))?;
        Ok(Arc::clone(memo.entry(key).or_insert(candidate)))
    }

    /// Number of memoized plans (observability / tests).
    pub fn cached_plans(&self) -> usize {
        self.memo.read().map(|m| m.len()).unwrap_or(0)
    }
}
