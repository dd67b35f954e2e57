//! Hook registry for custom node behavior
//!
//! `Transform` nodes, `RoutingStrategy::Custom` routers, and
//! `SplitStrategy::Custom` fan-outs are configured by name only; the
//! actual functions live here, registered under the node's id and looked
//! up at compile time. This keeps node configs serializable while still
//! admitting arbitrary user logic.

use std::collections::HashMap;
use std::sync::Arc;

use crate::pregel::message::WorkflowMessage;
use crate::pregel::state::WorkflowState;

/// Pure state transform: `(state, inbox) -> update`
pub type TransformFn<S> = Arc<
    dyn Fn(&S, &[WorkflowMessage]) -> <S as WorkflowState>::Update + Send + Sync,
>;

/// Router predicate: `(state, inbox) -> Some(target)` or `None` for no match
pub type RouterPredicateFn<S> =
    Arc<dyn Fn(&S, &[WorkflowMessage]) -> Option<String> + Send + Sync>;

/// Splitter: `(payload, target_count) -> per-target payloads`
pub type SplitFn =
    Arc<dyn Fn(&serde_json::Value, usize) -> Vec<serde_json::Value> + Send + Sync>;

/// Named registry of custom node functions
pub struct HookRegistry<S: WorkflowState> {
    transforms: HashMap<String, TransformFn<S>>,
    router_predicates: HashMap<String, RouterPredicateFn<S>>,
    splitters: HashMap<String, SplitFn>,
}

impl<S: WorkflowState> Default for HookRegistry<S> {
    fn default() -> Self {
        Self {
            transforms: HashMap::new(),
            router_predicates: HashMap::new(),
            splitters: HashMap::new(),
        }
    }
}

impl<S: WorkflowState> Clone for HookRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            transforms: self.transforms.clone(),
            router_predicates: self.router_predicates.clone(),
            splitters: self.splitters.clone(),
        }
    }
}

impl<S: WorkflowState> HookRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform function
    pub fn register_transform<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&S, &[WorkflowMessage]) -> S::Update + Send + Sync + 'static,
    {
        self.transforms.insert(name.into(), Arc::new(f));
        self
    }

    /// Register a router predicate
    pub fn register_router_predicate<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&S, &[WorkflowMessage]) -> Option<String> + Send + Sync + 'static,
    {
        self.router_predicates.insert(name.into(), Arc::new(f));
        self
    }

    /// Register a fan-out splitter
    pub fn register_splitter<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&serde_json::Value, usize) -> Vec<serde_json::Value> + Send + Sync + 'static,
    {
        self.splitters.insert(name.into(), Arc::new(f));
        self
    }

    pub fn transform(&self, name: &str) -> Option<TransformFn<S>> {
        self.transforms.get(name).cloned()
    }

    pub fn router_predicate(&self, name: &str) -> Option<RouterPredicateFn<S>> {
        self.router_predicates.get(name).cloned()
    }

    pub fn splitter(&self, name: &str) -> Option<SplitFn> {
        self.splitters.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pregel::state::{UnitState, UnitUpdate};

    #[test]
    fn registered_hooks_resolve_by_name() {
        let mut hooks = HookRegistry::<UnitState>::new();
        hooks.register_transform("noop", |_state, _msgs| UnitUpdate);
        hooks.register_router_predicate("pick_a", |_state, _msgs| Some("a".to_string()));
        hooks.register_splitter("pairs", |value, n| {
            (0..n).map(|_| value.clone()).collect()
        });

        assert!(hooks.transform("noop").is_some());
        assert!(hooks.transform("missing").is_none());

        let predicate = hooks.router_predicate("pick_a").unwrap();
        assert_eq!(predicate(&UnitState, &[]), Some("a".to_string()));

        let splitter = hooks.splitter("pairs").unwrap();
        assert_eq!(splitter(&serde_json::json!(1), 3).len(), 3);
    }

    #[test]
    fn clone_shares_functions() {
        let mut hooks = HookRegistry::<UnitState>::new();
        hooks.register_transform("noop", |_state, _msgs| UnitUpdate);

        let cloned = hooks.clone();
        assert!(cloned.transform("noop").is_some());
    }
}
