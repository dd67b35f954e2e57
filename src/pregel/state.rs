//! Workflow state abstraction for the Pregel runtime
//!
//! Defines how workflow state is updated and merged during supersteps.
//! The runtime collects updates from all vertices and applies them atomically
//! at the end of each superstep.

/// Trait for state updates produced by vertex computation
///
/// Updates form a commutative monoid: `empty()` is the identity element and
/// `WorkflowState::merge_updates` should be order-independent. The runtime
/// still merges in a deterministic order so that replays stay reproducible
/// when an implementation bends that rule.
pub trait StateUpdate: Clone + Send + Sync + 'static {
    /// Create an empty (no-op) update
    fn empty() -> Self;

    /// Check if this update has no effect
    fn is_empty(&self) -> bool;
}

/// Trait for workflow state managed by the Pregel runtime
///
/// The workflow state is the shared value vertices read during computation.
/// No vertex mutates it directly: each emits an update, and the runtime
/// merges and applies the batch between supersteps.
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Default)]
/// struct CrawlState {
///     visited: Vec<String>,
///     frontier_exhausted: bool,
/// }
///
/// impl WorkflowState for CrawlState {
///     type Update = CrawlUpdate;
///
///     fn apply_update(&self, update: Self::Update) -> Self {
///         let mut next = self.clone();
///         next.visited.extend(update.newly_visited);
///         next.frontier_exhausted |= update.exhausted;
///         next
///     }
///
///     fn merge_updates(updates: Vec<Self::Update>) -> Self::Update {
///         CrawlUpdate {
///             newly_visited: updates.iter().flat_map(|u| u.newly_visited.clone()).collect(),
///             exhausted: updates.iter().any(|u| u.exhausted),
///         }
///     }
///
///     fn is_terminal(&self) -> bool {
///         self.frontier_exhausted
///     }
/// }
/// ```
pub trait WorkflowState: Clone + Send + Sync + 'static {
    /// The update type produced by vertices
    type Update: StateUpdate;

    /// Apply an update to produce a new state
    ///
    /// This should be a pure function - the original state is not modified.
    fn apply_update(&self, update: Self::Update) -> Self;

    /// Merge multiple updates into a single update
    ///
    /// Called when multiple vertices produce updates in the same superstep.
    fn merge_updates(updates: Vec<Self::Update>) -> Self::Update;

    /// Check if the state represents a terminal condition
    ///
    /// When true, the workflow terminates regardless of vertex states.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Apply multiple updates in sequence
    ///
    /// Default implementation merges updates then applies the result.
    fn apply_updates(&self, updates: Vec<Self::Update>) -> Self {
        if updates.is_empty() {
            return self.clone();
        }
        let merged = Self::merge_updates(updates);
        self.apply_update(merged)
    }
}

/// A unit state for workflows that don't need shared state
///
/// Useful when all coordination happens via messages.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct UnitState;

/// Unit update that has no effect
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct UnitUpdate;

impl StateUpdate for UnitUpdate {
    fn empty() -> Self {
        UnitUpdate
    }

    fn is_empty(&self) -> bool {
        true
    }
}

impl WorkflowState for UnitState {
    type Update = UnitUpdate;

    fn apply_update(&self, _update: Self::Update) -> Self {
        UnitState
    }

    fn merge_updates(_updates: Vec<Self::Update>) -> Self::Update {
        UnitUpdate
    }
}
