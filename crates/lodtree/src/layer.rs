//! Per-frame update decisions for one layer.
//!
//! [`Layer::evaluate`] combines the node's [`UpdateState`] with the level
//! selector and grants at most one fetch per node at a time. The caller runs
//! the fetch and feeds the result back through [`Layer::report`], which is
//! the only way a state leaves `Pending`.

use std::collections::HashMap;
use std::sync::Arc;

use lodtree_decode::NodeKey;
use web_time::Instant;

use crate::config::StreamConfig;
use crate::level::{LevelBounds, Strategy, choose_next_level};
use crate::state::{Backoff, Phase, UpdateState};

/// What the renderer knows about a node this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeStatus {
    /// Whether the node's hierarchy is known.
    pub hierarchy_loaded: bool,
    /// Level the view wants, `None` if the node needs nothing.
    pub desired_level: Option<i32>,
    /// Level currently displayed, `None` if nothing is.
    pub current_level: Option<i32>,
}

/// Work granted for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    FetchHierarchy,
    FetchLevel(i32),
}

/// Result of a granted fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The fetch succeeded. `level` is `None` for hierarchy fetches.
    Success { level: Option<i32> },
    /// The level exists but holds no data.
    NoData { level: i32 },
    Failure { level: Option<i32>, definitive: bool },
}

/// Update states and selection policy of one layer.
#[derive(Debug, Clone)]
pub struct Layer {
    strategy: Strategy,
    bounds: LevelBounds,
    backoff: Arc<Backoff>,
    states: HashMap<NodeKey, UpdateState>,
}

impl Layer {
    #[must_use]
    pub fn new(strategy: Strategy, bounds: LevelBounds, backoff: Arc<Backoff>) -> Self {
        Self {
            strategy,
            bounds,
            backoff,
            states: HashMap::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.strategy.clone(), config.levels, config.backoff())
    }

    #[must_use]
    pub fn bounds(&self) -> LevelBounds {
        self.bounds
    }

    /// State of a node, if it was ever evaluated.
    #[must_use]
    pub fn state(&self, key: NodeKey) -> Option<&UpdateState> {
        self.states.get(&key)
    }

    /// Number of nodes with a state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Decide what to fetch for a node. A granted action moves the node's
    /// state to `Pending` until its outcome is reported.
    pub fn evaluate(&mut self, key: NodeKey, status: NodeStatus, now: Instant) -> Action {
        let state = self
            .states
            .entry(key)
            .or_insert_with(|| UpdateState::new(Arc::clone(&self.backoff)));

        if !state.can_try_update(now) {
            return Action::None;
        }

        if !status.hierarchy_loaded {
            state.new_try(now);
            return Action::FetchHierarchy;
        }

        if status.current_level.is_some_and(|c| c >= self.bounds.max) {
            state.no_more_update_possible();
            return Action::None;
        }

        let Some(desired) = status.desired_level else {
            return Action::None;
        };
        let desired = desired.clamp(self.bounds.min, self.bounds.max);
        if status.current_level.is_some_and(|c| c >= desired) {
            return Action::None;
        }

        let next = choose_next_level(
            &self.strategy,
            desired,
            status.current_level,
            state.lowest_level_error(),
            self.bounds,
        );
        if next < self.bounds.min || status.current_level.is_some_and(|c| next <= c) {
            // Nothing strictly better is known to exist.
            return Action::None;
        }

        state.new_try(now);
        Action::FetchLevel(next)
    }

    /// Record the outcome of a granted fetch. Returns `false` if the node
    /// had no pending fetch.
    pub fn report(&mut self, key: NodeKey, outcome: Outcome, now: Instant) -> bool {
        let Some(state) = self.states.get_mut(&key) else {
            return false;
        };
        if state.phase() != Phase::Pending {
            return false;
        }

        match outcome {
            Outcome::Success { level } => {
                if level.is_some_and(|l| l >= self.bounds.max) {
                    state.no_more_update_possible()
                } else {
                    state.success()
                }
            }
            Outcome::NoData { level } => state.no_data(Some(level)),
            Outcome::Failure { level, definitive } => {
                tracing::warn!(%key, ?level, definitive, errors = state.error_count() + 1, "fetch failed");
                state.failure(now, definitive, level)
            }
        }
    }

    /// Drop the states of `root` and every node below it.
    pub fn forget_subtree(&mut self, root: NodeKey) -> usize {
        let before = self.states.len();
        self.states.retain(|key, _| !key.is_descendant_of(root));
        before - self.states.len()
    }
}
