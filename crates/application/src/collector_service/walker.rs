use std::collections::HashSet;
use std::sync::Arc;

use orglens_domain::{ResourceKind, ResourceRef};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::CancellationFlag;
use crate::collector_ports::HierarchySource;

/// Counters produced by one hierarchy traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkOutcome {
    /// Resources emitted to the work queue.
    pub discovered: u64,
    /// Failed or rejected child listings.
    pub listing_errors: u64,
    /// Subtrees abandoned before being fully traversed.
    pub abandoned_subtrees: u64,
}

#[derive(Default)]
struct WalkState {
    visited: HashSet<(ResourceKind, String)>,
    outcome: WalkOutcome,
    queue_closed: bool,
}

/// Depth-first discovery of the resource hierarchy below one root.
///
/// Emits every reachable organization, folder, and project exactly once to
/// the discovery channel. The walker never waits for consumers; it returns
/// only after the full reachable subtree has been emitted or abandoned.
pub struct HierarchyWalker {
    hierarchy: Arc<dyn HierarchySource>,
    max_depth: u32,
    cancellation: CancellationFlag,
}

impl HierarchyWalker {
    /// Creates a walker over the given hierarchy source.
    #[must_use]
    pub fn new(
        hierarchy: Arc<dyn HierarchySource>,
        max_depth: u32,
        cancellation: CancellationFlag,
    ) -> Self {
        Self {
            hierarchy,
            max_depth,
            cancellation,
        }
    }

    /// Walks the subtree rooted at `root`, emitting discovered resources.
    ///
    /// Dropping `discoveries` on return closes the channel for consumers
    /// once every queued item has been taken.
    pub async fn walk(
        &self,
        root: ResourceRef,
        discoveries: UnboundedSender<ResourceRef>,
    ) -> WalkOutcome {
        let mut state = WalkState::default();
        self.walk_node(root, 0, &discoveries, &mut state).await;

        info!(
            discovered = state.outcome.discovered,
            listing_errors = state.outcome.listing_errors,
            abandoned_subtrees = state.outcome.abandoned_subtrees,
            "hierarchy traversal finished"
        );
        state.outcome
    }

    async fn walk_node(
        &self,
        node: ResourceRef,
        depth: u32,
        discoveries: &UnboundedSender<ResourceRef>,
        state: &mut WalkState,
    ) {
        if self.cancellation.is_cancelled() || state.queue_closed {
            state.outcome.abandoned_subtrees = state.outcome.abandoned_subtrees.saturating_add(1);
            return;
        }

        if depth > self.max_depth {
            warn!(
                resource = %node,
                depth,
                max_depth = self.max_depth,
                "hierarchy exceeds depth limit; abandoning subtree"
            );
            state.outcome.listing_errors = state.outcome.listing_errors.saturating_add(1);
            state.outcome.abandoned_subtrees = state.outcome.abandoned_subtrees.saturating_add(1);
            return;
        }

        if !state.visited.insert(node.dedup_key()) {
            warn!(resource = %node, "resource discovered twice; skipping");
            return;
        }

        if !Self::emit(&node, discoveries, state) {
            return;
        }

        match self.hierarchy.list_child_folders(&node).await {
            Ok(folders) => {
                for folder in folders {
                    match ResourceRef::folder(folder.id, node.id()) {
                        Ok(child) => {
                            Box::pin(self.walk_node(child, depth + 1, discoveries, state)).await;
                        }
                        Err(error) => {
                            warn!(parent = %node, error = %error, "hierarchy API returned invalid folder id");
                            state.outcome.listing_errors =
                                state.outcome.listing_errors.saturating_add(1);
                        }
                    }
                }
            }
            Err(error) => {
                warn!(
                    parent = %node,
                    category = error.kind.as_str(),
                    error = %error,
                    "folder listing failed; abandoning folder subtree"
                );
                state.outcome.listing_errors = state.outcome.listing_errors.saturating_add(1);
                state.outcome.abandoned_subtrees =
                    state.outcome.abandoned_subtrees.saturating_add(1);
            }
        }

        // A failed folder listing still allows project listing for this node.
        match self.hierarchy.list_child_projects(&node).await {
            Ok(projects) => {
                for project in projects {
                    match ResourceRef::project(project.id, node.id()) {
                        Ok(leaf) => {
                            if state.visited.insert(leaf.dedup_key()) {
                                Self::emit(&leaf, discoveries, state);
                            } else {
                                warn!(resource = %leaf, "resource discovered twice; skipping");
                            }
                        }
                        Err(error) => {
                            warn!(parent = %node, error = %error, "hierarchy API returned invalid project id");
                            state.outcome.listing_errors =
                                state.outcome.listing_errors.saturating_add(1);
                        }
                    }
                }
            }
            Err(error) => {
                warn!(
                    parent = %node,
                    category = error.kind.as_str(),
                    error = %error,
                    "project listing failed; abandoning projects under this node"
                );
                state.outcome.listing_errors = state.outcome.listing_errors.saturating_add(1);
            }
        }
    }

    fn emit(
        node: &ResourceRef,
        discoveries: &UnboundedSender<ResourceRef>,
        state: &mut WalkState,
    ) -> bool {
        if discoveries.send(node.clone()).is_err() {
            warn!(resource = %node, "discovery queue closed; abandoning traversal");
            state.queue_closed = true;
            state.outcome.abandoned_subtrees = state.outcome.abandoned_subtrees.saturating_add(1);
            return false;
        }

        debug!(resource = %node, "resource discovered");
        state.outcome.discovered = state.outcome.discovered.saturating_add(1);
        true
    }
}
