//! Node identity on spans
//!
//! Several nodes often share one process (tests, local simulations). Every
//! background loop runs inside a [`node_span`], so its events name the node
//! even after the task moves between threads.

use raggy_core::NodeId;
use tracing::Span;

/// Span identifying a node and one of its tasks
///
/// Created under the caller's current span, so a loop started from
/// `RaggyNode::start` also carries the node's session span.
pub fn node_span(node_id: &NodeId, task: &'static str) -> Span {
    tracing::info_span!("node", node = %node_id.short_id(), task)
}
