//! Co-change bookkeeping for a single repository: the file co-change graph,
//! per-file ownership, and bounded neighborhood exploration over the graph.

mod cochange;
mod explore;
mod ownership;

pub use cochange::{CoChangeGraph, CoChangeScore, FileNode, IngestOutcome, Neighbor, jaccard};
pub use explore::{ExploreEdge, ExploreRequest, ExploreResult, ExploreVertex, explore};
pub use ownership::{FileActivity, OwnerStats, OwnershipTracker};
