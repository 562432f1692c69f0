//! Read-only analyzers: provenance classification and the reference graph.
//!
//! Neither analyzer raises for data defects; defects come back as findings.

mod classifier;
mod graph;

pub use classifier::{
    classify, classify_all, ownership_consistent, Classification, ClassificationDetail,
    ClassificationReport,
};
pub use graph::{
    build_graph, DynamicLink, GraphNode, GraphReport, Reference, ReferenceEdge, ReferenceGraph,
};
