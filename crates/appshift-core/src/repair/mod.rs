//! Mutating repairs: ownership, nested-set trees and the live schema.
//!
//! Every repair returns a structured report of what it changed. Per-item
//! problems are reported in the outcome; only an unreachable store aborts.

mod ownership;
mod schema;
mod tree;

pub use ownership::{
    inspect_ownership, InconsistencyReason, OrphanAction, OrphanOutcome, OrphanResolutionReport,
    OwnershipFinding, OwnershipResolver, ResolveOutcome, ResolveStatus, RestoreOutcome,
};
pub use schema::{
    expected_columns, ApplyFailure, ExtraColumn, MissingColumn, MissingTable, OrphanTable,
    SchemaApplyReport, SchemaDiff, SchemaReconciler,
};
pub use tree::{
    plan_repair, synthetic_root_name, verify_rows, TreeAssignment, TreeRepairReport, TreeRepairer,
    TreeViolation,
};
