//! Repair methods: schema, ownership and nested-set trees.

use crate::error::Result;
use crate::repair::{
    OwnershipFinding, OwnershipResolver, ResolveOutcome, SchemaReconciler, TreeRepairer,
};
use crate::{
    OrphanResolutionReport, RestoreOutcome, SchemaApplyReport, SchemaDiff, ShiftApi,
    TreeRepairReport, TreeViolation,
};

impl ShiftApi {
    // ========================================
    // Live schema
    // ========================================

    /// Compare the declared definitions of `namespace` with the live schema.
    pub fn diff_schema(&self, namespace: &str) -> Result<SchemaDiff> {
        self.require_namespace(namespace)?;
        SchemaReconciler::new(&self.site).diff(namespace)
    }

    /// Apply the additive part of a diff. Orphan tables are only reported.
    pub fn apply_schema(&self, diff: &SchemaDiff) -> Result<SchemaApplyReport> {
        SchemaReconciler::new(&self.site).apply(diff)
    }

    // ========================================
    // Ownership
    // ========================================

    pub fn find_inconsistent(&self, namespace: &str) -> Result<Vec<OwnershipFinding>> {
        self.require_namespace(namespace)?;
        OwnershipResolver::new(&self.site).find_inconsistent(namespace)
    }

    /// Make one entity's recorded owner agree with its module's declaring
    /// namespace.
    pub fn resolve(&self, entity: &str) -> Result<ResolveOutcome> {
        OwnershipResolver::new(&self.site).resolve(entity)
    }

    /// Rebuild a missing definition document from the live table.
    pub fn restore_missing(&self, entity: &str) -> Result<RestoreOutcome> {
        OwnershipResolver::new(&self.site).restore_missing(entity)
    }

    pub fn resolve_orphans(&self, namespace: &str) -> Result<OrphanResolutionReport> {
        self.require_namespace(namespace)?;
        OwnershipResolver::new(&self.site).resolve_orphans(namespace)
    }

    // ========================================
    // Trees
    // ========================================

    pub fn repair_tree(&self, entity: &str) -> Result<TreeRepairReport> {
        TreeRepairer::new(&self.site).repair(entity)
    }

    /// Nested-set violations currently present. Empty when the tree is sound.
    pub fn verify_tree(&self, entity: &str) -> Result<Vec<TreeViolation>> {
        TreeRepairer::new(&self.site).verify(entity)
    }

    pub fn tree_descendants(&self, entity: &str, node: &str) -> Result<Vec<String>> {
        TreeRepairer::new(&self.site).descendants(entity, node)
    }
}
