//! Declared-vs-live schema reconciliation.
//!
//! Diffing is read-only. Applying a diff is additive: tables and nullable
//! columns are created, nothing is ever dropped or narrowed, and orphan
//! tables are only reported.

use crate::config::{SchemaConfig, TreeConfig};
use crate::definitions::{entity_for_table, table_name, ColumnType, EntityDefinition};
use crate::site::{Catalog, SiteContext};
use crate::{Result, ShiftError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// An entity whose backing table does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingTable {
    pub entity: String,
    pub table: String,
    pub columns: Vec<(String, ColumnType)>,
}

/// A declared column missing from an existing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingColumn {
    pub entity: String,
    pub table: String,
    pub column: String,
    pub column_type: ColumnType,
}

/// A backing table with no matching definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanTable {
    pub table: String,
    pub entity: Option<String>,
}

/// A live column that no field declares. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraColumn {
    pub entity: String,
    pub table: String,
    pub column: String,
    pub declared_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub namespace: String,
    pub missing_tables: Vec<MissingTable>,
    pub missing_columns: Vec<MissingColumn>,
    pub orphan_tables: Vec<OrphanTable>,
    pub extra_columns: Vec<ExtraColumn>,
}

impl SchemaDiff {
    /// No missing tables or columns. Orphans and extras don't count.
    pub fn is_clean(&self) -> bool {
        self.missing_tables.is_empty() && self.missing_columns.is_empty()
    }

    pub fn has_missing_table(&self, entity: &str) -> bool {
        self.missing_tables.iter().any(|t| t.entity == entity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyFailure {
    pub target: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaApplyReport {
    pub tables_created: Vec<String>,
    /// `table.column` for every column added.
    pub columns_added: Vec<String>,
    pub failures: Vec<ApplyFailure>,
    /// Orphan tables carried over from the diff, untouched.
    pub orphan_tables: Vec<OrphanTable>,
}

/// Columns the live table must have for `entity` (excluding `name`).
pub fn expected_columns(entity: &EntityDefinition) -> Vec<(String, ColumnType)> {
    let mut columns: Vec<(String, ColumnType)> = Vec::new();
    let mut seen = HashSet::new();

    for field in entity.effective_fields() {
        if field.fieldname == SchemaConfig::NAME_COLUMN {
            continue;
        }
        if let Some(column_type) = field.column_type() {
            if seen.insert(field.fieldname.clone()) {
                columns.push((field.fieldname.clone(), column_type));
            }
        }
    }

    if entity.is_tree {
        for (column, column_type) in [
            (TreeConfig::LEFT_COLUMN, ColumnType::Integer),
            (TreeConfig::RIGHT_COLUMN, ColumnType::Integer),
            (TreeConfig::PARENT_COLUMN, ColumnType::Text),
            (TreeConfig::PREVIOUS_PARENT_COLUMN, ColumnType::Text),
        ] {
            if seen.insert(column.to_string()) {
                columns.push((column.to_string(), column_type));
            }
        }
    }

    columns
}

/// Diffs and repairs the live schema of one site.
pub struct SchemaReconciler<'a> {
    site: &'a SiteContext,
}

impl<'a> SchemaReconciler<'a> {
    pub fn new(site: &'a SiteContext) -> Self {
        Self { site }
    }

    pub fn diff(&self, namespace: &str) -> Result<SchemaDiff> {
        let catalog = self.site.catalog()?;
        self.diff_catalog(&catalog, namespace)
    }

    /// Diff against an already-built catalog.
    ///
    /// Only entities with a definition document are declared; an entity
    /// known only to the live store has its table reported as an orphan.
    pub fn diff_catalog(&self, catalog: &Catalog, namespace: &str) -> Result<SchemaDiff> {
        let store = self.site.store();
        let mut diff = SchemaDiff {
            namespace: namespace.to_string(),
            ..Default::default()
        };

        for entity in catalog.touching_namespace(namespace) {
            if !entity.has_table() || catalog.index.document(&entity.name).is_none() {
                continue;
            }
            let table = table_name(&entity.name);
            let expected = expected_columns(entity);

            if !store.table_exists(&table)? {
                diff.missing_tables.push(MissingTable {
                    entity: entity.name.clone(),
                    table,
                    columns: expected,
                });
                continue;
            }

            let live = store.table_columns(&table)?;
            let live_names: HashSet<&str> = live.iter().map(|c| c.name.as_str()).collect();
            for (column, column_type) in &expected {
                if !live_names.contains(column.as_str()) {
                    diff.missing_columns.push(MissingColumn {
                        entity: entity.name.clone(),
                        table: table.clone(),
                        column: column.clone(),
                        column_type: *column_type,
                    });
                }
            }

            let expected_names: HashSet<&str> = expected.iter().map(|(c, _)| c.as_str()).collect();
            for column in &live {
                if column.name != SchemaConfig::NAME_COLUMN
                    && !expected_names.contains(column.name.as_str())
                {
                    diff.extra_columns.push(ExtraColumn {
                        entity: entity.name.clone(),
                        table: table.clone(),
                        column: column.name.clone(),
                        declared_type: column.declared_type.clone(),
                    });
                }
            }
        }

        for table in store.backing_tables()? {
            let Some(entity) = entity_for_table(&table) else {
                continue;
            };
            if catalog.index.document(entity).is_some() {
                continue;
            }
            let owner = catalog.get(entity).and_then(|e| e.namespace.as_deref());
            if owner.is_none() || owner == Some(namespace) {
                diff.orphan_tables.push(OrphanTable {
                    entity: catalog.get(entity).map(|e| e.name.clone()),
                    table,
                });
            }
        }

        Ok(diff)
    }

    /// Create every missing table and column in `diff`.
    ///
    /// Failures are per item. A connectivity failure aborts the call.
    pub fn apply(&self, diff: &SchemaDiff) -> Result<SchemaApplyReport> {
        let store = self.site.store();
        let mut report = SchemaApplyReport {
            orphan_tables: diff.orphan_tables.clone(),
            ..Default::default()
        };

        for missing in &diff.missing_tables {
            match store.create_table(&missing.table, &missing.columns) {
                Ok(()) => report.tables_created.push(missing.table.clone()),
                Err(e) => record_failure(&mut report, &missing.table, e)?,
            }
        }

        for missing in &diff.missing_columns {
            let target = format!("{}.{}", missing.table, missing.column);
            match store.add_column(&missing.table, &missing.column, missing.column_type) {
                Ok(()) => report.columns_added.push(target),
                Err(e) => record_failure(&mut report, &target, e)?,
            }
        }

        for orphan in &diff.orphan_tables {
            warn!("Orphan table {} left in place", orphan.table);
        }

        info!(
            "Schema apply for {}: {} tables created, {} columns added, {} failures",
            diff.namespace,
            report.tables_created.len(),
            report.columns_added.len(),
            report.failures.len()
        );
        Ok(report)
    }
}

fn record_failure(report: &mut SchemaApplyReport, target: &str, err: ShiftError) -> Result<()> {
    if err.is_connectivity() {
        return Err(err);
    }
    warn!("Schema apply failed for {}: {}", target, err);
    report.failures.push(ApplyFailure {
        target: target.to_string(),
        error: err.to_string(),
    });
    Ok(())
}
