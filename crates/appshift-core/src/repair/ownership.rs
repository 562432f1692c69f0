//! Ownership resolution: detect and repair entities whose recorded
//! namespace/module disagrees with where their definition actually lives,
//! and reconstruct definition files that are missing altogether.
//!
//! # Resolution
//!
//! The module physically containing the definition decides. If that module
//! is declared under exactly one namespace the entity is re-owned to it; if
//! it is declared under several (a configuration defect) or none, the entity
//! is reported as a conflict and left untouched.

use crate::config::SchemaConfig;
use crate::definitions::{
    table_name, ColumnType, CustomizationKind, DefinitionLocation, EntityDefinition,
    FieldDefinition,
};
use crate::site::{Catalog, SiteContext};
use crate::store::{EntityMeta, ModuleRegistry};
use crate::{Result, ShiftError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Why an entity's ownership is considered inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InconsistencyReason {
    /// Owning namespace is null.
    MissingNamespace,
    /// Recorded in the live store but no definition file exists.
    MissingDefinition,
    /// The definition file lives under another namespace.
    NamespaceMismatch { recorded: String, physical: String },
    /// The file's module is not declared under the recorded namespace.
    ModuleNotDeclared { module: String, namespace: String },
    /// Recorded module differs from the module containing the file.
    ModuleMismatch { recorded: Option<String>, physical: String },
}

/// One inconsistent entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipFinding {
    pub entity: String,
    pub recorded_namespace: Option<String>,
    pub recorded_module: Option<String>,
    pub location: Option<DefinitionLocation>,
    pub reasons: Vec<InconsistencyReason>,
}

impl OwnershipFinding {
    pub fn is_missing_definition(&self) -> bool {
        self.reasons.contains(&InconsistencyReason::MissingDefinition)
    }
}

/// Check one entity against its physical location and the module registry.
pub fn inspect_ownership(
    entity: &EntityDefinition,
    location: Option<&DefinitionLocation>,
    modules: &ModuleRegistry,
) -> Vec<InconsistencyReason> {
    let mut reasons = Vec::new();

    let Some(location) = location else {
        if entity.namespace.is_none() {
            reasons.push(InconsistencyReason::MissingNamespace);
        }
        reasons.push(InconsistencyReason::MissingDefinition);
        return reasons;
    };

    match entity.namespace.as_deref() {
        None => reasons.push(InconsistencyReason::MissingNamespace),
        Some(namespace) => {
            if location.namespace != namespace {
                reasons.push(InconsistencyReason::NamespaceMismatch {
                    recorded: namespace.to_string(),
                    physical: location.namespace.clone(),
                });
            }
            let declared = modules
                .get(&location.module)
                .is_some_and(|namespaces| namespaces.iter().any(|n| n == namespace));
            if !declared {
                reasons.push(InconsistencyReason::ModuleNotDeclared {
                    module: location.module.clone(),
                    namespace: namespace.to_string(),
                });
            }
        }
    }

    if entity.module.as_deref() != Some(location.module.as_str()) {
        reasons.push(InconsistencyReason::ModuleMismatch {
            recorded: entity.module.clone(),
            physical: location.module.clone(),
        });
    }

    reasons
}

/// Outcome of resolving one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStatus {
    Resolved,
    AlreadyConsistent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveOutcome {
    pub entity: String,
    pub status: ResolveStatus,
    pub namespace: String,
    pub module: String,
    /// The definition file was moved into the declaring namespace.
    pub moved_definition: bool,
}

/// Result of reconstructing a missing definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub entity: String,
    pub namespace: String,
    pub module: String,
    pub path: PathBuf,
    pub fields: Vec<String>,
    /// The fallback namespace or module was used.
    pub used_fallback: bool,
    /// A definition already existed; nothing was written.
    pub already_present: bool,
}

/// Per-entity action taken by [`OwnershipResolver::resolve_orphans`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanAction {
    Resolved,
    Restored,
    AlreadyConsistent,
    Conflict,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanOutcome {
    pub entity: String,
    pub action: OrphanAction,
    pub namespace: Option<String>,
    pub module: Option<String>,
    pub message: Option<String>,
}

/// Summary of a namespace-wide orphan resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanResolutionReport {
    pub namespace: String,
    pub outcomes: Vec<OrphanOutcome>,
    pub resolved: usize,
    pub restored: usize,
    pub conflicts: usize,
    pub failed: usize,
}

impl OrphanResolutionReport {
    pub fn outcome(&self, entity: &str) -> Option<&OrphanOutcome> {
        self.outcomes.iter().find(|o| o.entity == entity)
    }

    fn push(&mut self, outcome: OrphanOutcome) {
        match outcome.action {
            OrphanAction::Resolved => self.resolved += 1,
            OrphanAction::Restored => self.restored += 1,
            OrphanAction::Conflict => self.conflicts += 1,
            OrphanAction::Failed => self.failed += 1,
            OrphanAction::AlreadyConsistent => {}
        }
        self.outcomes.push(outcome);
    }
}

/// Detects and repairs ownership defects on one site.
pub struct OwnershipResolver<'a> {
    site: &'a SiteContext,
}

impl<'a> OwnershipResolver<'a> {
    pub fn new(site: &'a SiteContext) -> Self {
        Self { site }
    }

    /// Entities in `namespace` whose ownership is inconsistent.
    ///
    /// An entity is in scope when it records `namespace`, its definition file
    /// lives there, or it records no namespace but its module is declared there.
    pub fn find_inconsistent(&self, namespace: &str) -> Result<Vec<OwnershipFinding>> {
        let catalog = self.site.catalog()?;
        Ok(find_in_catalog(&catalog, namespace))
    }

    /// Resolve one entity from the module that physically holds its definition.
    pub fn resolve(&self, entity: &str) -> Result<ResolveOutcome> {
        let catalog = self.site.catalog()?;
        self.resolve_in(&catalog, entity)
    }

    fn resolve_in(&self, catalog: &Catalog, name: &str) -> Result<ResolveOutcome> {
        let entity = catalog.get(name).ok_or_else(|| ShiftError::EntityNotFound {
            name: name.to_string(),
        })?;
        let location = catalog.index.location(name).ok_or_else(|| ShiftError::StructuralDefect {
            entity: name.to_string(),
            message: "no definition file to resolve ownership from".to_string(),
        })?;

        if inspect_ownership(entity, Some(location), &catalog.modules).is_empty() {
            debug!("{} already consistent, nothing to resolve", name);
            return Ok(ResolveOutcome {
                entity: name.to_string(),
                status: ResolveStatus::AlreadyConsistent,
                namespace: location.namespace.clone(),
                module: location.module.clone(),
                moved_definition: false,
            });
        }

        let module = location.module.clone();
        let namespace = match catalog.module_namespaces(&module) {
            [only] => only.clone(),
            [] => {
                return Err(ShiftError::validation(
                    name,
                    format!("module {} is not declared under any namespace", module),
                ))
            }
            several => {
                return Err(ShiftError::validation(
                    name,
                    format!(
                        "module {} is declared under several namespaces: {}",
                        module,
                        several.join(", ")
                    ),
                ))
            }
        };

        let repository = self.site.repository();
        let mut moved_definition = false;
        if location.namespace != namespace {
            repository.move_definition(name, location, &namespace, &module)?;
            repository.prune_module_dir(&location.namespace, &module);
            moved_definition = true;
        } else {
            repository.set_document_module(location, &module)?;
        }

        let store = self.site.store();
        match store.entity_meta(name)? {
            Some(_) => store.set_ownership(name, &namespace, &module)?,
            None => {
                let mut meta = EntityMeta::new(name);
                meta.namespace = Some(namespace.clone());
                meta.module = Some(module.clone());
                meta.is_custom = entity.is_custom;
                meta.is_tree = entity.is_tree;
                meta.is_embedded = entity.is_embedded;
                store.upsert_entity_meta(&meta)?;
            }
        }

        info!("Resolved ownership of {} to {}/{}", name, namespace, module);
        Ok(ResolveOutcome {
            entity: name.to_string(),
            status: ResolveStatus::Resolved,
            namespace,
            module,
            moved_definition,
        })
    }

    /// Reconstruct a minimal definition file for an entity recorded in the
    /// live store but missing on disk.
    pub fn restore_missing(&self, entity: &str) -> Result<RestoreOutcome> {
        let catalog = self.site.catalog()?;
        self.restore_in(&catalog, entity)
    }

    fn restore_in(&self, catalog: &Catalog, name: &str) -> Result<RestoreOutcome> {
        let store = self.site.store();
        let meta = store.entity_meta(name)?.ok_or_else(|| ShiftError::EntityNotFound {
            name: name.to_string(),
        })?;

        if let Some(location) = catalog.index.location(name) {
            return Ok(RestoreOutcome {
                entity: name.to_string(),
                namespace: location.namespace.clone(),
                module: location.module.clone(),
                path: location.path.clone(),
                fields: Vec::new(),
                used_fallback: false,
                already_present: true,
            });
        }

        let options = self.site.options();
        let mut used_fallback = false;

        let module = match meta.module.clone() {
            Some(module) => module,
            None => {
                used_fallback = true;
                options.fallback_module.clone()
            }
        };
        let namespace = match (meta.namespace.clone(), catalog.module_namespaces(&module)) {
            (Some(namespace), _) => namespace,
            (None, [only]) => only.clone(),
            (None, _) => {
                used_fallback = true;
                options.fallback_namespace.clone()
            }
        };

        let declared = catalog.module_namespaces(&module);
        let declare_module = declared.is_empty();
        if !declare_module && !declared.iter().any(|n| n == &namespace) {
            return Err(ShiftError::validation(
                name,
                format!(
                    "module {} is declared under {}, not {}",
                    module,
                    declared.join(", "),
                    namespace
                ),
            ));
        }

        let fields = self.fields_from_table(name, &meta, catalog)?;
        let mut definition = EntityDefinition::new(name);
        definition.is_custom = meta.is_custom;
        definition.is_embedded = meta.is_embedded;
        definition.is_tree = meta.is_tree;
        definition.fields = fields;

        let location = self
            .site
            .repository()
            .write(&namespace, &definition.to_document(&module))?;

        if !store.has_namespace(&namespace)? {
            store.add_namespace(&namespace)?;
        }
        if declare_module {
            store.declare_module(&module, &namespace)?;
        }
        if meta.namespace.as_deref() != Some(namespace.as_str())
            || meta.module.as_deref() != Some(module.as_str())
        {
            store.set_ownership(name, &namespace, &module)?;
        }

        info!(
            "Restored definition for {} under {}/{} ({} fields)",
            name,
            namespace,
            module,
            definition.fields.len()
        );

        Ok(RestoreOutcome {
            entity: name.to_string(),
            namespace,
            module,
            path: location.path,
            fields: definition.fields.iter().map(|f| f.fieldname.clone()).collect(),
            used_fallback,
            already_present: false,
        })
    }

    /// Declared fields reconstructed from live columns. Platform columns and
    /// columns owned by added-field customizations are left out.
    fn fields_from_table(
        &self,
        name: &str,
        meta: &EntityMeta,
        catalog: &Catalog,
    ) -> Result<Vec<FieldDefinition>> {
        let store = self.site.store();
        let table = table_name(name);
        if !store.table_exists(&table)? {
            if meta.is_embedded {
                return Ok(Vec::new());
            }
            return Err(ShiftError::StructuralDefect {
                entity: name.to_string(),
                message: format!("no definition file and no table {} to restore from", table),
            });
        }

        let customized: BTreeSet<String> = catalog
            .get(name)
            .map(|e| {
                e.customizations
                    .iter()
                    .filter_map(|c| match &c.kind {
                        CustomizationKind::AddedField { field } => Some(field.fieldname.clone()),
                        CustomizationKind::PropertyOverride { .. } => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(store
            .table_columns(&table)?
            .into_iter()
            .filter(|c| !SchemaConfig::is_standard_column(&c.name) && !customized.contains(&c.name))
            .map(|c| FieldDefinition::scalar(c.name, ColumnType::from_sql_type(&c.declared_type)))
            .collect())
    }

    /// Detect, resolve and restore every inconsistent entity in `namespace`.
    ///
    /// Conflicts and per-entity failures are reported as outcomes. Only a
    /// connectivity failure aborts the pass.
    pub fn resolve_orphans(&self, namespace: &str) -> Result<OrphanResolutionReport> {
        let catalog = self.site.catalog()?;
        let findings = find_in_catalog(&catalog, namespace);
        let mut report = OrphanResolutionReport {
            namespace: namespace.to_string(),
            ..Default::default()
        };

        for finding in &findings {
            let outcome = if finding.is_missing_definition() {
                self.restore_in(&catalog, &finding.entity).map(|r| OrphanOutcome {
                    entity: r.entity,
                    action: if r.already_present {
                        OrphanAction::AlreadyConsistent
                    } else {
                        OrphanAction::Restored
                    },
                    namespace: Some(r.namespace),
                    module: Some(r.module),
                    message: r.used_fallback.then(|| "restored into fallback".to_string()),
                })
            } else {
                self.resolve_in(&catalog, &finding.entity).map(|r| OrphanOutcome {
                    entity: r.entity,
                    action: match r.status {
                        ResolveStatus::Resolved => OrphanAction::Resolved,
                        ResolveStatus::AlreadyConsistent => OrphanAction::AlreadyConsistent,
                    },
                    namespace: Some(r.namespace),
                    module: Some(r.module),
                    message: r.moved_definition.then(|| "definition moved".to_string()),
                })
            };

            match outcome {
                Ok(outcome) => report.push(outcome),
                Err(e) if e.is_connectivity() => return Err(e),
                Err(e) => {
                    warn!("Could not resolve {}: {}", finding.entity, e);
                    let action = match e {
                        ShiftError::Validation { .. } => OrphanAction::Conflict,
                        _ => OrphanAction::Failed,
                    };
                    report.push(OrphanOutcome {
                        entity: finding.entity.clone(),
                        action,
                        namespace: finding.recorded_namespace.clone(),
                        module: finding.recorded_module.clone(),
                        message: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            "Orphan resolution for {}: {} resolved, {} restored, {} conflicts, {} failed",
            namespace, report.resolved, report.restored, report.conflicts, report.failed
        );
        Ok(report)
    }
}

fn find_in_catalog(catalog: &Catalog, namespace: &str) -> Vec<OwnershipFinding> {
    let declared_here: BTreeSet<String> = catalog.modules_of(namespace).into_iter().collect();

    catalog
        .entities
        .values()
        .filter(|entity| {
            let location = catalog.index.location(&entity.name);
            entity.namespace.as_deref() == Some(namespace)
                || location.is_some_and(|l| l.namespace == namespace)
                || (entity.namespace.is_none()
                    && location.is_none()
                    && entity.module.as_ref().is_some_and(|m| declared_here.contains(m)))
        })
        .filter_map(|entity| {
            let location = catalog.index.location(&entity.name);
            let reasons = inspect_ownership(entity, location, &catalog.modules);
            (!reasons.is_empty()).then(|| OwnershipFinding {
                entity: entity.name.clone(),
                recorded_namespace: entity.namespace.clone(),
                recorded_module: entity.module.clone(),
                location: location.cloned(),
                reasons,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::SiteOptions;
    use tempfile::TempDir;

    fn create_test_site() -> (SiteContext, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let site = SiteContext::open(temp_dir.path(), SiteOptions::default()).unwrap();
        (site, temp_dir)
    }

    fn record(site: &SiteContext, name: &str, namespace: Option<&str>, module: Option<&str>) {
        let mut meta = EntityMeta::new(name);
        meta.namespace = namespace.map(str::to_string);
        meta.module = module.map(str::to_string);
        site.store().upsert_entity_meta(&meta).unwrap();
    }

    #[test]
    fn test_inspect_ownership_reasons() {
        let mut modules = ModuleRegistry::new();
        modules.insert("billing".into(), vec!["legacy".into()]);
        let location = DefinitionLocation {
            namespace: "legacy".into(),
            module: "billing".into(),
            path: PathBuf::from("/apps/legacy/billing/x/x.json"),
        };

        let consistent = EntityDefinition::new("X").owned_by("legacy", "billing");
        assert!(inspect_ownership(&consistent, Some(&location), &modules).is_empty());

        let null_owner = EntityDefinition::new("X");
        let reasons = inspect_ownership(&null_owner, Some(&location), &modules);
        assert!(reasons.contains(&InconsistencyReason::MissingNamespace));

        let wrong_module = EntityDefinition::new("X").owned_by("legacy", "selling");
        let reasons = inspect_ownership(&wrong_module, Some(&location), &modules);
        assert_eq!(
            reasons,
            vec![InconsistencyReason::ModuleMismatch {
                recorded: Some("selling".into()),
                physical: "billing".into()
            }]
        );

        let reasons = inspect_ownership(&consistent, None, &modules);
        assert_eq!(reasons, vec![InconsistencyReason::MissingDefinition]);
    }

    #[test]
    fn test_resolve_null_namespace() {
        let (site, _temp) = create_test_site();
        site.store().declare_module("billing", "legacy").unwrap();
        record(&site, "Invoice Note", None, Some("billing"));
        site.repository()
            .write("legacy", &EntityDefinition::new("Invoice Note").to_document("billing"))
            .unwrap();

        let resolver = OwnershipResolver::new(&site);
        let outcome = resolver.resolve("Invoice Note").unwrap();
        assert_eq!(outcome.status, ResolveStatus::Resolved);
        assert_eq!(outcome.namespace, "legacy");

        let meta = site.store().entity_meta("Invoice Note").unwrap().unwrap();
        assert_eq!(meta.namespace.as_deref(), Some("legacy"));
        assert_eq!(meta.module.as_deref(), Some("billing"));

        // Second run is a no-op.
        let again = resolver.resolve("Invoice Note").unwrap();
        assert_eq!(again.status, ResolveStatus::AlreadyConsistent);
        let meta_again = site.store().entity_meta("Invoice Note").unwrap().unwrap();
        assert_eq!(meta_again, meta);
    }

    #[test]
    fn test_resolve_ambiguous_module_is_conflict() {
        let (site, _temp) = create_test_site();
        site.store().declare_module("billing", "legacy").unwrap();
        site.store().declare_module("billing", "core").unwrap();
        record(&site, "Invoice Note", None, Some("billing"));
        site.repository()
            .write("legacy", &EntityDefinition::new("Invoice Note").to_document("billing"))
            .unwrap();

        let err = OwnershipResolver::new(&site).resolve("Invoice Note").unwrap_err();
        match err {
            ShiftError::Validation { message, .. } => {
                assert!(message.contains("core"));
                assert!(message.contains("legacy"));
            }
            other => panic!("expected validation conflict, got {other:?}"),
        }
        let meta = site.store().entity_meta("Invoice Note").unwrap().unwrap();
        assert_eq!(meta.namespace, None);
    }

    #[test]
    fn test_resolve_undeclared_module_is_conflict() {
        let (site, _temp) = create_test_site();
        record(&site, "Loose", None, None);
        site.repository()
            .write("legacy", &EntityDefinition::new("Loose").to_document("nowhere"))
            .unwrap();
        let err = OwnershipResolver::new(&site).resolve("Loose").unwrap_err();
        assert!(matches!(err, ShiftError::Validation { .. }));
    }

    #[test]
    fn test_resolve_moves_misplaced_definition() {
        let (site, _temp) = create_test_site();
        site.store().declare_module("billing", "core").unwrap();
        record(&site, "Invoice", Some("legacy"), Some("billing"));
        site.repository()
            .write("legacy", &EntityDefinition::new("Invoice").to_document("billing"))
            .unwrap();

        let outcome = OwnershipResolver::new(&site).resolve("Invoice").unwrap();
        assert!(outcome.moved_definition);
        assert_eq!(outcome.namespace, "core");
        assert!(site
            .repository()
            .document_path("core", "billing", "Invoice")
            .exists());
        assert!(!site.repository().apps_root().join("legacy").join("billing").exists());
    }

    #[test]
    fn test_restore_missing_from_columns() {
        let (site, _temp) = create_test_site();
        site.store().declare_module("billing", "legacy").unwrap();
        record(&site, "Invoice Note", Some("legacy"), Some("billing"));
        site.store()
            .create_table(
                "tabInvoice Note",
                &[
                    ("note".into(), ColumnType::Text),
                    ("amount".into(), ColumnType::Real),
                ],
            )
            .unwrap();

        let outcome = OwnershipResolver::new(&site)
            .restore_missing("Invoice Note")
            .unwrap();
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.fields, vec!["note", "amount"]);
        assert!(outcome.path.ends_with("legacy/billing/invoice_note/invoice_note.json"));

        let document = site.repository().read(&outcome.path).unwrap();
        assert_eq!(document.module, "billing");
        assert_eq!(
            document.fields[1],
            FieldDefinition::scalar("amount", ColumnType::Real)
        );

        let again = OwnershipResolver::new(&site)
            .restore_missing("Invoice Note")
            .unwrap();
        assert!(again.already_present);
    }

    #[test]
    fn test_restore_missing_uses_fallback_module() {
        let (site, _temp) = create_test_site();
        record(&site, "Scratch", None, None);
        site.store().create_table("tabScratch", &[]).unwrap();

        let outcome = OwnershipResolver::new(&site).restore_missing("Scratch").unwrap();
        assert!(outcome.used_fallback);
        assert_eq!(outcome.namespace, SchemaConfig::DEFAULT_FALLBACK_NAMESPACE);
        assert_eq!(outcome.module, SchemaConfig::DEFAULT_FALLBACK_MODULE);
        assert_eq!(
            site.store()
                .module_namespaces(SchemaConfig::DEFAULT_FALLBACK_MODULE)
                .unwrap(),
            vec![SchemaConfig::DEFAULT_FALLBACK_NAMESPACE]
        );
    }

    #[test]
    fn test_restore_refuses_module_declared_elsewhere() {
        let (site, _temp) = create_test_site();
        site.store().declare_module("billing", "core").unwrap();
        record(&site, "Invoice Note", Some("legacy"), Some("billing"));
        site.store()
            .create_table("tabInvoice Note", &[("note".into(), ColumnType::Text)])
            .unwrap();

        let err = OwnershipResolver::new(&site)
            .restore_missing("Invoice Note")
            .unwrap_err();
        match err {
            ShiftError::Validation { message, .. } => assert!(message.contains("core")),
            other => panic!("expected validation conflict, got {other:?}"),
        }

        assert_eq!(
            site.store().module_namespaces("billing").unwrap(),
            vec!["core"]
        );
        assert!(!site
            .repository()
            .document_path("legacy", "billing", "Invoice Note")
            .exists());
        let meta = site.store().entity_meta("Invoice Note").unwrap().unwrap();
        assert_eq!(meta.namespace.as_deref(), Some("legacy"));
    }

    #[test]
    fn test_restore_refuses_slug_held_by_other_entity() {
        let (site, _temp) = create_test_site();
        site.store().declare_module("selling", "legacy").unwrap();
        record(&site, "Order Item", Some("legacy"), Some("selling"));
        site.repository()
            .write("legacy", &EntityDefinition::new("Order Item").to_document("selling"))
            .unwrap();
        record(&site, "Order-Item", Some("legacy"), Some("selling"));
        site.store().create_table("tabOrder-Item", &[]).unwrap();

        let err = OwnershipResolver::new(&site)
            .restore_missing("Order-Item")
            .unwrap_err();
        assert!(matches!(err, ShiftError::Validation { .. }));

        let path = site
            .repository()
            .document_path("legacy", "selling", "Order Item");
        assert_eq!(site.repository().read(&path).unwrap().name, "Order Item");
    }

    #[test]
    fn test_resolve_orphans_reports_each_item() {
        let (site, _temp) = create_test_site();
        site.store().declare_module("billing", "legacy").unwrap();
        site.store().declare_module("shared", "legacy").unwrap();
        site.store().declare_module("shared", "core").unwrap();

        record(&site, "Invoice Note", None, Some("billing"));
        site.repository()
            .write("legacy", &EntityDefinition::new("Invoice Note").to_document("billing"))
            .unwrap();

        record(&site, "Shared Thing", Some("legacy"), Some("billing"));
        site.repository()
            .write("legacy", &EntityDefinition::new("Shared Thing").to_document("shared"))
            .unwrap();

        record(&site, "Lost", Some("legacy"), Some("billing"));
        site.store().create_table("tabLost", &[]).unwrap();

        let report = OwnershipResolver::new(&site).resolve_orphans("legacy").unwrap();
        assert_eq!(report.resolved, 1);
        assert_eq!(report.restored, 1);
        assert_eq!(report.conflicts, 1);
        assert_eq!(
            report.outcome("Invoice Note").unwrap().action,
            OrphanAction::Resolved
        );
        assert_eq!(report.outcome("Lost").unwrap().action, OrphanAction::Restored);
        assert_eq!(
            report.outcome("Shared Thing").unwrap().action,
            OrphanAction::Conflict
        );

        assert!(OwnershipResolver::new(&site)
            .find_inconsistent("legacy")
            .unwrap()
            .iter()
            .all(|f| f.entity == "Shared Thing"));
    }
}
