//! Site handle passed to every component, and the merged entity catalog.
//!
//! There is no global connection: analyzers and repairers receive a
//! `&SiteContext` and read what they need through it.

use crate::config::{PathsConfig, SchemaConfig, SessionConfig};
use crate::definitions::{DefinitionDocument, DefinitionIndex, DefinitionRepository, EntityDefinition};
use crate::store::{EntityMeta, LiveSchema, ModuleRegistry};
use crate::{Result, ShiftError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Runtime options shared by every component of a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteOptions {
    /// Namespace receiving restored definitions that record none.
    pub fallback_namespace: String,
    /// Module receiving restored definitions that record none.
    pub fallback_module: String,
    /// Keep `.bak` copies of rewritten documents and session records.
    pub keep_backups: bool,
}

impl Default for SiteOptions {
    fn default() -> Self {
        Self {
            fallback_namespace: SchemaConfig::DEFAULT_FALLBACK_NAMESPACE.to_string(),
            fallback_module: SchemaConfig::DEFAULT_FALLBACK_MODULE.to_string(),
            keep_backups: SessionConfig::KEEP_BACKUP,
        }
    }
}

/// Explicit handle to one site: definition files, live store and options.
pub struct SiteContext {
    root: PathBuf,
    repository: DefinitionRepository,
    store: Arc<LiveSchema>,
    options: SiteOptions,
}

impl SiteContext {
    /// Open the site rooted at `root`, creating the live store if needed.
    pub fn open(root: impl Into<PathBuf>, options: SiteOptions) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ShiftError::Config {
                message: format!("Site root is not a directory: {}", root.display()),
            });
        }

        let store = LiveSchema::open(root.join(PathsConfig::DATABASE_FILENAME))?;
        let repository = DefinitionRepository::new(root.join(PathsConfig::APPS_DIR_NAME))
            .with_backups(options.keep_backups);

        Ok(Self {
            root,
            repository,
            store: Arc::new(store),
            options,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repository(&self) -> &DefinitionRepository {
        &self.repository
    }

    pub fn store(&self) -> &LiveSchema {
        &self.store
    }

    pub fn options(&self) -> &SiteOptions {
        &self.options
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root
            .join(PathsConfig::STATE_DIR_NAME)
            .join(PathsConfig::SESSIONS_DIR_NAME)
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.root
            .join(PathsConfig::STATE_DIR_NAME)
            .join(PathsConfig::PLANS_DIR_NAME)
    }

    /// Build a fresh catalog. Never cached: every pass sees current state.
    pub fn catalog(&self) -> Result<Catalog> {
        let index = self.repository.scan()?;
        let metas = self.store.all_entity_meta()?;
        let mut customizations = self.store.all_customizations()?;
        let modules = self.store.module_registry()?;

        let mut entities = BTreeMap::new();
        for meta in metas {
            let mut entity = merge_entity(&meta, index.document(&meta.name));
            entity.customizations = customizations.remove(&meta.name).unwrap_or_default();
            entities.insert(meta.name.clone(), entity);
        }

        // Documents with no live metadata row: ownership unknown.
        for name in index.names() {
            if entities.contains_key(name) {
                continue;
            }
            if let Some(document) = index.document(name) {
                let mut entity = EntityDefinition::new(name);
                entity.module = Some(document.module.clone());
                entity.is_custom = document.is_custom;
                entity.is_tree = document.is_tree;
                entity.is_embedded = document.is_embedded;
                entity.fields = document.fields.clone();
                entity.customizations = customizations.remove(name).unwrap_or_default();
                entities.insert(name.to_string(), entity);
            }
        }

        debug!(
            "Catalog built: {} entities, {} documents, {} modules",
            entities.len(),
            index.len(),
            modules.len()
        );

        Ok(Catalog {
            entities,
            index,
            modules,
        })
    }
}

/// Merge a metadata row with its definition document, if any.
pub(crate) fn merge_entity(meta: &EntityMeta, document: Option<&DefinitionDocument>) -> EntityDefinition {
    let mut entity = EntityDefinition::new(&meta.name);
    entity.namespace = meta.namespace.clone();
    entity.module = meta.module.clone();
    entity.is_custom = meta.is_custom;
    entity.is_tree = meta.is_tree;
    entity.is_embedded = meta.is_embedded;
    if let Some(document) = document {
        entity.fields = document.fields.clone();
        entity.is_custom |= document.is_custom;
        entity.is_tree |= document.is_tree;
        entity.is_embedded |= document.is_embedded;
    }
    entity
}

/// Point-in-time merged view of every entity on the site.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub entities: BTreeMap<String, EntityDefinition>,
    pub index: DefinitionIndex,
    pub modules: ModuleRegistry,
}

impl Catalog {
    pub fn get(&self, name: &str) -> Option<&EntityDefinition> {
        self.entities.get(name)
    }

    /// Entities whose recorded owner is `namespace`.
    pub fn in_namespace<'a>(
        &'a self,
        namespace: &'a str,
    ) -> impl Iterator<Item = &'a EntityDefinition> + 'a {
        self.entities
            .values()
            .filter(move |e| e.namespace.as_deref() == Some(namespace))
    }

    /// Entities that belong to `namespace` by record or by file location.
    pub fn touching_namespace<'a>(
        &'a self,
        namespace: &'a str,
    ) -> impl Iterator<Item = &'a EntityDefinition> + 'a {
        self.entities.values().filter(move |e| {
            e.namespace.as_deref() == Some(namespace)
                || self
                    .index
                    .location(&e.name)
                    .is_some_and(|loc| loc.namespace == namespace)
        })
    }

    pub fn module_namespaces(&self, module: &str) -> &[String] {
        self.modules.get(module).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Modules declared under `namespace`.
    pub fn modules_of(&self, namespace: &str) -> Vec<String> {
        self.modules
            .iter()
            .filter(|(_, namespaces)| namespaces.iter().any(|n| n == namespace))
            .map(|(module, _)| module.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{ColumnType, FieldDefinition};
    use tempfile::TempDir;

    #[test]
    fn test_open_rejects_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let result = SiteContext::open(temp_dir.path().join("nope"), SiteOptions::default());
        assert!(matches!(result, Err(ShiftError::Config { .. })));
    }

    #[test]
    fn test_catalog_merges_meta_and_documents() {
        let temp_dir = TempDir::new().unwrap();
        let site = SiteContext::open(temp_dir.path(), SiteOptions::default()).unwrap();

        let mut meta = EntityMeta::new("Order");
        meta.namespace = Some("A".into());
        meta.module = Some("selling".into());
        site.store().upsert_entity_meta(&meta).unwrap();
        site.store().declare_module("selling", "A").unwrap();

        let doc = EntityDefinition::new("Order")
            .with_field(FieldDefinition::scalar("title", ColumnType::Text))
            .to_document("selling");
        site.repository().write("A", &doc).unwrap();

        let stray = EntityDefinition::new("Stray").to_document("misc");
        site.repository().write("B", &stray).unwrap();

        let catalog = site.catalog().unwrap();
        assert_eq!(catalog.entities.len(), 2);
        assert_eq!(catalog.get("Order").unwrap().fields.len(), 1);
        assert_eq!(catalog.get("Stray").unwrap().namespace, None);
        assert_eq!(catalog.in_namespace("A").count(), 1);
        assert_eq!(catalog.touching_namespace("B").count(), 1);
        assert_eq!(catalog.modules_of("A"), vec!["selling"]);
    }
}
