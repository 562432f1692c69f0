//! File-backed definition repository.
//!
//! Layout: `<apps>/<namespace>/<module>/<entity-slug>/<entity-slug>.json`.
//! The namespace and module a document physically sits under is its
//! [`DefinitionLocation`], which may disagree with the ownership recorded in
//! the live store.

use crate::config::PathsConfig;
use crate::definitions::naming::entity_slug;
use crate::definitions::types::{DefinitionDocument, DefinitionLocation};
use crate::store::{atomic_read_json, atomic_write_json};
use crate::{Result, ShiftError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A definition document found under more than one path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateDefinition {
    pub entity: String,
    /// The path that was indexed.
    pub kept: PathBuf,
    pub ignored: PathBuf,
}

/// A document that could not be parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadableDefinition {
    pub path: PathBuf,
    pub error: String,
}

/// Result of scanning the apps tree: one location per entity name.
///
/// Lookups are hash-based so classifying N entities stays O(N).
#[derive(Debug, Clone, Default)]
pub struct DefinitionIndex {
    locations: HashMap<String, DefinitionLocation>,
    documents: HashMap<String, DefinitionDocument>,
    pub duplicates: Vec<DuplicateDefinition>,
    pub unreadable: Vec<UnreadableDefinition>,
}

impl DefinitionIndex {
    pub fn location(&self, entity: &str) -> Option<&DefinitionLocation> {
        self.locations.get(entity)
    }

    pub fn document(&self, entity: &str) -> Option<&DefinitionDocument> {
        self.documents.get(entity)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.locations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Record a document at a location (used by scans and by tests).
    pub fn insert(&mut self, location: DefinitionLocation, document: DefinitionDocument) {
        let name = document.name.clone();
        if let Some(existing) = self.locations.get(&name) {
            self.duplicates.push(DuplicateDefinition {
                entity: name,
                kept: existing.path.clone(),
                ignored: location.path,
            });
            return;
        }
        self.locations.insert(name.clone(), location);
        self.documents.insert(name, document);
    }
}

/// Reads, writes and moves definition documents under the apps root.
#[derive(Debug, Clone)]
pub struct DefinitionRepository {
    apps_root: PathBuf,
    keep_backup: bool,
}

impl DefinitionRepository {
    /// Create a repository rooted at `apps_root`.
    pub fn new(apps_root: impl Into<PathBuf>) -> Self {
        Self {
            apps_root: apps_root.into(),
            keep_backup: false,
        }
    }

    /// Keep `<doc>.json.bak` when a document is rewritten.
    pub fn with_backups(mut self, keep_backup: bool) -> Self {
        self.keep_backup = keep_backup;
        self
    }

    pub fn apps_root(&self) -> &Path {
        &self.apps_root
    }

    /// Path a document for `entity` gets under `namespace/module`.
    pub fn document_path(&self, namespace: &str, module: &str, entity: &str) -> PathBuf {
        let slug = entity_slug(entity);
        self.apps_root
            .join(namespace)
            .join(module)
            .join(&slug)
            .join(format!("{}.{}", slug, PathsConfig::DEFINITION_EXTENSION))
    }

    /// Walk the apps tree and index every definition document.
    ///
    /// Unparseable or duplicated documents are reported on the index rather
    /// than failing the scan.
    pub fn scan(&self) -> Result<DefinitionIndex> {
        let mut index = DefinitionIndex::default();
        if !self.apps_root.exists() {
            return Ok(index);
        }

        let walker = WalkDir::new(&self.apps_root)
            .min_depth(4)
            .max_depth(4)
            .sort_by_file_name();

        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            let Some((namespace, module)) = self.location_parts(path) else {
                continue;
            };

            match self.read(path) {
                Ok(document) => {
                    let location = DefinitionLocation {
                        namespace,
                        module,
                        path: path.to_path_buf(),
                    };
                    index.insert(location, document);
                }
                Err(e) => {
                    warn!("Skipping unreadable definition {}: {}", path.display(), e);
                    index.unreadable.push(UnreadableDefinition {
                        path: path.to_path_buf(),
                        error: e.to_string(),
                    });
                }
            }
        }

        debug!(
            "Indexed {} definitions under {}",
            index.len(),
            self.apps_root.display()
        );
        Ok(index)
    }

    /// Namespace and module for a document path, if it matches the layout.
    fn location_parts(&self, path: &Path) -> Option<(String, String)> {
        if path.extension()?.to_str()? != PathsConfig::DEFINITION_EXTENSION {
            return None;
        }
        let entity_dir = path.parent()?;
        if path.file_stem()? != entity_dir.file_name()? {
            return None;
        }
        let module_dir = entity_dir.parent()?;
        let namespace_dir = module_dir.parent()?;
        if namespace_dir.parent()? != self.apps_root.as_path() {
            return None;
        }
        Some((
            namespace_dir.file_name()?.to_string_lossy().to_string(),
            module_dir.file_name()?.to_string_lossy().to_string(),
        ))
    }

    /// Read one definition document.
    pub fn read(&self, path: &Path) -> Result<DefinitionDocument> {
        atomic_read_json(path)?.ok_or_else(|| ShiftError::FileNotFound(path.to_path_buf()))
    }

    /// Write `document` under `namespace`, using its own module for the path.
    pub fn write(&self, namespace: &str, document: &DefinitionDocument) -> Result<DefinitionLocation> {
        let path = self.document_path(namespace, &document.module, &document.name);
        self.ensure_slot_owner(&document.name, &path)?;
        atomic_write_json(&path, document, self.keep_backup)?;
        debug!("Wrote definition {} to {}", document.name, path.display());
        Ok(DefinitionLocation {
            namespace: namespace.to_string(),
            module: document.module.clone(),
            path,
        })
    }

    /// Move an entity's definition directory to `namespace/module`.
    ///
    /// Idempotent: if the source is gone and the destination exists, the
    /// move is considered done. The document's `module` is rewritten to match.
    pub fn move_definition(
        &self,
        entity: &str,
        from: &DefinitionLocation,
        namespace: &str,
        module: &str,
    ) -> Result<DefinitionLocation> {
        let dest_path = self.document_path(namespace, module, entity);
        let dest = DefinitionLocation {
            namespace: namespace.to_string(),
            module: module.to_string(),
            path: dest_path.clone(),
        };

        if from.path != dest_path {
            self.ensure_slot_owner(entity, &dest_path)?;
            let src_dir = from.entity_dir();
            let dest_dir = dest.entity_dir();

            match (src_dir.exists(), dest_dir.exists()) {
                (true, false) => {
                    move_directory(src_dir, dest_dir)?;
                    if let Some(module_dir) = src_dir.parent() {
                        remove_dir_if_empty(module_dir);
                    }
                }
                (false, true) => {
                    debug!("Definition for {} already at {}", entity, dest_dir.display());
                }
                (true, true) => {
                    return Err(ShiftError::validation(
                        entity,
                        format!(
                            "definition exists at both {} and {}",
                            src_dir.display(),
                            dest_dir.display()
                        ),
                    ));
                }
                (false, false) => return Err(ShiftError::FileNotFound(from.path.clone())),
            }
        }

        let mut document = self.read(&dest_path)?;
        if document.module != module {
            document.module = module.to_string();
            atomic_write_json(&dest_path, &document, self.keep_backup)?;
        }

        debug!("Moved definition {} -> {}", entity, dest_path.display());
        Ok(dest)
    }

    /// Refuse a path whose document belongs to another entity.
    ///
    /// Distinct names can share a slug ("Order Item" and "Order-Item").
    fn ensure_slot_owner(&self, entity: &str, path: &Path) -> Result<()> {
        let existing: Option<DefinitionDocument> = atomic_read_json(path)?;
        match existing {
            Some(other) if other.name != entity => Err(ShiftError::validation(
                entity,
                format!("{} already holds the definition of {}", path.display(), other.name),
            )),
            _ => Ok(()),
        }
    }

    /// Rewrite the `module` recorded inside an existing document.
    pub fn set_document_module(&self, location: &DefinitionLocation, module: &str) -> Result<bool> {
        let mut document = self.read(&location.path)?;
        if document.module == module {
            return Ok(false);
        }
        document.module = module.to_string();
        atomic_write_json(&location.path, &document, self.keep_backup)?;
        Ok(true)
    }

    /// Remove a module directory if nothing is left in it.
    pub fn prune_module_dir(&self, namespace: &str, module: &str) {
        remove_dir_if_empty(&self.apps_root.join(namespace).join(module));
    }
}

/// Move a directory, falling back to copy+delete across filesystems.
fn move_directory(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| ShiftError::Io {
            message: format!("Failed to create destination parent: {}", parent.display()),
            path: Some(parent.to_path_buf()),
            source: Some(e),
        })?;
    }

    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_dir_recursive(src, dest)?;
            fs::remove_dir_all(src).map_err(|e| ShiftError::Io {
                message: format!("Failed to clean up source after copy: {}", src.display()),
                path: Some(src.to_path_buf()),
                source: Some(e),
            })
        }
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| ShiftError::io_with_path(e, dest))?;

    for entry in fs::read_dir(src).map_err(|e| ShiftError::io_with_path(e, src))? {
        let entry = entry.map_err(|e| ShiftError::io_with_path(e, src))?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dest_path)?;
        } else {
            fs::copy(&src_path, &dest_path).map_err(|e| ShiftError::Io {
                message: format!(
                    "Failed to copy file: {} -> {}",
                    src_path.display(),
                    dest_path.display()
                ),
                path: Some(src_path.clone()),
                source: Some(e),
            })?;
        }
    }

    Ok(())
}

fn remove_dir_if_empty(dir: &Path) {
    let is_empty = fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if is_empty {
        if let Err(e) = fs::remove_dir(dir) {
            warn!("Could not remove empty directory {}: {}", dir.display(), e);
        }
    }
}
