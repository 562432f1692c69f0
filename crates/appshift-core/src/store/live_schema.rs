//! SQLite-backed live schema: backing tables plus ownership metadata.
//!
//! The connection is held behind a `Mutex<Option<Connection>>` so that a
//! dropped connection can be re-established in place by [`LiveSchema::reconnect`]
//! without the callers holding a new handle.

use crate::config::{StoreConfig, TreeConfig};
use crate::definitions::{quote_ident, table_name, ColumnType, Customization, CustomizationKind};
use crate::{Result, ShiftError};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Ownership metadata recorded for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub name: String,
    pub namespace: Option<String>,
    pub module: Option<String>,
    pub is_custom: bool,
    pub is_tree: bool,
    pub is_embedded: bool,
    pub updated_at: String,
}

impl EntityMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            module: None,
            is_custom: false,
            is_tree: false,
            is_embedded: false,
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}

/// A live column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

/// One row of a hierarchical backing table, as far as tree repair cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRow {
    pub name: String,
    pub parent: Option<String>,
    pub left: Option<i64>,
    pub right: Option<i64>,
    pub previous_parent: Option<String>,
}

/// Module name -> namespaces that declare it.
pub type ModuleRegistry = BTreeMap<String, Vec<String>>;

/// Live schema handle shared by every component of a site.
pub struct LiveSchema {
    db_path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl LiveSchema {
    /// Open (or create) the live store at `db_path`.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| ShiftError::Io {
                    message: format!("Failed to create store directory: {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Self::connect(&db_path)?;
        Self::ensure_schema(&conn)?;

        Ok(Self {
            db_path,
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(|e| ShiftError::Connectivity {
            message: format!("Failed to open {}: {}", db_path.display(), e),
            source: Some(e),
        })?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA busy_timeout={};\n\
             PRAGMA synchronous=NORMAL;\n\
             PRAGMA foreign_keys=OFF;",
            StoreConfig::BUSY_TIMEOUT_MS,
        ))?;
        Ok(conn)
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {namespaces} (
                name TEXT PRIMARY KEY,
                installed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {modules} (
                module TEXT NOT NULL,
                namespace TEXT NOT NULL,
                PRIMARY KEY (module, namespace)
            );

            CREATE TABLE IF NOT EXISTS {meta} (
                name TEXT PRIMARY KEY,
                namespace TEXT,
                module TEXT,
                is_custom INTEGER NOT NULL DEFAULT 0,
                is_tree INTEGER NOT NULL DEFAULT 0,
                is_embedded INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {custom} (
                id TEXT PRIMARY KEY,
                entity TEXT NOT NULL,
                namespace TEXT,
                kind TEXT NOT NULL,
                payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_customizations_entity ON {custom}(entity);",
            namespaces = StoreConfig::NAMESPACES_TABLE,
            modules = StoreConfig::MODULE_DEFS_TABLE,
            meta = StoreConfig::ENTITY_META_TABLE,
            custom = StoreConfig::CUSTOMIZATIONS_TABLE,
        ))?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn.lock().map_err(|_| ShiftError::Database {
            message: "Failed to acquire live store connection lock".to_string(),
            source: None,
        })
    }

    /// Run `f` against the current connection.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock_conn()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| ShiftError::connectivity("live store connection is closed"))?;
        f(conn)
    }

    /// Re-establish the connection in place.
    pub fn reconnect(&self) -> Result<()> {
        let mut guard = self.lock_conn()?;
        guard.take();
        let conn = Self::connect(&self.db_path)?;
        *guard = Some(conn);
        info!("Reconnected to live store {}", self.db_path.display());
        Ok(())
    }

    /// Drop the connection. Subsequent calls fail with a connectivity error
    /// until [`LiveSchema::reconnect`] is called.
    pub fn disconnect(&self) {
        if let Ok(mut guard) = self.lock_conn() {
            guard.take();
            warn!("Live store connection closed: {}", self.db_path.display());
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock_conn().map(|g| g.is_some()).unwrap_or(false)
    }

    // ========================================
    // Namespaces and modules
    // ========================================

    /// Register a namespace. Idempotent.
    pub fn add_namespace(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (name, installed_at) VALUES (?1, ?2)",
                    StoreConfig::NAMESPACES_TABLE
                ),
                params![name, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn namespaces(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT name FROM {} ORDER BY name",
                StoreConfig::NAMESPACES_TABLE
            ))?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
                .map_err(Into::into)
        })
    }

    pub fn has_namespace(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<String> = conn
                .query_row(
                    &format!(
                        "SELECT name FROM {} WHERE name = ?1",
                        StoreConfig::NAMESPACES_TABLE
                    ),
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Declare `module` as belonging to `namespace`. Idempotent.
    pub fn declare_module(&self, module: &str, namespace: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (module, namespace) VALUES (?1, ?2)",
                    StoreConfig::MODULE_DEFS_TABLE
                ),
                params![module, namespace],
            )?;
            Ok(())
        })
    }

    /// Move a module declaration from one namespace to another in one transaction.
    pub fn redeclare_module(&self, module: &str, from: &str, to: &str) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE module = ?1 AND namespace = ?2",
                    StoreConfig::MODULE_DEFS_TABLE
                ),
                params![module, from],
            )?;
            tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (module, namespace) VALUES (?1, ?2)",
                    StoreConfig::MODULE_DEFS_TABLE
                ),
                params![module, to],
            )?;
            tx.commit()?;
            debug!("Redeclared module {} from {} to {}", module, from, to);
            Ok(())
        })
    }

    /// Namespaces declaring `module`. More than one is a configuration defect.
    pub fn module_namespaces(&self, module: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT namespace FROM {} WHERE module = ?1 ORDER BY namespace",
                StoreConfig::MODULE_DEFS_TABLE
            ))?;
            let rows = stmt.query_map(params![module], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
                .map_err(Into::into)
        })
    }

    /// Modules declared under `namespace`.
    pub fn modules_of(&self, namespace: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT module FROM {} WHERE namespace = ?1 ORDER BY module",
                StoreConfig::MODULE_DEFS_TABLE
            ))?;
            let rows = stmt.query_map(params![namespace], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
                .map_err(Into::into)
        })
    }

    /// Every module declaration, grouped by module.
    pub fn module_registry(&self) -> Result<ModuleRegistry> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT module, namespace FROM {} ORDER BY module, namespace",
                StoreConfig::MODULE_DEFS_TABLE
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut registry = ModuleRegistry::new();
            for row in rows {
                let (module, namespace) = row?;
                registry.entry(module).or_default().push(namespace);
            }
            Ok(registry)
        })
    }

    // ========================================
    // Entity ownership metadata
    // ========================================

    /// Insert or replace the metadata row for an entity.
    pub fn upsert_entity_meta(&self, meta: &EntityMeta) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (name, namespace, module, is_custom, is_tree, is_embedded, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(name) DO UPDATE SET
                         namespace=excluded.namespace,
                         module=excluded.module,
                         is_custom=excluded.is_custom,
                         is_tree=excluded.is_tree,
                         is_embedded=excluded.is_embedded,
                         updated_at=excluded.updated_at",
                    StoreConfig::ENTITY_META_TABLE
                ),
                params![
                    meta.name,
                    meta.namespace,
                    meta.module,
                    meta.is_custom,
                    meta.is_tree,
                    meta.is_embedded,
                    meta.updated_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn entity_meta(&self, name: &str) -> Result<Option<EntityMeta>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT name, namespace, module, is_custom, is_tree, is_embedded, updated_at
                     FROM {} WHERE name = ?1",
                    StoreConfig::ENTITY_META_TABLE
                ),
                params![name],
                meta_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn all_entity_meta(&self) -> Result<Vec<EntityMeta>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT name, namespace, module, is_custom, is_tree, is_embedded, updated_at
                 FROM {} ORDER BY name",
                StoreConfig::ENTITY_META_TABLE
            ))?;
            let rows = stmt.query_map([], meta_from_row)?;
            rows.collect::<rusqlite::Result<Vec<EntityMeta>>>()
                .map_err(Into::into)
        })
    }

    /// Rewrite an entity's owning namespace and module.
    pub fn set_ownership(&self, name: &str, namespace: &str, module: &str) -> Result<()> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                &format!(
                    "UPDATE {} SET namespace = ?1, module = ?2, updated_at = ?3 WHERE name = ?4",
                    StoreConfig::ENTITY_META_TABLE
                ),
                params![namespace, module, Utc::now().to_rfc3339(), name],
            )?;
            if rows == 0 {
                return Err(ShiftError::EntityNotFound {
                    name: name.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Commit one migration unit: rewrite ownership of every entity and
    /// re-point their customization records, all in one transaction.
    ///
    /// Returns the number of customization records re-pointed.
    pub fn commit_ownership_move(
        &self,
        moves: &[(String, String)],
        target_namespace: &str,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let now = Utc::now().to_rfc3339();
            let mut repointed = 0;

            for (entity, module) in moves {
                let rows = tx.execute(
                    &format!(
                        "UPDATE {} SET namespace = ?1, module = ?2, updated_at = ?3 WHERE name = ?4",
                        StoreConfig::ENTITY_META_TABLE
                    ),
                    params![target_namespace, module, now, entity],
                )?;
                if rows == 0 {
                    return Err(ShiftError::EntityNotFound {
                        name: entity.clone(),
                    });
                }

                repointed += tx.execute(
                    &format!(
                        "UPDATE {} SET namespace = ?1 WHERE entity = ?2",
                        StoreConfig::CUSTOMIZATIONS_TABLE
                    ),
                    params![target_namespace, entity],
                )?;
            }

            tx.commit()?;
            Ok(repointed)
        })
    }

    // ========================================
    // Customizations
    // ========================================

    pub fn add_customization(&self, customization: &Customization) -> Result<()> {
        let kind = match customization.kind {
            CustomizationKind::AddedField { .. } => "added_field",
            CustomizationKind::PropertyOverride { .. } => "property_override",
        };
        let payload = serde_json::to_string(&customization.kind)?;

        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (id, entity, namespace, kind, payload_json)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    StoreConfig::CUSTOMIZATIONS_TABLE
                ),
                params![
                    customization.id,
                    customization.entity,
                    customization.namespace,
                    kind,
                    payload
                ],
            )?;
            Ok(())
        })
    }

    /// All customization records grouped by entity.
    pub fn all_customizations(&self) -> Result<HashMap<String, Vec<Customization>>> {
        let mut grouped: HashMap<String, Vec<Customization>> = HashMap::new();
        for customization in self.query_customizations(None)? {
            grouped
                .entry(customization.entity.clone())
                .or_default()
                .push(customization);
        }
        Ok(grouped)
    }

    pub fn customizations_for(&self, entity: &str) -> Result<Vec<Customization>> {
        self.query_customizations(Some(entity))
    }

    fn query_customizations(&self, entity: Option<&str>) -> Result<Vec<Customization>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, entity, namespace, payload_json FROM {}
                 WHERE ?1 IS NULL OR entity = ?1
                 ORDER BY entity, id",
                StoreConfig::CUSTOMIZATIONS_TABLE
            ))?;
            let rows = stmt.query_map(params![entity], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(ShiftError::from)
        })?;

        let mut customizations = Vec::with_capacity(rows.len());
        for (id, entity, namespace, payload) in rows {
            match serde_json::from_str::<CustomizationKind>(&payload) {
                Ok(kind) => customizations.push(Customization {
                    id,
                    entity,
                    namespace,
                    kind,
                }),
                Err(e) => warn!("Ignoring malformed customization {}: {}", id, e),
            }
        }
        Ok(customizations)
    }

    // ========================================
    // Backing tables
    // ========================================

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![table],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Every backing table (`tab*`) present in the store.
    pub fn backing_tables(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ?1 ORDER BY name",
            )?;
            let rows = stmt.query_map(params![format!("{}%", StoreConfig::TABLE_PREFIX)], |row| {
                row.get(0)
            })?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
                .map_err(Into::into)
        })
    }

    pub fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
            let rows = stmt.query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    declared_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<ColumnInfo>>>()
                .map_err(Into::into)
        })
    }

    /// Create a backing table with a `name` primary key plus `columns`.
    pub fn create_table(&self, table: &str, columns: &[(String, ColumnType)]) -> Result<()> {
        let mut defs = vec![format!("{} TEXT PRIMARY KEY", quote_ident("name"))];
        defs.extend(
            columns
                .iter()
                .filter(|(name, _)| name != "name")
                .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.sql_type())),
        );
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table),
            defs.join(", ")
        );

        self.with_conn(|conn| {
            conn.execute(&sql, [])?;
            debug!("Created table {}", table);
            Ok(())
        })
    }

    /// Add one nullable column. Never drops or narrows anything.
    pub fn add_column(&self, table: &str, column: &str, column_type: ColumnType) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table),
            quote_ident(column),
            column_type.sql_type()
        );
        self.with_conn(|conn| {
            conn.execute(&sql, [])?;
            debug!("Added column {}.{}", table, column);
            Ok(())
        })
    }

    /// Insert a row into an entity's backing table.
    pub fn insert_row(&self, entity: &str, values: &[(&str, Value)]) -> Result<()> {
        let columns: Vec<String> = values.iter().map(|(c, _)| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&table_name(entity)),
            columns.join(", "),
            placeholders.join(", ")
        );
        self.with_conn(|conn| {
            conn.execute(&sql, params_from_iter(values.iter().map(|(_, v)| v)))?;
            Ok(())
        })
    }

    // ========================================
    // Hierarchical rows
    // ========================================

    /// Load parent pointers and bounds for every row of a tree entity.
    pub fn load_tree_rows(&self, entity: &str) -> Result<Vec<TreeRow>> {
        let sql = format!(
            "SELECT name, {parent}, {lft}, {rgt}, {old} FROM {table} ORDER BY name",
            parent = quote_ident(TreeConfig::PARENT_COLUMN),
            lft = quote_ident(TreeConfig::LEFT_COLUMN),
            rgt = quote_ident(TreeConfig::RIGHT_COLUMN),
            old = quote_ident(TreeConfig::PREVIOUS_PARENT_COLUMN),
            table = quote_ident(&table_name(entity)),
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok(TreeRow {
                    name: row.get(0)?,
                    parent: row.get(1)?,
                    left: row.get(2)?,
                    right: row.get(3)?,
                    previous_parent: row.get(4)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<TreeRow>>>()
                .map_err(Into::into)
        })
    }

    /// Write a complete tree assignment in one transaction.
    ///
    /// `new_rows` are inserted first (synthetic roots), then every row in
    /// `rows` has its parent, bounds and previous parent overwritten.
    pub fn write_tree_rows(&self, entity: &str, rows: &[TreeRow], new_rows: &[TreeRow]) -> Result<()> {
        let table = quote_ident(&table_name(entity));
        let insert_sql = format!(
            "INSERT INTO {table} (name, {parent}, {lft}, {rgt}, {old}) VALUES (?1, ?2, ?3, ?4, ?5)",
            parent = quote_ident(TreeConfig::PARENT_COLUMN),
            lft = quote_ident(TreeConfig::LEFT_COLUMN),
            rgt = quote_ident(TreeConfig::RIGHT_COLUMN),
            old = quote_ident(TreeConfig::PREVIOUS_PARENT_COLUMN),
        );
        let update_sql = format!(
            "UPDATE {table} SET {parent} = ?1, {lft} = ?2, {rgt} = ?3, {old} = ?4 WHERE name = ?5",
            parent = quote_ident(TreeConfig::PARENT_COLUMN),
            lft = quote_ident(TreeConfig::LEFT_COLUMN),
            rgt = quote_ident(TreeConfig::RIGHT_COLUMN),
            old = quote_ident(TreeConfig::PREVIOUS_PARENT_COLUMN),
        );

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut insert = tx.prepare(&insert_sql)?;
                for row in new_rows {
                    insert.execute(params![
                        row.name,
                        row.parent,
                        row.left,
                        row.right,
                        row.previous_parent
                    ])?;
                }
                let mut update = tx.prepare(&update_sql)?;
                for row in rows {
                    update.execute(params![
                        row.parent,
                        row.left,
                        row.right,
                        row.previous_parent,
                        row.name
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}

fn meta_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityMeta> {
    Ok(EntityMeta {
        name: row.get(0)?,
        namespace: row.get(1)?,
        module: row.get(2)?,
        is_custom: row.get(3)?,
        is_tree: row.get(4)?,
        is_embedded: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
