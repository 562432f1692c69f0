//! Centralized configuration for appshift.
//!
//! Constant holders for site layout, live store tuning, tree columns and
//! session persistence. Runtime options live on [`crate::ShiftApiBuilder`].

/// Site directory layout.
pub struct PathsConfig;

impl PathsConfig {
    pub const APPS_DIR_NAME: &'static str = "apps";
    pub const STATE_DIR_NAME: &'static str = "state";
    pub const SESSIONS_DIR_NAME: &'static str = "sessions";
    pub const PLANS_DIR_NAME: &'static str = "plans";
    pub const DATABASE_FILENAME: &'static str = "site.db";
    pub const DEFINITION_EXTENSION: &'static str = "json";
}

/// Live store connection settings.
pub struct StoreConfig;

impl StoreConfig {
    pub const BUSY_TIMEOUT_MS: u32 = 5000;
    /// Prefix of every backing table (`tab<Entity Name>`).
    pub const TABLE_PREFIX: &'static str = "tab";
    pub const ENTITY_META_TABLE: &'static str = "__entity_meta";
    pub const MODULE_DEFS_TABLE: &'static str = "__module_defs";
    pub const NAMESPACES_TABLE: &'static str = "__namespaces";
    pub const CUSTOMIZATIONS_TABLE: &'static str = "__customizations";
}

/// Column names carried by hierarchical backing tables.
pub struct TreeConfig;

impl TreeConfig {
    pub const LEFT_COLUMN: &'static str = "lft";
    pub const RIGHT_COLUMN: &'static str = "rgt";
    pub const PARENT_COLUMN: &'static str = "parent_node";
    pub const PREVIOUS_PARENT_COLUMN: &'static str = "old_parent";
    /// Synthetic root rows are named `"<prefix> <Entity Type>"`.
    pub const SYNTHETIC_ROOT_PREFIX: &'static str = "All";
}

/// Schema reconstruction defaults.
pub struct SchemaConfig;

impl SchemaConfig {
    /// Primary key column present on every backing table.
    pub const NAME_COLUMN: &'static str = "name";
    pub const DEFAULT_FALLBACK_NAMESPACE: &'static str = "custom";
    pub const DEFAULT_FALLBACK_MODULE: &'static str = "restored";

    /// Columns managed by the platform rather than declared as fields.
    pub fn is_standard_column(column: &str) -> bool {
        matches!(
            column,
            "name" | "lft" | "rgt" | "parent_node" | "old_parent"
        )
    }
}

/// Session persistence settings.
pub struct SessionConfig;

impl SessionConfig {
    /// Keep the previous checkpoint as `<name>.json.bak`.
    pub const KEEP_BACKUP: bool = true;
    /// Reconnect-and-retry attempts after the first connectivity failure.
    pub const RECONNECT_RETRIES: u32 = 1;
    pub const UNIT_STEP_PREFIX: &'static str = "unit:";
    pub const MODULE_STEP_PREFIX: &'static str = "module:";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_columns() {
        assert!(SchemaConfig::is_standard_column(SchemaConfig::NAME_COLUMN));
        assert!(SchemaConfig::is_standard_column(TreeConfig::LEFT_COLUMN));
        assert!(SchemaConfig::is_standard_column(TreeConfig::PREVIOUS_PARENT_COLUMN));
        assert!(!SchemaConfig::is_standard_column("customer"));
    }
}
