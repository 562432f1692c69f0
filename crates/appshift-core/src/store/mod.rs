//! Persistence primitives: atomic JSON documents and the SQLite live schema.

mod atomic;
mod live_schema;

pub use atomic::{atomic_read_json, atomic_write_json, backup_path_for};
pub use live_schema::{ColumnInfo, EntityMeta, LiveSchema, ModuleRegistry, TreeRow};
