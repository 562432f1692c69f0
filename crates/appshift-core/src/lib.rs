//! appshift - Headless library for reconciling and migrating entity
//! definitions between application namespaces.
//!
//! A *site* pairs a tree of per-entity JSON definition documents with a
//! SQLite live schema that records ownership, customizations and one
//! backing table per entity. This crate classifies entities by provenance,
//! maps references between them, repairs ownership, nested-set trees and
//! the live schema, and moves entities between namespaces in dependency
//! order with resumable sessions.
//!
//! # Example
//!
//! ```rust,ignore
//! use appshift::{Selection, ShiftApi};
//!
//! fn main() -> appshift::Result<()> {
//!     let api = ShiftApi::builder("/srv/site").build()?;
//!
//!     let report = api.classify_namespace("legacy")?;
//!     println!("{} customized entities", report.count(appshift::Classification::Customized));
//!
//!     let plan = api.plan("legacy", "core", &Selection::Namespace)?;
//!     let run = api.execute(&plan, "legacy-to-core")?;
//!     println!("{} units completed, {} failed", run.completed, run.failed);
//!
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod cancel;
pub mod config;
pub mod definitions;
pub mod error;
pub mod migration;
pub mod repair;
pub mod session;
pub mod site;
pub mod store;

mod api;

// Re-export commonly used types
pub use analysis::{Classification, ClassificationDetail, ClassificationReport, GraphReport};
pub use cancel::{CancellationToken, CancelledError};
pub use definitions::{EntityDefinition, FieldDefinition};
pub use error::{ErrorKind, Result, ShiftError};
pub use migration::{
    ExecutionReport, MigrationExecutor, MigrationPlan, MigrationPlanner, Selection, UnitStatus,
};
pub use repair::{
    OrphanResolutionReport, RestoreOutcome, SchemaApplyReport, SchemaDiff, TreeRepairReport,
    TreeViolation,
};
pub use session::{SessionManager, SessionSummary};
pub use site::{SiteContext, SiteOptions};

// Re-export builder from api module
pub use api::ShiftApiBuilder;

use std::path::{Path, PathBuf};

/// Main API struct for appshift operations.
///
/// Owns one [`SiteContext`]. Every operation reads current state afresh
/// and returns a serde-serializable report.
pub struct ShiftApi {
    site: SiteContext,
}

impl ShiftApi {
    /// Create a builder for ShiftApi.
    ///
    /// ```rust,ignore
    /// let api = ShiftApi::builder("./site")
    ///     .auto_create_dirs(true)
    ///     .fallback_module("recovered")
    ///     .build()?;
    /// ```
    pub fn builder(site_root: impl Into<PathBuf>) -> ShiftApiBuilder {
        ShiftApiBuilder::new(site_root)
    }

    /// Open an existing site with default options.
    pub fn new(site_root: impl Into<PathBuf>) -> Result<Self> {
        ShiftApiBuilder::new(site_root).build()
    }

    pub fn site_root(&self) -> &Path {
        self.site.root()
    }

    /// The site handle, for callers driving components directly.
    pub fn site(&self) -> &SiteContext {
        &self.site
    }
}
