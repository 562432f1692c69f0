//! Builder for configuring ShiftApi initialization.

use std::path::{Path, PathBuf};

use crate::config::{PathsConfig, SchemaConfig, SessionConfig};
use crate::error::{Result, ShiftError};
use crate::site::{SiteContext, SiteOptions};
use crate::ShiftApi;

/// Builder for configuring ShiftApi initialization.
///
/// # Example
///
/// ```rust,ignore
/// use appshift::ShiftApi;
///
/// let api = ShiftApi::builder("./site")
///     .auto_create_dirs(true)
///     .fallback_namespace("custom")
///     .keep_backups(false)
///     .build()?;
/// ```
pub struct ShiftApiBuilder {
    site_root: PathBuf,
    auto_create_dirs: bool,
    fallback_namespace: String,
    fallback_module: String,
    keep_backups: bool,
}

impl ShiftApiBuilder {
    /// Create a new builder with the site root directory.
    pub fn new(site_root: impl Into<PathBuf>) -> Self {
        Self {
            site_root: site_root.into(),
            auto_create_dirs: false,
            fallback_namespace: SchemaConfig::DEFAULT_FALLBACK_NAMESPACE.to_string(),
            fallback_module: SchemaConfig::DEFAULT_FALLBACK_MODULE.to_string(),
            keep_backups: SessionConfig::KEEP_BACKUP,
        }
    }

    /// Auto-create required directories if they don't exist.
    ///
    /// When enabled, the builder will create the following directories:
    /// - `apps/`
    /// - `state/sessions/`
    /// - `state/plans/`
    ///
    /// Default: `false` (the site root must exist)
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    /// Namespace that receives restored definitions whose module has no
    /// declared owner.
    ///
    /// Default: `"custom"`
    pub fn fallback_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.fallback_namespace = namespace.into();
        self
    }

    /// Module that receives restored definitions with no recorded module.
    ///
    /// Default: `"restored"`
    pub fn fallback_module(mut self, module: impl Into<String>) -> Self {
        self.fallback_module = module.into();
        self
    }

    /// Keep the previous version of every rewritten document as `<file>.bak`.
    ///
    /// Default: `true`
    pub fn keep_backups(mut self, enable: bool) -> Self {
        self.keep_backups = enable;
        self
    }

    /// Create the required directory structure.
    fn create_directory_structure(site_root: &Path) -> Result<()> {
        use std::fs;

        let state = site_root.join(PathsConfig::STATE_DIR_NAME);
        let dirs = [
            site_root.to_path_buf(),
            site_root.join(PathsConfig::APPS_DIR_NAME),
            state.join(PathsConfig::SESSIONS_DIR_NAME),
            state.join(PathsConfig::PLANS_DIR_NAME),
        ];

        for dir in &dirs {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| ShiftError::Io {
                    message: format!("Failed to create directory: {}", dir.display()),
                    path: Some(dir.clone()),
                    source: Some(e),
                })?;
            }
        }

        Ok(())
    }

    /// Build the ShiftApi instance.
    pub fn build(self) -> Result<ShiftApi> {
        if self.auto_create_dirs {
            Self::create_directory_structure(&self.site_root)?;
        } else if !self.site_root.exists() {
            return Err(ShiftError::Config {
                message: format!("Site root does not exist: {}", self.site_root.display()),
            });
        }

        if self.fallback_namespace.trim().is_empty() || self.fallback_module.trim().is_empty() {
            return Err(ShiftError::Config {
                message: "Fallback namespace and module must not be empty".to_string(),
            });
        }

        let options = SiteOptions {
            fallback_namespace: self.fallback_namespace,
            fallback_module: self.fallback_module,
            keep_backups: self.keep_backups,
        };
        let site = SiteContext::open(self.site_root, options)?;

        tracing::info!("Opened site {}", site.root().display());
        Ok(ShiftApi { site })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_root_is_config_error() {
        let temp = TempDir::new().unwrap();
        let result = ShiftApiBuilder::new(temp.path().join("absent")).build();
        assert!(matches!(result, Err(ShiftError::Config { .. })));
    }

    #[test]
    fn test_auto_create_dirs() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("site");
        let api = ShiftApiBuilder::new(&root).auto_create_dirs(true).build().unwrap();

        assert!(root.join("apps").is_dir());
        assert!(root.join("state").join("sessions").is_dir());
        assert!(root.join("site.db").exists());
        assert_eq!(api.site().options().fallback_module, "restored");
    }

    #[test]
    fn test_empty_fallback_rejected() {
        let temp = TempDir::new().unwrap();
        let result = ShiftApiBuilder::new(temp.path()).fallback_module(" ").build();
        assert!(matches!(result, Err(ShiftError::Config { .. })));
    }
}
