//! Read-only analysis methods.

use crate::analysis::{build_graph, classify, classify_all};
use crate::error::{Result, ShiftError};
use crate::{ClassificationDetail, ClassificationReport, GraphReport, ShiftApi};

impl ShiftApi {
    /// Classify every entity recorded under, or physically located in,
    /// `namespace`.
    pub fn classify_namespace(&self, namespace: &str) -> Result<ClassificationReport> {
        self.require_namespace(namespace)?;
        let catalog = self.site.catalog()?;
        let report = classify_all(catalog.touching_namespace(namespace), &catalog.index);
        tracing::debug!(
            "Classified {} entities touching {}",
            report.entities.len(),
            namespace
        );
        Ok(report)
    }

    pub fn classify_entity(&self, name: &str) -> Result<ClassificationDetail> {
        let catalog = self.site.catalog()?;
        let entity = catalog.get(name).ok_or_else(|| ShiftError::EntityNotFound {
            name: name.to_string(),
        })?;
        Ok(classify(entity, catalog.index.location(name)))
    }

    /// Reference graph over the whole site, or over the entities touching
    /// one namespace. References leaving the scope show up as external.
    pub fn reference_graph(&self, namespace: Option<&str>) -> Result<GraphReport> {
        let catalog = self.site.catalog()?;
        let graph = match namespace {
            Some(namespace) => {
                self.require_namespace(namespace)?;
                build_graph(catalog.touching_namespace(namespace))
            }
            None => build_graph(catalog.entities.values()),
        };
        Ok(graph.report(|name| catalog.get(name).is_some()))
    }

    pub(crate) fn require_namespace(&self, namespace: &str) -> Result<()> {
        if self.site.store().has_namespace(namespace)? {
            Ok(())
        } else {
            Err(ShiftError::NamespaceNotFound {
                name: namespace.to_string(),
            })
        }
    }
}
