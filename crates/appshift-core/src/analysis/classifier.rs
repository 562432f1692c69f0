//! Provenance labels for entity definitions.

use crate::definitions::{DefinitionIndex, DefinitionLocation, EntityDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Provenance label. Exactly one applies to every entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Core definition, unmodified.
    Standard,
    /// Core definition with a non-empty customization set.
    Customized,
    /// User-defined entity.
    Custom,
    /// Ownership missing or inconsistent with where the definition lives.
    Orphan,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Standard => "standard",
            Classification::Customized => "customized",
            Classification::Custom => "custom",
            Classification::Orphan => "orphan",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label plus the facts it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationDetail {
    pub entity: String,
    pub label: Classification,
    pub has_customizations: bool,
    pub is_core_origin: bool,
    pub ownership_consistent: bool,
}

/// Whether the recorded owner agrees with the physical definition location.
///
/// A missing definition file counts as inconsistent.
pub fn ownership_consistent(entity: &EntityDefinition, location: Option<&DefinitionLocation>) -> bool {
    match (entity.namespace.as_deref(), location) {
        (Some(namespace), Some(location)) => location.namespace == namespace,
        _ => false,
    }
}

/// Classify one entity. First match wins: orphan, custom, customized, standard.
pub fn classify(entity: &EntityDefinition, location: Option<&DefinitionLocation>) -> ClassificationDetail {
    let consistent = ownership_consistent(entity, location);
    let has_customizations = entity.has_customizations();

    let label = if !consistent {
        Classification::Orphan
    } else if entity.is_custom {
        Classification::Custom
    } else if has_customizations {
        Classification::Customized
    } else {
        Classification::Standard
    };

    ClassificationDetail {
        entity: entity.name.clone(),
        label,
        has_customizations,
        is_core_origin: !entity.is_custom,
        ownership_consistent: consistent,
    }
}

/// Classification of a set of entities with per-label counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub entities: Vec<ClassificationDetail>,
    pub counts: BTreeMap<Classification, usize>,
}

impl ClassificationReport {
    pub fn count(&self, label: Classification) -> usize {
        self.counts.get(&label).copied().unwrap_or(0)
    }

    pub fn get(&self, entity: &str) -> Option<&ClassificationDetail> {
        self.entities.iter().find(|d| d.entity == entity)
    }

    pub fn with_label(&self, label: Classification) -> impl Iterator<Item = &ClassificationDetail> {
        self.entities.iter().filter(move |d| d.label == label)
    }
}

/// Classify every entity with one index lookup each.
pub fn classify_all<'a>(
    entities: impl IntoIterator<Item = &'a EntityDefinition>,
    index: &DefinitionIndex,
) -> ClassificationReport {
    let mut report = ClassificationReport::default();
    for entity in entities {
        let detail = classify(entity, index.location(&entity.name));
        *report.counts.entry(detail.label).or_default() += 1;
        report.entities.push(detail);
    }
    report.entities.sort_by(|a, b| a.entity.cmp(&b.entity));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{Customization, CustomizationKind};
    use std::path::PathBuf;

    fn location(namespace: &str, module: &str) -> DefinitionLocation {
        DefinitionLocation {
            namespace: namespace.into(),
            module: module.into(),
            path: PathBuf::from(format!("/apps/{}/{}/x/x.json", namespace, module)),
        }
    }

    fn override_on(entity: &str) -> Customization {
        Customization {
            id: "c1".into(),
            entity: entity.into(),
            namespace: Some("legacy".into()),
            kind: CustomizationKind::PropertyOverride {
                fieldname: "title".into(),
                property: "label".into(),
                value: serde_json::json!("Subject"),
            },
        }
    }

    #[test]
    fn test_decision_order() {
        let loc = location("legacy", "billing");

        let standard = EntityDefinition::new("Invoice").owned_by("legacy", "billing");
        assert_eq!(classify(&standard, Some(&loc)).label, Classification::Standard);

        let mut customized = standard.clone();
        customized.customizations.push(override_on("Invoice"));
        assert_eq!(classify(&customized, Some(&loc)).label, Classification::Customized);

        let mut custom = customized.clone();
        custom.is_custom = true;
        let detail = classify(&custom, Some(&loc));
        assert_eq!(detail.label, Classification::Custom);
        assert!(detail.has_customizations);
        assert!(!detail.is_core_origin);

        // Orphan wins over everything else.
        let mut orphan = custom.clone();
        orphan.namespace = None;
        assert_eq!(classify(&orphan, Some(&loc)).label, Classification::Orphan);
    }

    #[test]
    fn test_location_mismatch_is_orphan() {
        let entity = EntityDefinition::new("Invoice").owned_by("legacy", "billing");
        let elsewhere = location("core", "billing");
        let detail = classify(&entity, Some(&elsewhere));
        assert_eq!(detail.label, Classification::Orphan);
        assert!(!detail.ownership_consistent);

        assert_eq!(classify(&entity, None).label, Classification::Orphan);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let loc = location("legacy", "billing");
        let entity = EntityDefinition::new("Invoice").owned_by("legacy", "billing");
        assert_eq!(classify(&entity, Some(&loc)), classify(&entity, Some(&loc)));
    }

    #[test]
    fn test_classify_all_counts() {
        let mut index = DefinitionIndex::default();
        let a = EntityDefinition::new("A").owned_by("legacy", "billing");
        let b = EntityDefinition::new("B");
        index.insert(location("legacy", "billing"), a.to_document("billing"));

        let report = classify_all([&a, &b], &index);
        assert_eq!(report.count(Classification::Standard), 1);
        assert_eq!(report.count(Classification::Orphan), 1);
        assert_eq!(report.count(Classification::Custom), 0);
        assert_eq!(report.get("B").unwrap().label, Classification::Orphan);
        assert_eq!(report.with_label(Classification::Standard).count(), 1);
    }
}
