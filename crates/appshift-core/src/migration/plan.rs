//! Migration planning.
//!
//! The reference graph is restricted to the planned entities, strongly
//! connected groups collapse into compound units, and each unit is ranked
//! by the longest chain of units it depends on. A referenced entity is
//! therefore never ranked after its referrer unless both share a unit.

use crate::analysis::{build_graph, classify_all, Classification, DynamicLink, Reference};
use crate::config::{PathsConfig, SessionConfig};
use crate::definitions::nearest_module;
use crate::site::{Catalog, SiteContext};
use crate::store::{atomic_read_json, atomic_write_json};
use crate::{Result, ShiftError};
use chrono::{DateTime, Utc};
use petgraph::algo::{condensation, toposort};
use petgraph::graph::DiGraph;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// What to migrate out of the source namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "names", rename_all = "snake_case")]
pub enum Selection {
    Namespace,
    Modules(Vec<String>),
    Entities(Vec<String>),
}

/// One entity inside a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedEntity {
    pub name: String,
    pub source_module: String,
    pub target_module: String,
    pub classification: Classification,
    pub fan_in: usize,
}

/// Smallest independently executable item: one entity or one cyclic group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationUnit {
    pub id: String,
    pub entities: Vec<PlannedEntity>,
    pub source_namespace: String,
    pub target_namespace: String,
    pub rank: usize,
    pub risk: u32,
    /// Ids of units this one references.
    pub depends_on: Vec<String>,
}

impl MigrationUnit {
    pub fn is_compound(&self) -> bool {
        self.entities.len() > 1
    }

    pub fn step_name(&self) -> String {
        format!("{}{}", SessionConfig::UNIT_STEP_PREFIX, self.id)
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.iter().any(|e| e.name == entity)
    }
}

/// A module that moves wholesale and is re-declared under the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMove {
    pub module: String,
    pub source_namespace: String,
    pub target_namespace: String,
    pub units: Vec<String>,
}

impl ModuleMove {
    pub fn step_name(&self) -> String {
        format!("{}{}", SessionConfig::MODULE_STEP_PREFIX, self.module)
    }
}

/// Why an entity was left out of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    NotFound,
    /// Ownership must be resolved before the entity can move.
    Orphan,
    NotInSource { recorded: Option<String> },
    NoTargetModule { module: String },
    RenameTargetMissing { module: String, renamed_to: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub entity: String,
    pub reason: ExclusionReason,
}

/// Ordered plan for moving entities between namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub target: String,
    pub selection: Selection,
    #[serde(default)]
    pub module_renames: BTreeMap<String, String>,
    /// Units in execution order: by rank, then id.
    pub units: Vec<MigrationUnit>,
    #[serde(default)]
    pub module_moves: Vec<ModuleMove>,
    #[serde(default)]
    pub exclusions: Vec<Exclusion>,
    /// References from planned entities to entities staying behind.
    #[serde(default)]
    pub external_references: Vec<Reference>,
    #[serde(default)]
    pub dynamic_links: Vec<DynamicLink>,
}

impl MigrationPlan {
    pub fn unit(&self, id: &str) -> Option<&MigrationUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn unit_of(&self, entity: &str) -> Option<&MigrationUnit> {
        self.units.iter().find(|u| u.contains(entity))
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.units
            .iter()
            .flat_map(|u| u.entities.iter().map(|e| e.name.as_str()))
    }

    pub fn excluded(&self, entity: &str) -> Option<&ExclusionReason> {
        self.exclusions
            .iter()
            .find(|e| e.entity == entity)
            .map(|e| &e.reason)
    }

    pub fn total_risk(&self) -> u32 {
        self.units.iter().map(|u| u.risk).sum()
    }
}

/// Reporting weight of a classification in the risk score.
pub fn risk_weight(classification: Classification) -> u32 {
    match classification {
        Classification::Standard => 1,
        Classification::Custom => 2,
        Classification::Customized => 3,
        Classification::Orphan => 4,
    }
}

/// Risk of moving one entity: `(1 + fan_in) * weight`.
pub fn entity_risk(fan_in: usize, classification: Classification) -> u32 {
    (1 + fan_in as u32) * risk_weight(classification)
}

/// Builds migration plans from the current state of a site.
pub struct MigrationPlanner<'a> {
    site: &'a SiteContext,
    module_renames: BTreeMap<String, String>,
}

impl<'a> MigrationPlanner<'a> {
    pub fn new(site: &'a SiteContext) -> Self {
        Self {
            site,
            module_renames: BTreeMap::new(),
        }
    }

    /// Explicit source-module -> target-module mapping, consulted first.
    pub fn with_module_renames(mut self, renames: BTreeMap<String, String>) -> Self {
        self.module_renames = renames;
        self
    }

    pub fn plan(&self, source: &str, target: &str, selection: &Selection) -> Result<MigrationPlan> {
        if source == target {
            return Err(ShiftError::validation(
                source,
                "source and target namespace are the same",
            ));
        }
        let store = self.site.store();
        for namespace in [source, target] {
            if !store.has_namespace(namespace)? {
                return Err(ShiftError::NamespaceNotFound {
                    name: namespace.to_string(),
                });
            }
        }

        let catalog = self.site.catalog()?;
        self.plan_catalog(&catalog, source, target, selection)
    }

    fn plan_catalog(
        &self,
        catalog: &Catalog,
        source: &str,
        target: &str,
        selection: &Selection,
    ) -> Result<MigrationPlan> {
        let classification = classify_all(catalog.entities.values(), &catalog.index);
        let labels: HashMap<&str, Classification> = classification
            .entities
            .iter()
            .map(|d| (d.entity.as_str(), d.label))
            .collect();
        let mut exclusions = Vec::new();

        // Candidates from the selection.
        let candidates: BTreeSet<String> = match selection {
            Selection::Namespace => catalog
                .touching_namespace(source)
                .map(|e| e.name.clone())
                .collect(),
            Selection::Modules(modules) => {
                let declared = catalog.modules_of(source);
                for module in modules {
                    if !declared.contains(module) {
                        return Err(ShiftError::validation(
                            module,
                            format!("module is not declared under {}", source),
                        ));
                    }
                }
                catalog
                    .touching_namespace(source)
                    .filter(|e| {
                        let physical = catalog.index.location(&e.name).map(|l| &l.module);
                        e.module.as_ref().is_some_and(|m| modules.contains(m))
                            || physical.is_some_and(|m| modules.contains(m))
                    })
                    .map(|e| e.name.clone())
                    .collect()
            }
            Selection::Entities(names) => {
                let mut found = BTreeSet::new();
                for name in names {
                    if catalog.get(name).is_some() {
                        found.insert(name.clone());
                    } else if !exclusions.iter().any(|e: &Exclusion| &e.entity == name) {
                        exclusions.push(Exclusion {
                            entity: name.clone(),
                            reason: ExclusionReason::NotFound,
                        });
                    }
                }
                found
            }
        };

        // Ownership gate.
        let mut eligible: BTreeMap<String, String> = BTreeMap::new();
        for name in &candidates {
            let Some(entity) = catalog.get(name) else {
                continue;
            };
            if labels.get(name.as_str()) == Some(&Classification::Orphan) {
                exclusions.push(Exclusion {
                    entity: name.clone(),
                    reason: ExclusionReason::Orphan,
                });
                continue;
            }
            if entity.namespace.as_deref() != Some(source) {
                exclusions.push(Exclusion {
                    entity: name.clone(),
                    reason: ExclusionReason::NotInSource {
                        recorded: entity.namespace.clone(),
                    },
                });
                continue;
            }
            if let Some(location) = catalog.index.location(name) {
                eligible.insert(name.clone(), location.module.clone());
            }
        }

        // Target module per source module.
        let target_modules = catalog.modules_of(target);
        let mut module_targets: BTreeMap<String, String> = BTreeMap::new();
        let mut whole_modules: BTreeSet<String> = BTreeSet::new();
        let source_modules: BTreeSet<String> = eligible.values().cloned().collect();

        for module in &source_modules {
            if let Some(renamed) = self.module_renames.get(module) {
                if target_modules.contains(renamed) {
                    module_targets.insert(module.clone(), renamed.clone());
                } else {
                    exclude_module(&mut eligible, &mut exclusions, module, |m| {
                        ExclusionReason::RenameTargetMissing {
                            module: m.to_string(),
                            renamed_to: renamed.clone(),
                        }
                    });
                }
                continue;
            }
            if let Some(nearest) = nearest_module(module, &target_modules) {
                module_targets.insert(module.clone(), nearest.to_string());
                continue;
            }

            let members: Vec<&str> = catalog
                .entities
                .values()
                .filter(|e| {
                    let physical = catalog
                        .index
                        .location(&e.name)
                        .is_some_and(|l| l.namespace == source && &l.module == module);
                    let recorded = e.namespace.as_deref() == Some(source)
                        && e.module.as_ref() == Some(module);
                    physical || recorded
                })
                .map(|e| e.name.as_str())
                .collect();
            if members.iter().all(|m| eligible.contains_key(*m)) {
                module_targets.insert(module.clone(), module.clone());
                whole_modules.insert(module.clone());
            } else {
                exclude_module(&mut eligible, &mut exclusions, module, |m| {
                    ExclusionReason::NoTargetModule {
                        module: m.to_string(),
                    }
                });
            }
        }

        // Graph over planned entities; fan-in over the whole instance.
        let planned: Vec<&crate::definitions::EntityDefinition> = eligible
            .keys()
            .filter_map(|name| catalog.get(name))
            .collect();
        let planned_graph = build_graph(planned.iter().copied());
        let instance_graph = build_graph(catalog.entities.values());

        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut node_of = HashMap::new();
        for name in eligible.keys() {
            node_of.insert(name.clone(), graph.add_node(name.clone()));
        }
        for (from, to) in planned_graph.static_edges() {
            if let (Some(&a), Some(&b)) = (node_of.get(&from), node_of.get(&to)) {
                graph.add_edge(a, b, ());
            }
        }

        let condensed = condensation(graph, true);
        let order = toposort(&condensed, None).map_err(|_| {
            ShiftError::Other("condensed reference graph still contains a cycle".to_string())
        })?;

        let mut rank = vec![0usize; condensed.node_count()];
        for idx in order.iter().rev() {
            rank[idx.index()] = condensed
                .neighbors_directed(*idx, Direction::Outgoing)
                .map(|dep| rank[dep.index()] + 1)
                .max()
                .unwrap_or(0);
        }

        let unit_id = |members: &[String]| {
            let mut sorted = members.to_vec();
            sorted.sort();
            sorted.join(" + ")
        };

        let mut units = Vec::with_capacity(condensed.node_count());
        for idx in condensed.node_indices() {
            let members = &condensed[idx];
            let mut entities: Vec<PlannedEntity> = members
                .iter()
                .map(|name| {
                    let label = labels
                        .get(name.as_str())
                        .copied()
                        .unwrap_or(Classification::Standard);
                    let source_module = eligible[name].clone();
                    PlannedEntity {
                        name: name.clone(),
                        target_module: module_targets
                            .get(&source_module)
                            .cloned()
                            .unwrap_or_else(|| source_module.clone()),
                        source_module,
                        classification: label,
                        fan_in: instance_graph.fan_in(name),
                    }
                })
                .collect();
            entities.sort_by(|a, b| a.name.cmp(&b.name));

            let mut depends_on: Vec<String> = condensed
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|dep| unit_id(&condensed[dep]))
                .collect();
            depends_on.sort();
            depends_on.dedup();

            units.push(MigrationUnit {
                id: unit_id(members),
                risk: entities
                    .iter()
                    .map(|e| entity_risk(e.fan_in, e.classification))
                    .sum(),
                entities,
                source_namespace: source.to_string(),
                target_namespace: target.to_string(),
                rank: rank[idx.index()],
                depends_on,
            });
        }
        units.sort_by(|a, b| (a.rank, &a.id).cmp(&(b.rank, &b.id)));

        let module_moves = whole_modules
            .iter()
            .map(|module| ModuleMove {
                module: module.clone(),
                source_namespace: source.to_string(),
                target_namespace: target.to_string(),
                units: units
                    .iter()
                    .filter(|u| u.entities.iter().any(|e| &e.source_module == module))
                    .map(|u| u.id.clone())
                    .collect(),
            })
            .collect();

        let external_references = planned_graph
            .references()
            .into_iter()
            .filter(|r| r.to.as_ref().is_some_and(|t| !eligible.contains_key(t)))
            .collect();

        exclusions.sort_by(|a, b| a.entity.cmp(&b.entity));

        let plan = MigrationPlan {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            source: source.to_string(),
            target: target.to_string(),
            selection: selection.clone(),
            module_renames: self.module_renames.clone(),
            units,
            module_moves,
            exclusions,
            external_references,
            dynamic_links: planned_graph.dynamic_links().to_vec(),
        };

        info!(
            "Plan {}: {} -> {}, {} units, {} exclusions, total risk {}",
            plan.id,
            source,
            target,
            plan.units.len(),
            plan.exclusions.len(),
            plan.total_risk()
        );
        Ok(plan)
    }
}

fn exclude_module(
    eligible: &mut BTreeMap<String, String>,
    exclusions: &mut Vec<Exclusion>,
    module: &str,
    reason: impl Fn(&str) -> ExclusionReason,
) {
    let dropped: Vec<String> = eligible
        .iter()
        .filter(|(_, m)| m.as_str() == module)
        .map(|(name, _)| name.clone())
        .collect();
    for name in dropped {
        eligible.remove(&name);
        debug!("Excluding {} from plan: no target for module {}", name, module);
        exclusions.push(Exclusion {
            entity: name,
            reason: reason(module),
        });
    }
}

fn plan_path(plans_dir: &Path, id: &str) -> Result<PathBuf> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(ShiftError::PlanNotFound { id: id.to_string() });
    }
    Ok(plans_dir.join(format!("{}.{}", id, PathsConfig::DEFINITION_EXTENSION)))
}

/// Persist a plan so it can be executed later by id.
pub fn save_plan(plans_dir: &Path, plan: &MigrationPlan) -> Result<PathBuf> {
    let path = plan_path(plans_dir, &plan.id)?;
    atomic_write_json(&path, plan, false)?;
    debug!("Saved plan {} to {}", plan.id, path.display());
    Ok(path)
}

pub fn load_plan(plans_dir: &Path, id: &str) -> Result<MigrationPlan> {
    let path = plan_path(plans_dir, id)?;
    atomic_read_json(&path)?.ok_or_else(|| ShiftError::PlanNotFound { id: id.to_string() })
}
