//! Nested-set repair for hierarchical entity types.
//!
//! Repair is a single exclusive pass: the complete new assignment of parent
//! pointers and bounds is computed in memory from a snapshot of the rows,
//! then written back in one transaction. Nothing is patched incrementally.

use crate::config::TreeConfig;
use crate::definitions::table_name;
use crate::site::SiteContext;
use crate::store::TreeRow;
use crate::{Result, ShiftError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// What a repair pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRepairReport {
    pub entity: String,
    pub rows: usize,
    pub roots: usize,
    /// Rows whose parent pointer was severed to break a cycle.
    pub cycles_broken: Vec<String>,
    /// Rows whose parent did not exist, re-parented to the synthetic root.
    pub reparented: Vec<String>,
    pub synthetic_root: Option<String>,
    pub previous_parent_filled: usize,
    /// Rows whose stored values differ from the new assignment.
    pub rows_changed: usize,
}

/// A nested-set invariant violation found by [`verify_rows`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum TreeViolation {
    MissingBounds { node: String },
    InvalidBounds { node: String, left: i64, right: i64 },
    DuplicateBound { value: i64 },
    NotNested { node: String, parent: String },
    DanglingParent { node: String, parent: String },
    Cycle { node: String },
}

/// Complete new assignment for one tree, ready to be written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeAssignment {
    pub rows: Vec<TreeRow>,
    /// Rows to insert before updating (the synthetic root, if any).
    pub new_rows: Vec<TreeRow>,
    pub report: TreeRepairReport,
}

/// Name of the synthetic root for an entity type.
pub fn synthetic_root_name(entity: &str) -> String {
    format!("{} {}", TreeConfig::SYNTHETIC_ROOT_PREFIX, entity)
}

fn normalized_parent(row: &TreeRow) -> Option<&str> {
    row.parent.as_deref().filter(|p| !p.is_empty())
}

/// Compute a fresh nested-set assignment for `rows`.
///
/// Self-parents and cycles are severed (the lexically smallest node of each
/// cycle becomes a root), dangling parents are pointed at a synthetic root,
/// and bounds are assigned by a depth-first walk with one shared counter.
/// Children are visited in name order so the result is deterministic.
pub fn plan_repair(entity: &str, rows: &[TreeRow]) -> TreeAssignment {
    let names: HashSet<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    let mut report = TreeRepairReport {
        entity: entity.to_string(),
        rows: rows.len(),
        ..Default::default()
    };

    let mut parent: BTreeMap<String, Option<String>> = BTreeMap::new();
    let root_name = synthetic_root_name(entity);
    let mut needs_synthetic_root = false;

    for row in rows {
        let assigned = match normalized_parent(row) {
            None => None,
            Some(p) if p == row.name => {
                report.cycles_broken.push(row.name.clone());
                None
            }
            Some(p) if names.contains(p) => Some(p.to_string()),
            Some(_) => {
                report.reparented.push(row.name.clone());
                if row.name == root_name {
                    None
                } else {
                    needs_synthetic_root = true;
                    Some(root_name.clone())
                }
            }
        };
        parent.insert(row.name.clone(), assigned);
    }

    break_cycles(&mut parent, &mut report.cycles_broken);

    let create_root = needs_synthetic_root && !names.contains(root_name.as_str());
    if create_root {
        parent.insert(root_name.clone(), None);
    }
    if needs_synthetic_root {
        report.synthetic_root = Some(root_name.clone());
    }

    let bounds = assign_bounds(&parent);
    report.roots = parent.values().filter(|p| p.is_none()).count();

    let mut new_rows = Vec::new();
    if create_root {
        let (left, right) = bounds[&root_name];
        new_rows.push(TreeRow {
            name: root_name.clone(),
            parent: None,
            left: Some(left),
            right: Some(right),
            previous_parent: None,
        });
    }

    let mut assigned_rows = Vec::with_capacity(rows.len());
    for row in rows {
        let (left, right) = bounds[&row.name];
        let new_parent = parent[&row.name].clone();
        let previous_parent = match &row.previous_parent {
            Some(prev) if !prev.is_empty() => Some(prev.clone()),
            _ => {
                let filled = normalized_parent(row)
                    .filter(|p| *p != row.name)
                    .map(str::to_string);
                if filled.is_some() {
                    report.previous_parent_filled += 1;
                }
                filled
            }
        };

        let updated = TreeRow {
            name: row.name.clone(),
            parent: new_parent,
            left: Some(left),
            right: Some(right),
            previous_parent,
        };
        if &updated != row {
            report.rows_changed += 1;
        }
        assigned_rows.push(updated);
    }

    TreeAssignment {
        rows: assigned_rows,
        new_rows,
        report,
    }
}

/// Sever one parent pointer per cycle until the parent map is a forest.
fn break_cycles(parent: &mut BTreeMap<String, Option<String>>, broken: &mut Vec<String>) {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        OnPath,
        Done,
    }

    let mut marks: HashMap<String, Mark> = HashMap::new();
    let starts: Vec<String> = parent.keys().cloned().collect();

    for start in starts {
        let mut path: Vec<String> = Vec::new();
        let mut current = Some(start);

        while let Some(node) = current {
            match marks.get(&node).copied() {
                Some(Mark::Done) => break,
                Some(Mark::OnPath) => {
                    let from = path.iter().position(|n| *n == node).unwrap_or(0);
                    if let Some(victim) = path[from..].iter().min().cloned() {
                        parent.insert(victim.clone(), None);
                        debug!("Severed parent of {} to break a cycle", victim);
                        broken.push(victim);
                    }
                    break;
                }
                None => {
                    marks.insert(node.clone(), Mark::OnPath);
                    current = parent.get(&node).cloned().flatten();
                    path.push(node);
                }
            }
        }

        for node in path {
            marks.insert(node, Mark::Done);
        }
    }
}

/// Depth-first walk from every root with one shared counter.
fn assign_bounds(parent: &BTreeMap<String, Option<String>>) -> HashMap<String, (i64, i64)> {
    let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut roots: Vec<&str> = Vec::new();
    for (node, p) in parent {
        match p {
            Some(p) => children.entry(p.as_str()).or_default().push(node),
            None => roots.push(node),
        }
    }

    let mut bounds = HashMap::with_capacity(parent.len());
    let mut counter: i64 = 1;

    for root in roots {
        let mut left_of: HashMap<&str, i64> = HashMap::new();
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        left_of.insert(root, counter);
        counter += 1;

        while let Some((node, next_child)) = stack.pop() {
            let kids = children.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(&child) = kids.get(next_child) {
                stack.push((node, next_child + 1));
                left_of.insert(child, counter);
                counter += 1;
                stack.push((child, 0));
            } else {
                bounds.insert(node.to_string(), (left_of[node], counter));
                counter += 1;
            }
        }
    }

    bounds
}

/// Check nested-set invariants without changing anything.
pub fn verify_rows(rows: &[TreeRow]) -> Vec<TreeViolation> {
    let by_name: HashMap<&str, &TreeRow> = rows.iter().map(|r| (r.name.as_str(), r)).collect();
    let mut violations = Vec::new();
    let mut seen: BTreeMap<i64, usize> = BTreeMap::new();

    for row in rows {
        let (Some(left), Some(right)) = (row.left, row.right) else {
            violations.push(TreeViolation::MissingBounds {
                node: row.name.clone(),
            });
            continue;
        };
        *seen.entry(left).or_default() += 1;
        *seen.entry(right).or_default() += 1;

        if left >= right {
            violations.push(TreeViolation::InvalidBounds {
                node: row.name.clone(),
                left,
                right,
            });
        }

        let Some(parent_name) = normalized_parent(row) else {
            continue;
        };
        if parent_name == row.name {
            violations.push(TreeViolation::Cycle {
                node: row.name.clone(),
            });
            continue;
        }
        match by_name.get(parent_name) {
            None => violations.push(TreeViolation::DanglingParent {
                node: row.name.clone(),
                parent: parent_name.to_string(),
            }),
            Some(parent) => {
                let nested = matches!(
                    (parent.left, parent.right),
                    (Some(pl), Some(pr)) if pl < left && right < pr
                );
                if !nested {
                    violations.push(TreeViolation::NotNested {
                        node: row.name.clone(),
                        parent: parent_name.to_string(),
                    });
                }
            }
        }
    }

    for (value, count) in seen {
        if count > 1 {
            violations.push(TreeViolation::DuplicateBound { value });
        }
    }

    // Multi-node cycles: walk each chain, bounded by the row count.
    let mut in_cycle = BTreeSet::new();
    for row in rows {
        let mut current = normalized_parent(row);
        let mut steps = 0;
        while let Some(name) = current {
            if name == row.name {
                if steps > 0 {
                    in_cycle.insert(row.name.clone());
                }
                break;
            }
            steps += 1;
            if steps > rows.len() {
                break;
            }
            current = by_name.get(name).and_then(|r| normalized_parent(r));
        }
    }
    violations.extend(in_cycle.into_iter().map(|node| TreeViolation::Cycle { node }));

    violations
}

/// Repairs and checks hierarchical entity types on one site.
pub struct TreeRepairer<'a> {
    site: &'a SiteContext,
}

impl<'a> TreeRepairer<'a> {
    pub fn new(site: &'a SiteContext) -> Self {
        Self { site }
    }

    fn load_rows(&self, entity: &str) -> Result<Vec<TreeRow>> {
        let catalog = self.site.catalog()?;
        let definition = catalog.get(entity).ok_or_else(|| ShiftError::EntityNotFound {
            name: entity.to_string(),
        })?;
        if !definition.is_tree {
            return Err(ShiftError::validation(entity, "not a hierarchical entity type"));
        }

        let store = self.site.store();
        let table = table_name(entity);
        if !store.table_exists(&table)? {
            return Err(ShiftError::StructuralDefect {
                entity: entity.to_string(),
                message: format!("table {} is missing", table),
            });
        }
        let columns: HashSet<String> = store
            .table_columns(&table)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        for required in [
            TreeConfig::LEFT_COLUMN,
            TreeConfig::RIGHT_COLUMN,
            TreeConfig::PARENT_COLUMN,
            TreeConfig::PREVIOUS_PARENT_COLUMN,
        ] {
            if !columns.contains(required) {
                return Err(ShiftError::StructuralDefect {
                    entity: entity.to_string(),
                    message: format!("column {}.{} is missing", table, required),
                });
            }
        }

        store.load_tree_rows(entity)
    }

    /// Recompute and rewrite every bound and parent pointer of `entity`.
    pub fn repair(&self, entity: &str) -> Result<TreeRepairReport> {
        let rows = self.load_rows(entity)?;
        let assignment = plan_repair(entity, &rows);

        self.site
            .store()
            .write_tree_rows(entity, &assignment.rows, &assignment.new_rows)?;

        let report = assignment.report;
        info!(
            "Tree repair for {}: {} rows, {} cycles broken, {} re-parented, {} changed",
            entity,
            report.rows,
            report.cycles_broken.len(),
            report.reparented.len(),
            report.rows_changed
        );
        Ok(report)
    }

    /// Report invariant violations without writing anything.
    pub fn verify(&self, entity: &str) -> Result<Vec<TreeViolation>> {
        Ok(verify_rows(&self.load_rows(entity)?))
    }

    /// Names of every row strictly inside `node`'s bound range, in bound order.
    pub fn descendants(&self, entity: &str, node: &str) -> Result<Vec<String>> {
        let rows = self.load_rows(entity)?;
        let anchor = rows
            .iter()
            .find(|r| r.name == node)
            .ok_or_else(|| ShiftError::validation(entity, format!("no row named {}", node)))?;
        let (Some(left), Some(right)) = (anchor.left, anchor.right) else {
            return Err(ShiftError::StructuralDefect {
                entity: entity.to_string(),
                message: format!("row {} has no bounds; repair the tree first", node),
            });
        };

        let mut inside: Vec<&TreeRow> = rows
            .iter()
            .filter(|r| matches!((r.left, r.right), (Some(l), Some(r)) if left < l && r < right))
            .collect();
        inside.sort_by_key(|r| r.left);
        Ok(inside.into_iter().map(|r| r.name.clone()).collect())
    }
}
