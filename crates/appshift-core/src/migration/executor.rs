//! Migration execution.
//!
//! # Algorithm (Phased, per unit)
//!
//! 1. **Gate**: the schema reconciler confirms every planned entity has its
//!    backing table; otherwise the whole run aborts before touching anything
//! 2. **Validate**: each unit re-reads ownership and classification right
//!    before mutating and is skipped if either changed since planning
//! 3. **Move**: definition directories move to the target module path
//! 4. **Commit**: ownership metadata and customization records are rewritten
//!    in one store transaction
//! 5. **Checkpoint**: the unit's status is written to the session
//!
//! Failures are unit-scoped. Units depending on a failed or blocked unit are
//! blocked. Nothing is rolled back; a resumed session skips completed units.

use super::plan::{MigrationPlan, MigrationUnit, ModuleMove, PlannedEntity};
use crate::analysis::classify;
use crate::cancel::CancellationToken;
use crate::definitions::DefinitionLocation;
use crate::repair::SchemaReconciler;
use crate::session::{
    with_reconnect_policy, ReconnectPolicy, Session, SessionManager, StepStatus,
};
use crate::site::{merge_entity, SiteContext};
use crate::{Result, ShiftError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cell::Cell;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Outcome of one unit (or module re-declaration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Completed,
    /// Completed in an earlier run of the same session.
    AlreadyCompleted,
    /// Preconditions changed since planning; nothing was mutated.
    Skipped,
    Failed,
    /// A unit this one depends on failed or was blocked.
    Blocked,
    /// Dry run: preconditions hold, the unit would run.
    Validated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit: String,
    pub status: UnitStatus,
    pub entities: Vec<String>,
    pub message: Option<String>,
    pub customizations_repointed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMoveOutcome {
    pub module: String,
    pub status: UnitStatus,
    pub message: Option<String>,
}

/// Structured summary of an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub plan_id: String,
    pub session: Option<String>,
    pub dry_run: bool,
    pub units: Vec<UnitOutcome>,
    pub module_moves: Vec<ModuleMoveOutcome>,
    pub completed: usize,
    pub already_completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub blocked: usize,
    /// Cancelled between units; `remaining` lists the units not attempted.
    pub cancelled: bool,
    pub remaining: Vec<String>,
    /// Store reconnects performed while running.
    pub reconnects: u32,
}

impl ExecutionReport {
    pub fn outcome(&self, unit: &str) -> Option<&UnitOutcome> {
        self.units.iter().find(|o| o.unit == unit)
    }

    /// Position of a unit in execution order.
    pub fn position(&self, unit: &str) -> Option<usize> {
        self.units.iter().position(|o| o.unit == unit)
    }

    fn push(&mut self, outcome: UnitOutcome) {
        match outcome.status {
            UnitStatus::Completed | UnitStatus::Validated => self.completed += 1,
            UnitStatus::AlreadyCompleted => self.already_completed += 1,
            UnitStatus::Skipped => self.skipped += 1,
            UnitStatus::Failed => self.failed += 1,
            UnitStatus::Blocked => self.blocked += 1,
        }
        self.units.push(outcome);
    }
}

enum UnitRun {
    Completed { repointed: usize },
    Skipped(String),
}

/// Executes migration plans against one site.
pub struct MigrationExecutor<'a> {
    site: &'a SiteContext,
    sessions: SessionManager,
    cancel: CancellationToken,
    reconnect: ReconnectPolicy,
    reconnects: Cell<u32>,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(site: &'a SiteContext) -> Self {
        Self {
            site,
            sessions: SessionManager::new(site.sessions_dir(), site.options().keep_backups),
            cancel: CancellationToken::new(),
            reconnect: ReconnectPolicy::default(),
            reconnects: Cell::new(0),
        }
    }

    /// Stop between units once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    fn guarded<T>(&self, step: &str, operation: impl FnMut() -> Result<T>) -> Result<T> {
        let (result, stats) = with_reconnect_policy(self.site.store(), step, self.reconnect, operation);
        self.reconnects.set(self.reconnects.get() + stats.reconnects);
        result
    }

    /// Abort unless every planned entity that needs a table has one.
    fn preflight(&self, plan: &MigrationPlan) -> Result<()> {
        let diff = self.guarded("preflight", || {
            let catalog = self.site.catalog()?;
            SchemaReconciler::new(self.site).diff_catalog(&catalog, &plan.source)
        })?;

        let missing: Vec<&str> = plan
            .entity_names()
            .filter(|name| diff.has_missing_table(name))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(ShiftError::StructuralDefect {
            entity: missing.join(", "),
            message: "backing table missing; apply the schema diff before migrating".to_string(),
        })
    }

    fn bind_session(&self, session: &mut Session, plan: &MigrationPlan) -> Result<()> {
        match session.payload.get("plan_id").and_then(|v| v.as_str()) {
            Some(id) if id == plan.id => Ok(()),
            Some(id) => Err(ShiftError::validation(
                &session.name,
                format!("session belongs to plan {}, not {}", id, plan.id),
            )),
            None => self.sessions.set_payload(
                session,
                json!({
                    "plan_id": plan.id,
                    "source": plan.source,
                    "target": plan.target,
                }),
            ),
        }
    }

    /// Execute `plan`, checkpointing into the session `session_name`.
    ///
    /// Resumes the session if it exists. Only an unreachable store (after
    /// one reconnect) or an unreadable session record aborts the call.
    pub fn execute(&self, plan: &MigrationPlan, session_name: &str) -> Result<ExecutionReport> {
        self.reconnects.set(0);
        let mut session = self.sessions.load_or_start(session_name)?;
        self.bind_session(&mut session, plan)?;
        self.preflight(plan)?;

        let mut report = ExecutionReport {
            plan_id: plan.id.clone(),
            session: Some(session.name.clone()),
            ..Default::default()
        };
        let mut broken: HashSet<&str> = HashSet::new();

        for (position, unit) in plan.units.iter().enumerate() {
            if let Err(cancelled) = self.cancel.check() {
                let err = ShiftError::from(cancelled);
                info!("Plan {} stopped before unit {}: {}", plan.id, unit.id, err);
                report.cancelled = true;
                report.remaining = plan.units[position..].iter().map(|u| u.id.clone()).collect();
                break;
            }

            let step = unit.step_name();
            if session.is_completed(&step) {
                debug!("Unit {} already completed in session {}", unit.id, session.name);
                report.push(outcome(unit, UnitStatus::AlreadyCompleted, None, 0));
                continue;
            }

            if let Some(dep) = unit.depends_on.iter().find(|d| broken.contains(d.as_str())) {
                let message = format!("depends on unit {} which did not complete", dep);
                self.sessions.checkpoint(
                    &mut session,
                    &step,
                    StepStatus::Failed,
                    json!({"outcome": "blocked", "blocked_by": dep}),
                    Some(message.clone()),
                )?;
                broken.insert(&unit.id);
                report.push(outcome(unit, UnitStatus::Blocked, Some(message), 0));
                continue;
            }

            self.sessions
                .checkpoint(&mut session, &step, StepStatus::Started, json!(null), None)?;

            match self.guarded(&step, || self.run_unit(plan, unit)) {
                Ok(UnitRun::Completed { repointed }) => {
                    self.sessions.checkpoint(
                        &mut session,
                        &step,
                        StepStatus::Completed,
                        json!({
                            "outcome": "completed",
                            "entities": unit.entities.iter().map(|e| &e.name).collect::<Vec<_>>(),
                            "customizations_repointed": repointed,
                        }),
                        None,
                    )?;
                    report.push(outcome(unit, UnitStatus::Completed, None, repointed));
                }
                Ok(UnitRun::Skipped(reason)) => {
                    warn!("Skipping unit {}: {}", unit.id, reason);
                    self.sessions.checkpoint(
                        &mut session,
                        &step,
                        StepStatus::Failed,
                        json!({"outcome": "skipped"}),
                        Some(reason.clone()),
                    )?;
                    report.push(outcome(unit, UnitStatus::Skipped, Some(reason), 0));
                }
                Err(e) => {
                    let failure = ShiftError::UnitFailure {
                        unit: unit.id.clone(),
                        message: e.to_string(),
                    };
                    warn!("{}", failure);
                    self.sessions.checkpoint(
                        &mut session,
                        &step,
                        StepStatus::Failed,
                        json!({"outcome": "failed", "kind": e.kind()}),
                        Some(e.to_string()),
                    )?;
                    if e.is_connectivity() {
                        return Err(e);
                    }
                    broken.insert(&unit.id);
                    report.push(outcome(unit, UnitStatus::Failed, Some(failure.to_string()), 0));
                }
            }
        }

        if !report.cancelled {
            for module_move in &plan.module_moves {
                let result = self.finish_module_move(plan, module_move, &mut session)?;
                report.module_moves.push(result);
            }
        }

        report.reconnects = self.reconnects.get();
        info!(
            "Execution of plan {} complete: {} completed, {} already done, {} skipped, {} failed, {} blocked, {} reconnects",
            plan.id,
            report.completed,
            report.already_completed,
            report.skipped,
            report.failed,
            report.blocked,
            report.reconnects
        );
        Ok(report)
    }

    /// Re-validate every unit against current state without mutating
    /// anything or touching a session.
    /// Cancellation aborts the preview with [`ShiftError::Cancelled`].
    pub fn dry_run(&self, plan: &MigrationPlan) -> Result<ExecutionReport> {
        self.reconnects.set(0);
        self.preflight(plan)?;

        let mut report = ExecutionReport {
            plan_id: plan.id.clone(),
            dry_run: true,
            ..Default::default()
        };
        let mut broken: HashSet<&str> = HashSet::new();

        for unit in &plan.units {
            self.cancel.check()?;
            if let Some(dep) = unit.depends_on.iter().find(|d| broken.contains(d.as_str())) {
                broken.insert(&unit.id);
                report.push(outcome(
                    unit,
                    UnitStatus::Blocked,
                    Some(format!("depends on unit {} which would not run", dep)),
                    0,
                ));
                continue;
            }

            match self.guarded(&unit.step_name(), || self.validate_unit(plan, unit)) {
                Ok(Ok(_)) => report.push(outcome(unit, UnitStatus::Validated, None, 0)),
                Ok(Err(reason)) => report.push(outcome(unit, UnitStatus::Skipped, Some(reason), 0)),
                Err(e) if e.is_connectivity() => return Err(e),
                Err(e) => {
                    broken.insert(&unit.id);
                    report.push(outcome(unit, UnitStatus::Failed, Some(e.to_string()), 0));
                }
            }
        }

        report.reconnects = self.reconnects.get();
        Ok(report)
    }

    fn run_unit(&self, plan: &MigrationPlan, unit: &MigrationUnit) -> Result<UnitRun> {
        let locations = match self.validate_unit(plan, unit)? {
            Ok(locations) => locations,
            Err(reason) => return Ok(UnitRun::Skipped(reason)),
        };

        let repository = self.site.repository();
        let mut moves = Vec::with_capacity(unit.entities.len());
        for (planned, location) in unit.entities.iter().zip(&locations) {
            repository.move_definition(
                &planned.name,
                location,
                &plan.target,
                &planned.target_module,
            )?;
            moves.push((planned.name.clone(), planned.target_module.clone()));
        }

        let repointed = self
            .site
            .store()
            .commit_ownership_move(&moves, &plan.target)?;
        debug!(
            "Unit {} committed: {} entities, {} customizations re-pointed",
            unit.id,
            moves.len(),
            repointed
        );
        Ok(UnitRun::Completed { repointed })
    }

    /// Current definition location of every entity in the unit, or the
    /// reason the unit no longer matches its plan.
    fn validate_unit(
        &self,
        plan: &MigrationPlan,
        unit: &MigrationUnit,
    ) -> Result<std::result::Result<Vec<DefinitionLocation>, String>> {
        let mut locations = Vec::with_capacity(unit.entities.len());
        for planned in &unit.entities {
            match self.validate_entity(plan, planned)? {
                Ok(location) => locations.push(location),
                Err(reason) => return Ok(Err(format!("{}: {}", planned.name, reason))),
            }
        }
        Ok(Ok(locations))
    }

    fn validate_entity(
        &self,
        plan: &MigrationPlan,
        planned: &PlannedEntity,
    ) -> Result<std::result::Result<DefinitionLocation, String>> {
        let store = self.site.store();
        let repository = self.site.repository();

        let Some(meta) = store.entity_meta(&planned.name)? else {
            return Ok(Err("no longer recorded in the live store".to_string()));
        };

        let source_path = repository.document_path(&plan.source, &planned.source_module, &planned.name);
        let target_path = repository.document_path(&plan.target, &planned.target_module, &planned.name);
        let location = if source_path.exists() {
            DefinitionLocation {
                namespace: plan.source.clone(),
                module: planned.source_module.clone(),
                path: source_path,
            }
        } else if target_path.exists() {
            DefinitionLocation {
                namespace: plan.target.clone(),
                module: planned.target_module.clone(),
                path: target_path,
            }
        } else {
            return Ok(Err("definition file not found at source or target".to_string()));
        };

        let recorded = meta.namespace.as_deref();
        let untouched = recorded == Some(plan.source.as_str()) && location.namespace == plan.source;
        let resumable = location.namespace == plan.target
            && (recorded == Some(plan.source.as_str()) || recorded == Some(plan.target.as_str()));

        if untouched {
            let document = repository.read(&location.path)?;
            let mut entity = merge_entity(&meta, Some(&document));
            entity.customizations = store.customizations_for(&planned.name)?;

            let current = classify(&entity, Some(&location)).label;
            if current != planned.classification {
                return Ok(Err(format!(
                    "classification changed from {} to {}",
                    planned.classification, current
                )));
            }
        } else if !resumable {
            return Ok(Err(format!(
                "ownership changed: recorded {}, definition under {}",
                recorded.unwrap_or("nothing"),
                location.namespace
            )));
        }

        Ok(Ok(location))
    }

    fn finish_module_move(
        &self,
        plan: &MigrationPlan,
        module_move: &ModuleMove,
        session: &mut Session,
    ) -> Result<ModuleMoveOutcome> {
        let step = module_move.step_name();
        if session.is_completed(&step) {
            return Ok(ModuleMoveOutcome {
                module: module_move.module.clone(),
                status: UnitStatus::AlreadyCompleted,
                message: None,
            });
        }

        let pending: Vec<&String> = module_move
            .units
            .iter()
            .filter(|id| {
                plan.unit(id)
                    .map(|u| !session.is_completed(&u.step_name()))
                    .unwrap_or(true)
            })
            .collect();
        if !pending.is_empty() {
            return Ok(ModuleMoveOutcome {
                module: module_move.module.clone(),
                status: UnitStatus::Skipped,
                message: Some(format!("{} units of the module have not completed", pending.len())),
            });
        }

        let store = self.site.store();
        let result = self.guarded(&step, || {
            store.redeclare_module(
                &module_move.module,
                &module_move.source_namespace,
                &module_move.target_namespace,
            )
        });

        match result {
            Ok(()) => {
                self.site
                    .repository()
                    .prune_module_dir(&module_move.source_namespace, &module_move.module);
                self.sessions.checkpoint(
                    session,
                    &step,
                    StepStatus::Completed,
                    json!({"outcome": "completed"}),
                    None,
                )?;
                info!(
                    "Module {} re-declared under {}",
                    module_move.module, module_move.target_namespace
                );
                Ok(ModuleMoveOutcome {
                    module: module_move.module.clone(),
                    status: UnitStatus::Completed,
                    message: None,
                })
            }
            Err(e) => {
                self.sessions.checkpoint(
                    session,
                    &step,
                    StepStatus::Failed,
                    json!({"outcome": "failed"}),
                    Some(e.to_string()),
                )?;
                if e.is_connectivity() {
                    return Err(e);
                }
                Ok(ModuleMoveOutcome {
                    module: module_move.module.clone(),
                    status: UnitStatus::Failed,
                    message: Some(e.to_string()),
                })
            }
        }
    }
}

fn outcome(
    unit: &MigrationUnit,
    status: UnitStatus,
    message: Option<String>,
    customizations_repointed: usize,
) -> UnitOutcome {
    UnitOutcome {
        unit: unit.id.clone(),
        status,
        entities: unit.entities.iter().map(|e| e.name.clone()).collect(),
        message,
        customizations_repointed,
    }
}
