//! Migration and session methods.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::migration::{load_plan, save_plan, MigrationExecutor, MigrationPlanner};
use crate::session::SessionManager;
use crate::{ExecutionReport, MigrationPlan, Selection, SessionSummary, ShiftApi};

impl ShiftApi {
    // ========================================
    // Planning
    // ========================================

    pub fn plan(&self, source: &str, target: &str, selection: &Selection) -> Result<MigrationPlan> {
        MigrationPlanner::new(&self.site).plan(source, target, selection)
    }

    /// Plan with explicit source-module to target-module renames.
    pub fn plan_with_renames(
        &self,
        source: &str,
        target: &str,
        selection: &Selection,
        module_renames: BTreeMap<String, String>,
    ) -> Result<MigrationPlan> {
        MigrationPlanner::new(&self.site)
            .with_module_renames(module_renames)
            .plan(source, target, selection)
    }

    /// Persist a plan under `state/plans/<id>.json`.
    pub fn save_plan(&self, plan: &MigrationPlan) -> Result<PathBuf> {
        save_plan(&self.site.plans_dir(), plan)
    }

    pub fn load_plan(&self, id: &str) -> Result<MigrationPlan> {
        load_plan(&self.site.plans_dir(), id)
    }

    // ========================================
    // Execution
    // ========================================

    /// Execute a plan, checkpointing into `session`. Re-running with the same
    /// session resumes after the last completed unit.
    pub fn execute(&self, plan: &MigrationPlan, session: &str) -> Result<ExecutionReport> {
        MigrationExecutor::new(&self.site).execute(plan, session)
    }

    /// Like [`ShiftApi::execute`], stopping between units once `cancel` fires.
    pub fn execute_cancellable(
        &self,
        plan: &MigrationPlan,
        session: &str,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport> {
        MigrationExecutor::new(&self.site)
            .with_cancellation(cancel)
            .execute(plan, session)
    }

    /// Execute a previously saved plan by id.
    pub fn execute_plan_ref(&self, plan_id: &str, session: &str) -> Result<ExecutionReport> {
        let plan = self.load_plan(plan_id)?;
        self.execute(&plan, session)
    }

    /// Re-validate every unit against current state without mutating.
    pub fn dry_run(&self, plan: &MigrationPlan) -> Result<ExecutionReport> {
        MigrationExecutor::new(&self.site).dry_run(plan)
    }

    // ========================================
    // Sessions
    // ========================================

    fn sessions(&self) -> SessionManager {
        SessionManager::new(self.site.sessions_dir(), self.site.options().keep_backups)
    }

    pub fn session_status(&self, name: &str) -> Result<SessionSummary> {
        let sessions = self.sessions();
        let session = sessions.load(name)?;
        Ok(sessions.status(&session))
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.sessions().list()
    }
}
