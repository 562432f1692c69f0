//! Namespace-to-namespace migration: dependency-ordered planning and
//! resumable, unit-scoped execution.

mod executor;
mod plan;

pub use executor::{ExecutionReport, MigrationExecutor, ModuleMoveOutcome, UnitOutcome, UnitStatus};
pub use plan::{
    entity_risk, load_plan, risk_weight, save_plan, Exclusion, ExclusionReason, MigrationPlan,
    MigrationPlanner, MigrationUnit, ModuleMove, PlannedEntity, Selection,
};
