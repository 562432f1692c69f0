//! Durable, resumable progress records for multi-step operations.
//!
//! One JSON document per session name under `state/sessions/`. Every
//! checkpoint rewrites the whole record atomically, so a crash mid-write
//! leaves the previous valid checkpoint in place.

use crate::config::PathsConfig;
use crate::store::{atomic_read_json, atomic_write_json};
use crate::{Result, ShiftError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Status of one session step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Started,
    Completed,
    Failed,
}

/// One named step in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStep {
    pub name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted record of a multi-step operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub steps: Vec<SessionStep>,
    /// Free-form progress payload (the executor stores its plan id here).
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Session {
    fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            steps: Vec::new(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn step(&self, name: &str) -> Option<&SessionStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_status(&self, name: &str) -> StepStatus {
        self.step(name).map(|s| s.status).unwrap_or(StepStatus::Pending)
    }

    pub fn is_completed(&self, name: &str) -> bool {
        self.step_status(name) == StepStatus::Completed
    }
}

/// Aggregate view of a session's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_steps: usize,
    pub pending: usize,
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
    pub last_step: Option<String>,
    pub failed_steps: Vec<String>,
}

impl SessionSummary {
    /// Every recorded step completed.
    pub fn is_finished(&self) -> bool {
        self.total_steps > 0 && self.completed == self.total_steps
    }
}

/// Reads and writes session records under one directory.
#[derive(Debug, Clone)]
pub struct SessionManager {
    sessions_dir: PathBuf,
    keep_backup: bool,
}

impl SessionManager {
    pub fn new(sessions_dir: impl Into<PathBuf>, keep_backup: bool) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            keep_backup,
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.sessions_dir
            .join(format!("{}.{}", name, PathsConfig::DEFINITION_EXTENSION))
    }

    fn validate_name(name: &str) -> Result<()> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && !name.starts_with('.');
        if valid {
            Ok(())
        } else {
            Err(ShiftError::validation(name, "invalid session name"))
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        atomic_write_json(&self.record_path(&session.name), session, self.keep_backup)
    }

    /// Start a new session under `name`, replacing any previous record.
    pub fn start(&self, name: &str) -> Result<Session> {
        Self::validate_name(name)?;
        let session = Session::new(name);
        if self.record_path(name).exists() {
            info!("Starting new session {} over an existing record", name);
        }
        self.save(&session)?;
        debug!("Started session {} ({})", name, session.id);
        Ok(session)
    }

    /// Load the record for `name`.
    pub fn load(&self, name: &str) -> Result<Session> {
        Self::validate_name(name)?;
        let path = self.record_path(name);
        match atomic_read_json::<Session>(&path) {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err(ShiftError::SessionNotFound {
                name: name.to_string(),
            }),
            Err(ShiftError::Json { message, .. }) => Err(ShiftError::SessionCorrupt {
                name: name.to_string(),
                message,
            }),
            Err(e) => Err(e),
        }
    }

    /// Load `name`, or start it if no record exists.
    pub fn load_or_start(&self, name: &str) -> Result<Session> {
        match self.load(name) {
            Err(ShiftError::SessionNotFound { .. }) => self.start(name),
            other => other,
        }
    }

    /// Record a step transition and persist the session.
    ///
    /// A completed step never changes status again within the same session.
    pub fn checkpoint(
        &self,
        session: &mut Session,
        step: &str,
        status: StepStatus,
        payload: serde_json::Value,
        error: Option<String>,
    ) -> Result<()> {
        let now = Utc::now();

        match session.steps.iter_mut().find(|s| s.name == step) {
            Some(existing) => {
                if existing.status == StepStatus::Completed && status != StepStatus::Completed {
                    return Err(ShiftError::validation(
                        step,
                        format!(
                            "step already completed in session {}; start a new session to redo it",
                            session.name
                        ),
                    ));
                }
                existing.status = status;
                existing.payload = payload;
                existing.error = error;
                existing.updated_at = now;
            }
            None => session.steps.push(SessionStep {
                name: step.to_string(),
                status,
                payload,
                error,
                updated_at: now,
            }),
        }

        session.updated_at = now;
        self.save(session)
    }

    /// Replace the session-level payload and persist.
    pub fn set_payload(&self, session: &mut Session, payload: serde_json::Value) -> Result<()> {
        session.payload = payload;
        session.updated_at = Utc::now();
        self.save(session)
    }

    /// Summarize a session's progress.
    pub fn status(&self, session: &Session) -> SessionSummary {
        let count = |status: StepStatus| session.steps.iter().filter(|s| s.status == status).count();

        SessionSummary {
            id: session.id.clone(),
            name: session.name.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            total_steps: session.steps.len(),
            pending: count(StepStatus::Pending),
            started: count(StepStatus::Started),
            completed: count(StepStatus::Completed),
            failed: count(StepStatus::Failed),
            last_step: session
                .steps
                .iter()
                .max_by_key(|s| s.updated_at)
                .map(|s| s.name.clone()),
            failed_steps: session
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Failed)
                .map(|s| s.name.clone())
                .collect(),
        }
    }

    /// Summaries of every readable session record, sorted by name.
    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        if !self.sessions_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.sessions_dir)
            .map_err(|e| ShiftError::io_with_path(e, &self.sessions_dir))?;

        let mut summaries = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PathsConfig::DEFINITION_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(name) {
                Ok(session) => summaries.push(self.status(&session)),
                Err(e) => warn!("Skipping session record {}: {}", path.display(), e),
            }
        }

        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backup_path_for;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_manager() -> (SessionManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let manager = SessionManager::new(temp_dir.path().join("sessions"), true);
        (manager, temp_dir)
    }

    #[test]
    fn test_start_and_load() {
        let (manager, _temp) = create_test_manager();
        let session = manager.start("move-billing").unwrap();
        let loaded = manager.load("move-billing").unwrap();
        assert_eq!(loaded.id, session.id);
        assert!(loaded.steps.is_empty());
    }

    #[test]
    fn test_load_missing_session() {
        let (manager, _temp) = create_test_manager();
        let result = manager.load("nope");
        assert!(matches!(result, Err(ShiftError::SessionNotFound { .. })));
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let (manager, _temp) = create_test_manager();
        fs::create_dir_all(manager.sessions_dir()).unwrap();
        fs::write(manager.sessions_dir().join("broken.json"), "{ not json").unwrap();
        let result = manager.load("broken");
        assert!(matches!(result, Err(ShiftError::SessionCorrupt { .. })));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (manager, _temp) = create_test_manager();
        assert!(manager.start("../escape").is_err());
        assert!(manager.start("").is_err());
    }

    #[test]
    fn test_checkpoint_is_monotonic_once_completed() {
        let (manager, _temp) = create_test_manager();
        let mut session = manager.start("s").unwrap();

        manager
            .checkpoint(&mut session, "unit:Order", StepStatus::Started, json!(null), None)
            .unwrap();
        manager
            .checkpoint(&mut session, "unit:Order", StepStatus::Completed, json!({"moved": 1}), None)
            .unwrap();

        let result = manager.checkpoint(
            &mut session,
            "unit:Order",
            StepStatus::Failed,
            json!(null),
            Some("late failure".into()),
        );
        assert!(matches!(result, Err(ShiftError::Validation { .. })));

        let loaded = manager.load("s").unwrap();
        assert!(loaded.is_completed("unit:Order"));
        assert_eq!(loaded.step("unit:Order").unwrap().payload["moved"], 1);
    }

    #[test]
    fn test_failed_step_can_restart() {
        let (manager, _temp) = create_test_manager();
        let mut session = manager.start("s").unwrap();
        manager
            .checkpoint(&mut session, "a", StepStatus::Failed, json!(null), Some("boom".into()))
            .unwrap();
        manager
            .checkpoint(&mut session, "a", StepStatus::Started, json!(null), None)
            .unwrap();
        assert_eq!(session.step_status("a"), StepStatus::Started);
        assert_eq!(session.step("a").unwrap().error, None);
    }

    #[test]
    fn test_status_summary() {
        let (manager, _temp) = create_test_manager();
        let mut session = manager.start("s").unwrap();
        manager
            .checkpoint(&mut session, "a", StepStatus::Completed, json!(null), None)
            .unwrap();
        manager
            .checkpoint(&mut session, "b", StepStatus::Failed, json!(null), Some("x".into()))
            .unwrap();

        let summary = manager.status(&session);
        assert_eq!(summary.total_steps, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failed_steps, vec!["b"]);
        assert!(!summary.is_finished());
    }

    #[test]
    fn test_checkpoint_keeps_backup_and_list() {
        let (manager, _temp) = create_test_manager();
        let mut session = manager.start("b-session").unwrap();
        manager
            .checkpoint(&mut session, "a", StepStatus::Started, json!(null), None)
            .unwrap();
        manager.start("a-session").unwrap();

        let record = manager.sessions_dir().join("b-session.json");
        assert!(backup_path_for(&record).exists());

        let names: Vec<_> = manager.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a-session", "b-session"]);
    }
}
