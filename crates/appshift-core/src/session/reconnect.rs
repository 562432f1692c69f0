//! Reconnect-and-retry wrapper for steps that talk to the live store.
//!
//! A step that fails with a connectivity error gets the store connection
//! re-established in place and is retried. Any other error is returned
//! immediately. The number of retries comes from [`ReconnectPolicy`].

use crate::config::SessionConfig;
use crate::store::LiveSchema;
use crate::Result;
use tracing::{debug, warn};

/// How many times a step is retried after reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: SessionConfig::RECONNECT_RETRIES,
        }
    }
}

/// Statistics about a wrapped step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Number of successful reconnects.
    pub reconnects: u32,
    /// Whether the step ultimately succeeded.
    pub success: bool,
    /// Last error message if failed.
    pub last_error: Option<String>,
}

/// Run `step`, retrying exactly once after a reconnect on connectivity failure.
pub fn with_reconnect<T>(store: &LiveSchema, step: &str, operation: impl FnMut() -> Result<T>) -> Result<T> {
    with_reconnect_policy(store, step, ReconnectPolicy::default(), operation).0
}

/// Run `step` under an explicit policy and report what happened.
pub fn with_reconnect_policy<T>(
    store: &LiveSchema,
    step: &str,
    policy: ReconnectPolicy,
    mut operation: impl FnMut() -> Result<T>,
) -> (Result<T>, ReconnectStats) {
    let mut stats = ReconnectStats::default();

    loop {
        stats.attempts += 1;

        let err = match operation() {
            Ok(value) => {
                stats.success = true;
                if stats.attempts > 1 {
                    debug!("Step {} succeeded after {} attempts", step, stats.attempts);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };

        stats.last_error = Some(err.to_string());
        if !err.is_connectivity() || stats.attempts > policy.max_retries {
            if err.is_connectivity() {
                warn!(
                    "Step {} failed after {} attempts: {}",
                    step, stats.attempts, err
                );
            }
            return (Err(err), stats);
        }

        warn!("Step {} lost the data store ({}), reconnecting", step, err);
        if let Err(reconnect_err) = store.reconnect() {
            warn!("Reconnect for step {} failed: {}", step, reconnect_err);
            stats.last_error = Some(reconnect_err.to_string());
            return (Err(reconnect_err), stats);
        }
        stats.reconnects += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShiftError;
    use tempfile::TempDir;

    fn create_test_store() -> (LiveSchema, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LiveSchema::open(temp_dir.path().join("site.db")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_success_first_try() {
        let (store, _temp) = create_test_store();
        let (result, stats) =
            with_reconnect_policy(&store, "noop", ReconnectPolicy::default(), || Ok(42));
        assert_eq!(result.unwrap(), 42);
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.reconnects, 0);
    }

    #[test]
    fn test_reconnects_after_dropped_connection() {
        let (store, _temp) = create_test_store();
        store.disconnect();

        let (result, stats) = with_reconnect_policy(
            &store,
            "list namespaces",
            ReconnectPolicy::default(),
            || store.namespaces(),
        );
        assert!(result.unwrap().is_empty());
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.reconnects, 1);
        assert!(store.is_connected());
    }

    #[test]
    fn test_retries_exactly_once() {
        let (store, _temp) = create_test_store();
        let mut calls = 0;
        let result: Result<()> = with_reconnect(&store, "flaky", || {
            calls += 1;
            Err(ShiftError::connectivity("database is locked"))
        });
        assert!(result.unwrap_err().is_connectivity());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let (store, _temp) = create_test_store();
        let mut calls = 0;
        let result: Result<()> = with_reconnect(&store, "invalid", || {
            calls += 1;
            Err(ShiftError::validation("billing", "ambiguous"))
        });
        assert!(matches!(result, Err(ShiftError::Validation { .. })));
        assert_eq!(calls, 1);
    }
}
