//! Target synchronization under the per-scope named lock.

use super::Orchestrator;
use crate::inputs::{normalize_targets, total_size};
use chrono::Utc;
use shared_types::{ManagerError, ManagerResult, SyncCounts, Target};
use sm_01_catalog::ScopeChanges;
use tracing::{error, info, warn};

impl Orchestrator {
    /// Read the current target rows.
    ///
    /// While a synchronization holds the scope's lock the stored rows are
    /// mid-rewrite, so the read-out answers `synchronizing = true` with an
    /// empty list instead of stale data.
    pub async fn get_targets(&self, scope_id: u64) -> ManagerResult<(bool, Vec<Target>)> {
        let scope = self.resolve_scope(scope_id).await?;
        if self.locks.is_locked(scope_id) {
            return Ok((true, Vec::new()));
        }
        let conn = self.broker.scope(&scope).await.map_err(ManagerError::from)?;
        let targets = conn.targets().await.map_err(ManagerError::from)?;
        Ok((false, targets))
    }

    /// Replace the scope's input targets.
    ///
    /// Invalid entries are dropped with a warning and sizes are recomputed
    /// server-side. A second concurrent attempt on the same scope fails
    /// fast with `ScopeUpdateOngoing`. The scope's `size` and `last_sync`
    /// are saved before the row-level sync runs so reads reflect the new
    /// size while a non-blocking sync is still in flight; the non-blocking
    /// reply therefore carries zero row counts.
    pub async fn update_targets(
        &self,
        scope_id: u64,
        submitted: Vec<Target>,
        blocking: bool,
    ) -> ManagerResult<SyncCounts> {
        let scope = self.resolve_scope(scope_id).await?;
        let desired = normalize_targets(&submitted);
        if desired.len() < submitted.len() {
            warn!(
                scope = scope_id,
                submitted = submitted.len(),
                accepted = desired.len(),
                "Dropped invalid or duplicate target inputs"
            );
        }

        let Some(guard) = self.locks.try_acquire(scope_id) else {
            return Err(ManagerError::ScopeUpdateOngoing);
        };

        // Open the handle while still on the caller's path so connection
        // problems surface as this RPC's error, not a background log line.
        let conn = self.broker.scope(&scope).await.map_err(ManagerError::from)?;

        self.catalog
            .update_scope(
                scope_id,
                &ScopeChanges {
                    size: Some(total_size(&desired)),
                    last_sync: Some(Utc::now()),
                    ..ScopeChanges::default()
                },
            )
            .await
            .map_err(ManagerError::from)?;

        if blocking {
            let _guard = guard;
            let counts = conn
                .sync_targets(&desired)
                .await
                .map_err(ManagerError::from)?;
            info!(
                scope = scope_id,
                created = counts.created,
                removed = counts.removed,
                updated = counts.updated,
                "Targets synchronized"
            );
            self.notifier.send(scope_id);
            return Ok(counts);
        }

        let notifier = self.notifier.clone();
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                result = conn.sync_targets(&desired) => match result {
                    Ok(counts) => {
                        info!(
                            scope = scope_id,
                            created = counts.created,
                            removed = counts.removed,
                            updated = counts.updated,
                            "Targets synchronized"
                        );
                        notifier.send(scope_id);
                    }
                    Err(err) => {
                        error!(scope = scope_id, error = %err, "Background target sync failed");
                    }
                },
                _ = shutdown.changed() => {
                    warn!(scope = scope_id, "Target sync aborted by shutdown");
                }
            }
        });
        Ok(SyncCounts::default())
    }

    /// Reset one input's scan state back to pending.
    pub async fn reset_input(&self, scope_id: u64, input: &str) -> ManagerResult<()> {
        let scope = self.resolve_scope(scope_id).await?;
        let conn = self.broker.scope(&scope).await.map_err(ManagerError::from)?;
        conn.reset_input(input).await.map_err(ManagerError::from)?;
        self.notifier.send(scope_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::scopes::CreateScopeParams;
    use super::super::testutil::fixture;
    use super::*;
    use sm_01_catalog::CatalogStore;
    use shared_types::entities::ScopeType;
    use std::collections::HashMap;

    fn target(input: &str) -> Target {
        Target {
            input: input.into(),
            ..Target::default()
        }
    }

    async fn scope_fixture() -> (super::super::testutil::Fixture, u64) {
        let fx = fixture().await;
        let id = fx
            .orchestrator
            .create_scope(CreateScopeParams {
                db_server_id: fx.server_id,
                name: "S".into(),
                group_id: 7,
                created_by: "alice".into(),
                scope_type: ScopeType::Custom,
                cycles: false,
                cycles_retention: -1,
                attributes: HashMap::new(),
            })
            .await
            .unwrap();
        (fx, id)
    }

    #[tokio::test]
    async fn test_update_targets_sizes_and_counts() {
        let (fx, id) = scope_fixture().await;
        let counts = fx
            .orchestrator
            .update_targets(
                id,
                vec![
                    target("10.0.0.0/30"),
                    target("bad input"),
                    target(""),
                    target("10.0.0.0/30"),
                ],
                true,
            )
            .await
            .unwrap();
        assert_eq!(counts, SyncCounts { created: 1, removed: 0, updated: 0 });
        assert_eq!(fx.catalog.scope(id).await.unwrap().unwrap().size, 4);
        assert!(fx.catalog.scope(id).await.unwrap().unwrap().last_sync.is_some());
    }

    #[tokio::test]
    async fn test_update_targets_idempotent() {
        let (fx, id) = scope_fixture().await;
        let inputs = vec![target("10.0.0.1"), target("10.0.0.2"), target("10.0.0.3")];
        fx.orchestrator
            .update_targets(id, inputs.clone(), true)
            .await
            .unwrap();
        let counts = fx
            .orchestrator
            .update_targets(id, inputs, true)
            .await
            .unwrap();
        assert_eq!(counts, SyncCounts::default());
    }

    #[tokio::test]
    async fn test_concurrent_update_fails_fast() {
        let (fx, id) = scope_fixture().await;
        let _held = fx.orchestrator.locks().try_acquire(id).unwrap();
        let err = fx
            .orchestrator
            .update_targets(id, vec![target("10.0.0.1")], true)
            .await
            .unwrap_err();
        assert_eq!(err, ManagerError::ScopeUpdateOngoing);
        // State untouched.
        assert_eq!(fx.catalog.scope(id).await.unwrap().unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_get_targets_during_sync_reports_placeholder() {
        let (fx, id) = scope_fixture().await;
        let _held = fx.orchestrator.locks().try_acquire(id).unwrap();
        let (synchronizing, targets) = fx.orchestrator.get_targets(id).await.unwrap();
        assert!(synchronizing);
        assert!(targets.is_empty());
    }

    #[tokio::test]
    async fn test_non_blocking_update_releases_lock() {
        let (fx, id) = scope_fixture().await;
        let counts = fx
            .orchestrator
            .update_targets(id, vec![target("10.0.0.1")], false)
            .await
            .unwrap();
        assert_eq!(counts, SyncCounts::default());
        // Size is already visible even though counts were not.
        assert_eq!(fx.catalog.scope(id).await.unwrap().unwrap().size, 1);

        // The background task finishes and releases the lock.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while fx.orchestrator.locks().is_locked(id) {
            assert!(std::time::Instant::now() < deadline, "lock never released");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let (synchronizing, targets) = fx.orchestrator.get_targets(id).await.unwrap();
        assert!(!synchronizing);
        assert_eq!(targets.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_input_unknown_is_not_found() {
        let (fx, id) = scope_fixture().await;
        let err = fx
            .orchestrator
            .reset_input(id, "10.9.9.9")
            .await
            .unwrap_err();
        assert_eq!(err, ManagerError::RecordNotFound);
    }

    #[tokio::test]
    async fn test_get_targets_unknown_scope() {
        let fx = fixture().await;
        let err = fx.orchestrator.get_targets(999).await.unwrap_err();
        assert_eq!(err, ManagerError::RecordNotFound);
    }
}
