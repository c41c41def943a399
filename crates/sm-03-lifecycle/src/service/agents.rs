//! Agent telemetry ingestion and progress ratio refresh.

use super::Orchestrator;
use chrono::Utc;
use shared_types::{AgentReport, ManagerError, ManagerResult};
use sm_01_catalog::ScopeChanges;
use std::collections::HashMap;
use tracing::{debug, warn};

impl Orchestrator {
    /// Ingest one telemetry batch: per scope, recompute the cycle ratios
    /// from the scope database's progress counts (floored to 4 decimals)
    /// and upsert each reporting agent.
    ///
    /// A vanished scope id is skipped, not errored -- deletion races
    /// telemetry all the time. An unreachable scope database is likewise
    /// skipped with a warning; one broken scope must not fail the whole
    /// batch.
    pub async fn update_agents(
        &self,
        stats: HashMap<u64, Vec<AgentReport>>,
    ) -> ManagerResult<()> {
        for (scope_id, reports) in stats {
            let scope = match self.catalog.scope(scope_id).await {
                Ok(Some(scope)) => scope,
                Ok(None) => {
                    debug!(scope = scope_id, "Telemetry for vanished scope skipped");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let conn = match self.broker.scope(&scope).await {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(scope = scope_id, error = %err,
                        "Scope database unreachable, telemetry skipped");
                    continue;
                }
            };
            let counts = match conn.progress_counts().await {
                Ok(counts) => counts,
                Err(err) => {
                    warn!(scope = scope_id, error = %err,
                        "Progress counts unavailable, telemetry skipped");
                    continue;
                }
            };
            self.catalog
                .update_scope(
                    scope_id,
                    &ScopeChanges {
                        ratios: Some(counts.ratios()),
                        ..ScopeChanges::default()
                    },
                )
                .await
                .map_err(ManagerError::from)?;

            let now = Utc::now();
            for report in &reports {
                self.catalog
                    .upsert_agent(scope_id, report, now)
                    .await
                    .map_err(ManagerError::from)?;
            }
            self.notifier.send(scope_id);
        }
        Ok(())
    }
}
