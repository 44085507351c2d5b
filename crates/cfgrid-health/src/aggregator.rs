//! The status blackboard and its two reductions.
//!
//! Every replica upserts one field of a shared hash table. Readers drop
//! entries older than `max_age`, so vanished replicas stop counting long
//! before the daily reset removes them. A field that cannot be decoded is
//! reported once and then removed, unless it was rewritten in the meantime.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use cfgrid_state::{
    Color, ReplicaStatus, StateError, StateResult, StateStore, epoch_millis, expire_command,
    hset_command, service_of_key,
};

/// Reads and writes replica status records in one shared hash table.
#[derive(Clone)]
pub struct StatusAggregator {
    store: StateStore,
    table: String,
    ttl: Duration,
}

impl StatusAggregator {
    pub fn new(store: StateStore, table: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            table: table.into(),
            ttl,
        }
    }

    /// Upsert one replica's record and refresh the table TTL in one
    /// transaction.
    pub async fn publish(&self, status: &ReplicaStatus) -> StateResult<()> {
        let encoded =
            serde_json::to_string(status).map_err(|e| StateError::Serialize(e.to_string()))?;
        let key = status.table_key();
        self.store
            .atomic(vec![
                hset_command(&self.table, &[(key.as_str(), encoded.as_str())], false),
                expire_command(&self.table, self.ttl),
            ])
            .await?;
        debug!(
            service = %status.service_tag,
            replica = %status.replica,
            color = %status.color,
            hash = %status.config_hash,
            "status published"
        );
        Ok(())
    }

    /// Group every record reported within `max_age` by service tag.
    pub async fn aggregate(&self, max_age: Duration) -> StateResult<ClusterView> {
        self.aggregate_at(max_age, epoch_millis()).await
    }

    /// [`aggregate`](Self::aggregate) evaluated at `now` (Unix millis).
    pub async fn aggregate_at(&self, max_age: Duration, now: u64) -> StateResult<ClusterView> {
        let max_age = max_age.as_millis() as u64;
        let mut view = ClusterView::default();

        for (key, raw) in self.store.hgetall(&self.table).await? {
            let status: ReplicaStatus = match serde_json::from_str(&raw) {
                Ok(status) => status,
                Err(e) => {
                    warn!(%key, error = %e, "unreadable status record, evicting");
                    if let Err(e) = self.store.hdel_if_eq(&self.table, &key, &raw).await {
                        warn!(%key, error = %e, "failed to evict unreadable status record");
                    }
                    view.unreadable.push(key);
                    continue;
                }
            };
            if now.saturating_sub(status.last_reported) > max_age {
                continue;
            }
            view.config_hashes.insert(status.config_hash.clone());
            view.services
                .entry(status.service_tag.clone())
                .or_default()
                .push(status);
        }
        Ok(view)
    }

    /// Worst status of every peer outside `own_service` against `target`.
    ///
    /// A store that cannot be read yields `Amber`: convergence can be
    /// neither confirmed nor refuted.
    pub async fn check_convergence(
        &self,
        own_service: &str,
        target: &str,
        max_age: Duration,
    ) -> Color {
        match self.aggregate(max_age).await {
            Ok(view) => view.convergence(own_service, target),
            Err(e) => {
                warn!(error = %e, "status table unavailable, cannot confirm convergence");
                Color::Amber
            }
        }
    }

    /// Cluster health report over records reported within `max_age`.
    pub async fn health_report(&self, max_age: Duration) -> StateResult<ClusterHealth> {
        Ok(self.aggregate(max_age).await?.health_report())
    }

    /// Drop the whole table. Live replicas re-appear on their next publish.
    pub async fn reset(&self) -> StateResult<bool> {
        let existed = self.store.delete(&self.table).await?;
        info!(table = %self.table, existed, "status table reset");
        Ok(existed)
    }
}

// ── Reductions ────────────────────────────────────────────────────

/// Fresh status records grouped by service tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterView {
    pub services: BTreeMap<String, Vec<ReplicaStatus>>,
    pub config_hashes: BTreeSet<String>,
    /// Table fields whose record could not be decoded.
    pub unreadable: Vec<String>,
}

impl ClusterView {
    /// Convergence check used by the rollout wait loop.
    ///
    /// Worst status wins: a RED or unreadable peer is RED, an AMBER peer or
    /// one on another hash is AMBER, and only all-GREEN-on-target is GREEN.
    /// Replicas of `own_service` are ignored.
    pub fn convergence(&self, own_service: &str, target: &str) -> Color {
        if self
            .unreadable
            .iter()
            .any(|key| service_of_key(key) != own_service)
        {
            return Color::Red;
        }

        let mut worst = Color::Green;
        let peers = self
            .services
            .iter()
            .filter(|(service, _)| service.as_str() != own_service)
            .flat_map(|(_, replicas)| replicas);
        for peer in peers {
            let color = match peer.color {
                Color::Green if peer.config_hash != target => Color::Amber,
                color => color,
            };
            worst = worst.max(color);
            if worst == Color::Red {
                break;
            }
        }
        worst
    }

    /// Cluster health report used by the status endpoint.
    ///
    /// Colors fold with the least severe value winning, then disagreement on
    /// the config hash forces RED. A RED replica is therefore not reported
    /// while every replica runs the same hash.
    pub fn health_report(&self) -> ClusterHealth {
        let mut color = self
            .services
            .values()
            .flatten()
            .fold(Color::Green, |acc, status| acc.min(status.color));
        if self.config_hashes.len() > 1 {
            color = Color::Red;
        }

        ClusterHealth {
            aggregate_color: color,
            services: self
                .services
                .iter()
                .map(|(service, replicas)| ServiceStatus {
                    service_tag: service.clone(),
                    replicas: replicas.clone(),
                })
                .collect(),
            distinct_config_hashes: self.config_hashes.iter().cloned().collect(),
        }
    }
}

/// Response shape of the cluster health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterHealth {
    pub aggregate_color: Color,
    pub services: Vec<ServiceStatus>,
    pub distinct_config_hashes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub service_tag: String,
    pub replicas: Vec<ReplicaStatus>,
}
