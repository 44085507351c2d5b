//! Domain types kept in the shared store.
//!
//! Replica status records live in the `status` hash table, one field per
//! replica. Jobs are a `job:{id}` hash plus two lists sharing its TTL.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a rollout job.
pub type JobId = String;

// ── Color ─────────────────────────────────────────────────────────

/// Tri-state health value reported by every replica.
///
/// The declaration order is the severity order: `Green` is the least
/// severe value and `Red` the most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Color {
    Green,
    Amber,
    Red,
}

impl Color {
    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Green => "GREEN",
            Color::Amber => "AMBER",
            Color::Red => "RED",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Replica status ────────────────────────────────────────────────

/// One replica's self-reported status on the blackboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaStatus {
    /// Service fleet the replica belongs to (`items`, `search`, ...).
    pub service_tag: String,
    pub replica: String,
    pub color: Color,
    /// Hash of the configuration the replica is currently running.
    pub config_hash: String,
    /// Unix timestamp (milliseconds) of the publication.
    pub last_reported: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
}

impl ReplicaStatus {
    /// Build the field key inside the status table.
    pub fn table_key(&self) -> String {
        replica_key(&self.service_tag, &self.replica)
    }
}

/// Composite `serviceTag:replicaId` key of a replica.
pub fn replica_key(service_tag: &str, replica: &str) -> String {
    format!("{service_tag}:{replica}")
}

/// Service tag part of a `serviceTag:replicaId` key.
pub fn service_of_key(key: &str) -> &str {
    key.split_once(':').map(|(service, _)| service).unwrap_or(key)
}

// ── Jobs ──────────────────────────────────────────────────────────

/// Lifecycle status of a job. `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Created,
    Running,
    Done,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(JobStatus::Created),
            "RUNNING" => Ok(JobStatus::Running),
            "DONE" => Ok(JobStatus::Done),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Snapshot of a job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub status: JobStatus,
    /// Set when the job failed; may coexist with any status.
    pub error: Option<String>,
    /// Unix timestamp (milliseconds) of creation.
    pub created_at: u64,
}

impl Job {
    /// Whether the job finished and carries no error.
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Done && self.error.is_none()
    }
}
