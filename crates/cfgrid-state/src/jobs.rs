//! Ephemeral job records.
//!
//! A job is a `job:{id}` hash (`title`, `status`, `error`, `createdAt`) plus
//! the append-only lists `job:{id}:logs` and `job:{id}:items`. All three keys
//! are created together and share one TTL; nothing is queryable afterwards.
//!
//! Creation is one transaction. Later writes only land on a live record and
//! keep its expiry, so a write racing the TTL can never bring back a job
//! without one. Status writes are otherwise unconditional; keeping `DONE`
//! terminal is up to the caller.

use std::time::Duration;

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::{StateStore, epoch_millis, expire_command, hset_command, rpush_command};
use crate::types::{Job, JobId, JobStatus};

const FIELD_TITLE: &str = "title";
const FIELD_STATUS: &str = "status";
const FIELD_ERROR: &str = "error";
const FIELD_CREATED_AT: &str = "createdAt";

/// Placeholder that materializes each list at creation time.
const SENTINEL: &str = "";

/// Creates and updates job records in the shared store.
#[derive(Clone)]
pub struct JobTracker {
    store: StateStore,
    ttl: Duration,
}

impl JobTracker {
    pub fn new(store: StateStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Create a job in `CREATED` state and return its id.
    pub async fn create_job(&self, title: &str) -> StateResult<JobId> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = epoch_millis().to_string();
        let (record, logs, items) = (record_key(&id), logs_key(&id), items_key(&id));
        let sentinel = [SENTINEL.to_string()];

        self.store
            .atomic(vec![
                hset_command(
                    &record,
                    &[
                        (FIELD_TITLE, title),
                        (FIELD_STATUS, JobStatus::Created.as_str()),
                        (FIELD_ERROR, ""),
                        (FIELD_CREATED_AT, created_at.as_str()),
                    ],
                    false,
                ),
                rpush_command(&logs, &sentinel, false),
                rpush_command(&items, &sentinel, false),
                expire_command(&record, self.ttl),
                expire_command(&logs, self.ttl),
                expire_command(&items, self.ttl),
            ])
            .await?;

        debug!(job_id = %id, %title, "job created");
        Ok(id)
    }

    /// Read a job record.
    pub async fn get_job(&self, id: &str) -> StateResult<Job> {
        let fields = self.store.hgetall(&record_key(id)).await?;
        let status = fields
            .get(FIELD_STATUS)
            .ok_or_else(|| not_found(id))?;
        let status = status.parse::<JobStatus>().map_err(StateError::Deserialize)?;
        let created_at = fields
            .get(FIELD_CREATED_AT)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default();

        Ok(Job {
            id: id.to_string(),
            title: fields.get(FIELD_TITLE).cloned().unwrap_or_default(),
            status,
            error: fields.get(FIELD_ERROR).filter(|e| !e.is_empty()).cloned(),
            created_at,
        })
    }

    pub async fn set_status_running(&self, id: &str) -> StateResult<()> {
        self.set_status(id, JobStatus::Running).await
    }

    pub async fn set_status_done(&self, id: &str) -> StateResult<()> {
        self.set_status(id, JobStatus::Done).await
    }

    async fn set_status(&self, id: &str, status: JobStatus) -> StateResult<()> {
        self.update_record(id, FIELD_STATUS, status.as_str()).await?;
        debug!(job_id = %id, %status, "job status updated");
        Ok(())
    }

    /// Overwrite the job's error. Does not touch its status.
    pub async fn set_error(&self, id: &str, message: &str) -> StateResult<()> {
        self.update_record(id, FIELD_ERROR, message).await
    }

    pub async fn add_logs(&self, id: &str, lines: &[String]) -> StateResult<()> {
        self.append(id, &logs_key(id), lines).await
    }

    /// Log lines in insertion order.
    pub async fn get_logs(&self, id: &str) -> StateResult<Vec<String>> {
        self.read_list(id, &logs_key(id)).await
    }

    pub async fn add_items(&self, id: &str, items: &[String]) -> StateResult<()> {
        self.append(id, &items_key(id), items).await
    }

    /// Item ids in insertion order.
    pub async fn get_items(&self, id: &str) -> StateResult<Vec<String>> {
        self.read_list(id, &items_key(id)).await
    }

    async fn update_record(&self, id: &str, field: &str, value: &str) -> StateResult<()> {
        if self
            .store
            .hset_existing(&record_key(id), &[(field, value)])
            .await?
        {
            Ok(())
        } else {
            Err(not_found(id))
        }
    }

    async fn append(&self, id: &str, key: &str, values: &[String]) -> StateResult<()> {
        match self.store.rpush_existing(key, values).await? {
            Some(_) => Ok(()),
            None => Err(not_found(id)),
        }
    }

    async fn read_list(&self, id: &str, key: &str) -> StateResult<Vec<String>> {
        if !self.store.exists(&record_key(id)).await? {
            return Err(not_found(id));
        }
        Ok(strip_sentinel(self.store.lrange(key).await?))
    }
}

fn not_found(id: &str) -> StateError {
    StateError::NotFound(format!("job {id}"))
}

fn strip_sentinel(mut entries: Vec<String>) -> Vec<String> {
    if entries.first().is_some_and(|first| first == SENTINEL) {
        entries.remove(0);
    }
    entries
}

fn record_key(id: &str) -> String {
    format!("job:{id}")
}

fn logs_key(id: &str) -> String {
    format!("job:{id}:logs")
}

fn items_key(id: &str) -> String {
    format!("job:{id}:items")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tracker(ttl: Duration) -> JobTracker {
        JobTracker::new(StateStore::open_in_memory().unwrap(), ttl)
    }

    #[tokio::test]
    async fn new_job_is_created_without_error() {
        let jobs = test_tracker(Duration::from_secs(60));
        let id = jobs.create_job("update config").await.unwrap();

        let job = jobs.get_job(&id).await.unwrap();
        assert_eq!(job.title, "update config");
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.error, None);
        assert!(job.created_at > 0);
        assert!(jobs.get_logs(&id).await.unwrap().is_empty());
        assert!(jobs.get_items(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let jobs = test_tracker(Duration::from_secs(60));
        assert!(matches!(jobs.get_job("nope").await, Err(StateError::NotFound(_))));
        assert!(matches!(
            jobs.set_status_running("nope").await,
            Err(StateError::NotFound(_))
        ));
        assert!(matches!(jobs.set_status_done("nope").await, Err(StateError::NotFound(_))));
        assert!(matches!(
            jobs.add_logs("nope", &["x".to_string()]).await,
            Err(StateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn job_can_finish_with_error() {
        let jobs = test_tracker(Duration::from_secs(60));
        let id = jobs.create_job("update config").await.unwrap();

        jobs.set_status_running(&id).await.unwrap();
        jobs.set_error(&id, "fetch failed").await.unwrap();
        assert_eq!(jobs.get_job(&id).await.unwrap().status, JobStatus::Running);

        jobs.set_status_done(&id).await.unwrap();
        let job = jobs.get_job(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.error.as_deref(), Some("fetch failed"));
        assert!(!job.succeeded());
    }

    #[tokio::test]
    async fn status_writes_are_unconditional_at_storage_level() {
        let jobs = test_tracker(Duration::from_secs(60));
        let id = jobs.create_job("update config").await.unwrap();
        jobs.set_status_done(&id).await.unwrap();
        jobs.set_status_running(&id).await.unwrap();
        assert_eq!(jobs.get_job(&id).await.unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn logs_and_items_append_in_order() {
        let jobs = test_tracker(Duration::from_secs(60));
        let id = jobs.create_job("update config").await.unwrap();

        jobs.add_logs(&id, &["one".to_string(), "two".to_string()]).await.unwrap();
        jobs.add_logs(&id, &["three".to_string()]).await.unwrap();
        jobs.add_items(&id, &["items:0".to_string()]).await.unwrap();

        assert_eq!(jobs.get_logs(&id).await.unwrap(), vec!["one", "two", "three"]);
        assert_eq!(jobs.get_items(&id).await.unwrap(), vec!["items:0"]);
    }

    #[tokio::test]
    async fn job_expires_as_a_unit() {
        let jobs = test_tracker(Duration::from_millis(20));
        let id = jobs.create_job("update config").await.unwrap();
        jobs.add_logs(&id, &["line".to_string()]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(matches!(jobs.get_job(&id).await, Err(StateError::NotFound(_))));
        assert!(!jobs.store.exists(&logs_key(&id)).await.unwrap());
        assert!(!jobs.store.exists(&items_key(&id)).await.unwrap());
    }

    #[tokio::test]
    async fn creation_gives_every_key_the_ttl() {
        let jobs = test_tracker(Duration::from_millis(20));
        let id = jobs.create_job("update config").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!jobs.store.exists(&record_key(&id)).await.unwrap());
        assert!(!jobs.store.exists(&logs_key(&id)).await.unwrap());
        assert!(!jobs.store.exists(&items_key(&id)).await.unwrap());
    }

    #[tokio::test]
    async fn writes_after_expiry_do_not_resurrect_the_job() {
        let jobs = test_tracker(Duration::from_millis(30));
        let id = jobs.create_job("update config").await.unwrap();
        jobs.set_status_running(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(matches!(
            jobs.set_status_done(&id).await,
            Err(StateError::NotFound(_))
        ));
        assert!(matches!(
            jobs.set_error(&id, "too late").await,
            Err(StateError::NotFound(_))
        ));
        assert!(matches!(
            jobs.add_logs(&id, &["late".to_string()]).await,
            Err(StateError::NotFound(_))
        ));
        assert!(matches!(
            jobs.add_items(&id, &["items:0".to_string()]).await,
            Err(StateError::NotFound(_))
        ));
        assert!(!jobs.store.exists(&record_key(&id)).await.unwrap());
        assert!(!jobs.store.exists(&logs_key(&id)).await.unwrap());
        assert!(!jobs.store.exists(&items_key(&id)).await.unwrap());
    }

    #[tokio::test]
    async fn updates_keep_the_creation_ttl() {
        let jobs = test_tracker(Duration::from_millis(40));
        let id = jobs.create_job("update config").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        jobs.set_status_running(&id).await.unwrap();
        jobs.add_logs(&id, &["line".to_string()]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(matches!(jobs.get_job(&id).await, Err(StateError::NotFound(_))));
        assert!(!jobs.store.exists(&logs_key(&id)).await.unwrap());
    }
}
