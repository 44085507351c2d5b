//! Rollout coordinator: drives one configuration rollout end to end.
//!
//! `update_config` validates, takes the cluster-wide lock, creates a job and
//! returns its id. The rest runs on a detached task: fetch and install the
//! snapshot, broadcast its hash, wait for every peer to report it, record
//! the outcome on the job and release the lock.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cfgrid_core::CfgridConfig;
use cfgrid_health::{LocalStatus, StatusPublisher};
use cfgrid_snapshot::{ConfigStore, SourceError, VersionSource, bundle, checkout_snapshot};
use cfgrid_state::{
    Color, DistributedLock, JobId, JobTracker, LockHandle, StateError, StateStore,
};

use crate::error::{RolloutError, RolloutResult};
use crate::phase::{RolloutPhase, RolloutSettings};
use crate::request::{RolloutRequest, RolloutSource};

/// Progress note published while a replica switches configuration.
pub const UPDATING: &str = "updating";

/// Everything a rollout touches, shared with its background task.
struct Inner {
    store: StateStore,
    lock: DistributedLock,
    jobs: JobTracker,
    config: ConfigStore,
    source: Arc<dyn VersionSource>,
    publisher: StatusPublisher,
    settings: RolloutSettings,
}

/// Starts rollouts on this replica.
#[derive(Clone)]
pub struct RolloutCoordinator {
    inner: Arc<Inner>,
}

/// A started rollout.
pub struct RolloutTask {
    pub job_id: JobId,
    handle: JoinHandle<RolloutPhase>,
}

impl RolloutTask {
    /// Wait for the background task and return its outcome phase.
    pub async fn finished(self) -> RolloutPhase {
        match self.handle.await {
            Ok(phase) => phase,
            Err(e) => {
                error!(job_id = %self.job_id, error = %e, "rollout task panicked");
                RolloutPhase::Released
            }
        }
    }
}

impl RolloutCoordinator {
    pub fn new(
        store: StateStore,
        lock: DistributedLock,
        jobs: JobTracker,
        config: ConfigStore,
        source: Arc<dyn VersionSource>,
        publisher: StatusPublisher,
        settings: RolloutSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                lock,
                jobs,
                config,
                source,
                publisher,
                settings,
            }),
        }
    }

    /// Wire a coordinator from the daemon configuration. The lock TTL is
    /// the job TTL.
    pub fn from_config(
        store: StateStore,
        config: &CfgridConfig,
        snapshots: ConfigStore,
        source: Arc<dyn VersionSource>,
        publisher: StatusPublisher,
    ) -> Self {
        let ttl = config.rollout.job_ttl;
        Self::new(
            store.clone(),
            DistributedLock::new(store.clone(), ttl),
            JobTracker::new(store.clone(), ttl),
            snapshots,
            source,
            publisher,
            RolloutSettings::from(config),
        )
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.inner.jobs
    }

    pub fn config(&self) -> &ConfigStore {
        &self.inner.config
    }

    pub fn publisher(&self) -> &StatusPublisher {
        &self.inner.publisher
    }

    pub fn settings(&self) -> &RolloutSettings {
        &self.inner.settings
    }

    /// Start a rollout and return the id of the job tracking it.
    ///
    /// Fails synchronously with `InvalidArgument` for a malformed request
    /// and with `Conflict` while another rollout holds the lock.
    pub async fn update_config(&self, request: RolloutRequest) -> RolloutResult<JobId> {
        self.start(request).await.map(|task| task.job_id)
    }

    /// Like [`update_config`](Self::update_config), keeping a handle on the
    /// background task.
    pub async fn start(&self, request: RolloutRequest) -> RolloutResult<RolloutTask> {
        let source = request.validate()?;
        let inner = &self.inner;
        let resource = inner.settings.resource.as_str();

        let handle = match inner.lock.acquire(resource).await {
            Ok(handle) => handle,
            Err(StateError::Conflict(_)) => {
                info!(%resource, "rollout rejected, lock held");
                return Err(RolloutError::Conflict(resource.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        debug!(%resource, phase = %RolloutPhase::Locked, "configuration lock acquired");

        let job_id = match inner.jobs.create_job(&source.title()).await {
            Ok(id) => id,
            Err(e) => {
                inner.release(&handle).await;
                return Err(e.into());
            }
        };
        inner
            .record(&job_id, RolloutPhase::JobCreated, &source.title())
            .await;

        let previous = inner.publisher.current().config_hash;
        inner
            .set_status(LocalStatus::new(Color::Amber, previous).with_progress(UPDATING))
            .await;

        let task = tokio::spawn(run_rollout(self.inner.clone(), job_id.clone(), source, handle));
        Ok(RolloutTask {
            job_id,
            handle: task,
        })
    }
}

// ── Background task ───────────────────────────────────────────────

async fn run_rollout(
    inner: Arc<Inner>,
    job_id: JobId,
    source: RolloutSource,
    handle: LockHandle,
) -> RolloutPhase {
    let outcome = inner.drive(&job_id, source).await;
    inner.release(&handle).await;
    inner
        .record(&job_id, RolloutPhase::Released, &format!("outcome {outcome}"))
        .await;
    outcome
}

impl Inner {
    async fn drive(&self, job_id: &str, source: RolloutSource) -> RolloutPhase {
        if let Err(e) = self.jobs.set_status_running(job_id).await {
            error!(%job_id, error = %e, "failed to mark job running");
        }

        self.record(job_id, RolloutPhase::Fetching, &source.title()).await;
        let hash = match self.fetch(source).await {
            Ok(hash) => hash,
            Err(e) => {
                let message = format!("fetch failed: {e}");
                warn!(%job_id, error = %e, "rollout failed while fetching");
                self.finish(job_id, Some(&message)).await;
                let previous = self.publisher.current().config_hash;
                self.set_status(LocalStatus::new(Color::Red, previous)).await;
                self.record(job_id, RolloutPhase::FetchFailed, &message).await;
                return RolloutPhase::FetchFailed;
            }
        };
        if let Err(e) = self.jobs.add_items(job_id, &[hash.clone()]).await {
            error!(%job_id, error = %e, "failed to record installed hash");
        }

        let announced = match self.store.publish(&self.settings.channel, &hash).await {
            Ok(seq) => format!("announced {hash} as message {seq}"),
            Err(e) => {
                warn!(%job_id, error = %e, "failed to broadcast config hash");
                format!("broadcast of {hash} failed: {e}")
            }
        };
        self.record(job_id, RolloutPhase::Broadcasting, &announced).await;

        self.record(
            job_id,
            RolloutPhase::Waiting,
            &format!("waiting up to {:?} for peers", self.settings.convergence_timeout),
        )
        .await;
        let outcome = self.await_convergence(&hash).await;

        match outcome {
            RolloutPhase::Converged => {
                self.finish(job_id, None).await;
                self.set_status(LocalStatus::new(Color::Green, hash.as_str())).await;
                self.record(job_id, outcome, &format!("all peers run {hash}")).await;
            }
            _ => {
                let message = if outcome == RolloutPhase::PeerFailed {
                    format!("a peer reported RED while converging on {hash}")
                } else {
                    format!(
                        "peers did not converge on {hash} within {:?}",
                        self.settings.convergence_timeout
                    )
                };
                warn!(%job_id, %hash, %outcome, "rollout did not converge");
                self.finish(job_id, Some(&message)).await;
                self.set_status(LocalStatus::new(Color::Red, hash.as_str())).await;
                self.record(job_id, outcome, &message).await;
            }
        }
        outcome
    }

    /// Obtain and install the next snapshot while holding the write side of
    /// the config store.
    async fn fetch(&self, source: RolloutSource) -> Result<String, SourceError> {
        let update = self.config.begin_update().await;
        let snapshot = match source {
            RolloutSource::Reference(name) => checkout_snapshot(self.source.as_ref(), &name).await?,
            RolloutSource::Bundle { archive, hash } => {
                self.source.discard_clone().await?;
                bundle::unpack(&archive, &hash)?
            }
        };
        let installed = update.install(snapshot);
        Ok(installed.hash().to_string())
    }

    /// Sleep, then check, for at most `rounds` rounds.
    async fn await_convergence(&self, target: &str) -> RolloutPhase {
        let aggregator = self.publisher.aggregator();
        let own_service = self.publisher.service_tag();
        let rounds = self.settings.rounds();

        for round in 1..=rounds {
            tokio::time::sleep(self.settings.poll_interval).await;
            let color = aggregator
                .check_convergence(own_service, target, self.settings.status_max_age)
                .await;
            debug!(round, rounds, %color, %target, "convergence check");
            match color {
                Color::Green => return RolloutPhase::Converged,
                Color::Red => return RolloutPhase::PeerFailed,
                Color::Amber => {}
            }
        }
        RolloutPhase::TimedOut
    }

    /// Set the job error (if any) and mark it done.
    async fn finish(&self, job_id: &str, error: Option<&str>) {
        if let Some(message) = error {
            if let Err(e) = self.jobs.set_error(job_id, message).await {
                error!(%job_id, error = %e, "failed to record job error");
            }
        }
        if let Err(e) = self.jobs.set_status_done(job_id).await {
            error!(%job_id, error = %e, "failed to mark job done");
        }
    }

    /// Log a phase transition and append it to the job's logs.
    async fn record(&self, job_id: &str, phase: RolloutPhase, detail: &str) {
        info!(%job_id, %phase, "{detail}");
        if let Err(e) = self
            .jobs
            .add_logs(job_id, &[format!("{phase}: {detail}")])
            .await
        {
            debug!(%job_id, error = %e, "job log not written");
        }
    }

    async fn set_status(&self, status: LocalStatus) {
        if let Err(e) = self.publisher.set(status).await {
            warn!(error = %e, "failed to publish local status");
        }
    }

    async fn release(&self, handle: &LockHandle) {
        let resource = self.settings.resource.as_str();
        match self.lock.release(resource, handle).await {
            Ok(true) => debug!(%resource, "configuration lock released"),
            Ok(false) => warn!(%resource, "configuration lock already expired or taken over"),
            Err(e) => error!(%resource, error = %e, "failed to release configuration lock"),
        }
    }
}
