//! Peer side of the rollout broadcast.
//!
//! Each replica listens on the config channel and switches to every hash it
//! is not already running. Messages missed while a replica is down or
//! lagging are not replayed.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use cfgrid_health::{LocalStatus, StatusPublisher};
use cfgrid_snapshot::{ConfigStore, SourceError, VersionSource, checkout_snapshot};
use cfgrid_state::{Color, Subscription};

use crate::coordinator::UPDATING;

/// What a follower did with one broadcast hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowOutcome {
    /// Already running this hash.
    Ignored,
    Updated,
    Failed(String),
}

/// Applies broadcast config hashes on this replica.
#[derive(Clone)]
pub struct ConfigFollower {
    config: ConfigStore,
    source: Arc<dyn VersionSource>,
    publisher: StatusPublisher,
}

impl ConfigFollower {
    pub fn new(config: ConfigStore, source: Arc<dyn VersionSource>, publisher: StatusPublisher) -> Self {
        Self {
            config,
            source,
            publisher,
        }
    }

    /// Switch to `hash` unless it is already active.
    ///
    /// Publishes AMBER while switching, then GREEN on the new hash, or RED
    /// on the previous hash if the checkout failed.
    pub async fn apply(&self, hash: &str) -> FollowOutcome {
        let previous = self.config.current_hash().await.unwrap_or_default();
        if previous == hash {
            debug!(%hash, "broadcast hash already active");
            return FollowOutcome::Ignored;
        }

        info!(%hash, %previous, "switching to broadcast configuration");
        self.set_status(LocalStatus::new(Color::Amber, previous.as_str()).with_progress(UPDATING))
            .await;

        match self.install(hash).await {
            Ok(()) => {
                self.set_status(LocalStatus::new(Color::Green, hash)).await;
                FollowOutcome::Updated
            }
            Err(e) => {
                warn!(%hash, error = %e, "failed to follow broadcast configuration");
                self.set_status(LocalStatus::new(Color::Red, previous)).await;
                FollowOutcome::Failed(e.to_string())
            }
        }
    }

    async fn install(&self, hash: &str) -> Result<(), SourceError> {
        let update = self.config.begin_update().await;
        let snapshot = checkout_snapshot(self.source.as_ref(), hash).await?;
        update.install(snapshot);
        Ok(())
    }

    /// Apply every message of `subscription` until `shutdown` flips or the
    /// store goes away.
    pub async fn run(self, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        info!("config follower started");
        loop {
            tokio::select! {
                message = subscription.recv() => {
                    let Some(hash) = message else {
                        warn!("config channel closed");
                        break;
                    };
                    let hash = hash.trim();
                    if hash.is_empty() {
                        warn!("ignoring empty config broadcast");
                        continue;
                    }
                    self.apply(hash).await;
                }
                _ = shutdown.changed() => {
                    debug!("config follower shutting down");
                    break;
                }
            }
        }
    }

    async fn set_status(&self, status: LocalStatus) {
        if let Err(e) = self.publisher.set(status).await {
            warn!(error = %e, "failed to publish local status");
        }
    }
}
