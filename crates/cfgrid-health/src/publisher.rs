//! Status publisher: background task that keeps this replica's record
//! fresh on the blackboard.
//!
//! The local status lives in a `watch` channel. Changes are published
//! immediately; the loop re-publishes on a fixed interval and performs the
//! daily table reset.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use cfgrid_state::{Color, ReplicaStatus, StateResult, epoch_millis};

use crate::aggregator::StatusAggregator;

/// What this replica currently reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStatus {
    pub color: Color,
    pub config_hash: String,
    pub progress: Option<String>,
}

impl LocalStatus {
    pub fn new(color: Color, config_hash: impl Into<String>) -> Self {
        Self {
            color,
            config_hash: config_hash.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: impl Into<String>) -> Self {
        self.progress = Some(progress.into());
        self
    }
}

/// Publishes this replica's [`LocalStatus`] to the shared status table.
#[derive(Clone)]
pub struct StatusPublisher {
    aggregator: StatusAggregator,
    service_tag: Arc<str>,
    replica: Arc<str>,
    local: Arc<watch::Sender<LocalStatus>>,
}

impl StatusPublisher {
    pub fn new(
        aggregator: StatusAggregator,
        service_tag: &str,
        replica: &str,
        initial: LocalStatus,
    ) -> Self {
        let (local, _) = watch::channel(initial);
        Self {
            aggregator,
            service_tag: Arc::from(service_tag),
            replica: Arc::from(replica),
            local: Arc::new(local),
        }
    }

    pub fn service_tag(&self) -> &str {
        &self.service_tag
    }

    pub fn replica(&self) -> &str {
        &self.replica
    }

    pub fn aggregator(&self) -> &StatusAggregator {
        &self.aggregator
    }

    /// The status this replica currently reports.
    pub fn current(&self) -> LocalStatus {
        self.local.borrow().clone()
    }

    /// Replace the local status and publish it right away.
    ///
    /// The local value changes even if publishing fails.
    pub async fn set(&self, status: LocalStatus) -> StateResult<()> {
        debug!(color = %status.color, hash = %status.config_hash, "local status changed");
        self.local.send_replace(status);
        self.publish_now().await
    }

    /// Publish the current local status stamped with the current time.
    pub async fn publish_now(&self) -> StateResult<()> {
        let local = self.current();
        self.aggregator
            .publish(&ReplicaStatus {
                service_tag: self.service_tag.to_string(),
                replica: self.replica.to_string(),
                color: local.color,
                config_hash: local.config_hash,
                last_reported: epoch_millis(),
                progress: local.progress,
            })
            .await
    }

    /// Re-publish every `interval` and reset the table once a day at
    /// `reset_hour_utc`, until `shutdown` flips.
    pub async fn run(
        self,
        interval: Duration,
        reset_hour_utc: u8,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut schedule = ResetSchedule::new(u32::from(reset_hour_utc), epoch_millis());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            service = %self.service_tag,
            replica = %self.replica,
            ?interval,
            reset_hour_utc,
            "status publisher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if schedule.due(epoch_millis()) {
                        if let Err(e) = self.aggregator.reset().await {
                            error!(error = %e, "daily status table reset failed");
                        }
                    }
                    if let Err(e) = self.publish_now().await {
                        error!(error = %e, "failed to publish replica status");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("status publisher shutting down");
                    break;
                }
            }
        }
    }
}

/// Once-per-UTC-day trigger at a fixed hour.
#[derive(Debug, Clone)]
pub struct ResetSchedule {
    hour: u32,
    last_day: Option<NaiveDate>,
}

impl ResetSchedule {
    /// A schedule whose first reset is the next time `hour` is reached
    /// after `now` (Unix millis).
    pub fn new(hour: u32, now: u64) -> Self {
        let last_day = utc(now)
            .filter(|at| at.hour() >= hour)
            .map(|at| at.date_naive());
        Self { hour, last_day }
    }

    /// Whether a reset should run at `now`. Returns true at most once per
    /// UTC calendar day.
    pub fn due(&mut self, now: u64) -> bool {
        let Some(at) = utc(now) else {
            warn!(now, "clock outside the representable range, skipping reset");
            return false;
        };
        let day = at.date_naive();
        if at.hour() < self.hour || self.last_day == Some(day) {
            return false;
        }
        self.last_day = Some(day);
        true
    }
}

fn utc(now: u64) -> Option<DateTime<Utc>> {
    i64::try_from(now)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}
