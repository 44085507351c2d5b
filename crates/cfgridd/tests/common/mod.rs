//! Shared fixtures: in-process replicas over one in-memory shared store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cfgrid_core::CfgridConfig;
use cfgrid_health::{LocalStatus, StatusAggregator, StatusPublisher};
use cfgrid_rollout::{ConfigFollower, RolloutCoordinator};
use cfgrid_snapshot::{Checkout, ConfigSnapshot, ConfigStore, SourceError, SourceFuture, VersionSource};
use cfgrid_state::{
    Color, DistributedLock, ReplicaStatus, StateStore, epoch_millis, replica_key,
};

/// In-memory repository: references resolve to hashes, hashes to trees.
pub struct StaticRepo {
    refs: HashMap<String, String>,
    trees: HashMap<String, ConfigSnapshot>,
    delay: Duration,
    discards: AtomicUsize,
}

impl StaticRepo {
    pub fn new() -> Self {
        Self {
            refs: HashMap::new(),
            trees: HashMap::new(),
            delay: Duration::ZERO,
            discards: AtomicUsize::new(0),
        }
    }

    /// Register `snapshot` under its hash and under `reference`.
    pub fn with_ref(mut self, reference: &str, snapshot: ConfigSnapshot) -> Self {
        let hash = snapshot.hash().to_string();
        self.refs.insert(reference.to_string(), hash.clone());
        self.refs.insert(hash.clone(), hash.clone());
        self.trees.insert(hash, snapshot);
        self
    }

    /// Make every checkout take `delay`.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// How many times the working clone was thrown away.
    pub fn discards(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }
}

impl VersionSource for StaticRepo {
    fn ensure_cloned(&self) -> SourceFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn fetch_and_checkout<'a>(&'a self, reference: &'a str) -> SourceFuture<'a, Checkout> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.refs
                .get(reference)
                .map(|hash| Checkout::Updated(hash.clone()))
                .ok_or_else(|| SourceError::Checkout(format!("unknown reference '{reference}'")))
        })
    }

    fn load_snapshot<'a>(&'a self, hash: &'a str) -> SourceFuture<'a, ConfigSnapshot> {
        Box::pin(async move {
            self.trees
                .get(hash)
                .cloned()
                .ok_or_else(|| SourceError::Checkout(format!("no tree for {hash}")))
        })
    }

    fn discard_clone(&self) -> SourceFuture<'_, ()> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// The configuration every scenario starts from.
pub fn abc123() -> ConfigSnapshot {
    ConfigSnapshot::new("abc123")
        .with_file("fields.json", "{\"fields\":[\"title\"]}")
        .with_file("schemas/solr/schema.xml", "<schema/>")
}

/// Daemon configuration with fast polling.
pub fn test_config(service: &str, poll_ms: u64, timeout_ms: u64) -> CfgridConfig {
    let mut config = CfgridConfig::default();
    config.node.service = service.to_string();
    config.rollout.poll_interval = Duration::from_millis(poll_ms);
    config.rollout.convergence_timeout = Duration::from_millis(timeout_ms);
    config
}

/// One in-process replica.
pub struct Replica {
    pub config: ConfigStore,
    pub publisher: StatusPublisher,
    pub coordinator: RolloutCoordinator,
    pub follower: ConfigFollower,
}

pub fn replica(
    store: &StateStore,
    config: &CfgridConfig,
    replica_id: &str,
    source: Arc<dyn VersionSource>,
) -> Replica {
    let aggregator =
        StatusAggregator::new(store.clone(), &config.status.table, config.status.table_ttl);
    let publisher = StatusPublisher::new(
        aggregator,
        &config.node.service,
        replica_id,
        LocalStatus::new(Color::Green, ""),
    );
    let snapshots = ConfigStore::new(&config.repository.serving_root);
    let coordinator = RolloutCoordinator::from_config(
        store.clone(),
        config,
        snapshots.clone(),
        source.clone(),
        publisher.clone(),
    );
    let follower = ConfigFollower::new(snapshots.clone(), source, publisher.clone());
    Replica {
        config: snapshots,
        publisher,
        coordinator,
        follower,
    }
}

/// Publish a peer record directly, as a replica that never follows.
pub async fn stranded_peer(store: &StateStore, service: &str, color: Color, hash: &str) {
    StatusAggregator::new(store.clone(), "status", Duration::from_secs(3600))
        .publish(&ReplicaStatus {
            service_tag: service.to_string(),
            replica: "stranded".to_string(),
            color,
            config_hash: hash.to_string(),
            last_reported: epoch_millis(),
            progress: None,
        })
        .await
        .unwrap();
}

pub async fn is_locked(store: &StateStore, resource: &str) -> bool {
    DistributedLock::new(store.clone(), Duration::from_secs(60))
        .is_locked(resource)
        .await
        .unwrap()
}

/// Own status record of `replica`, read back from the status table.
pub async fn status_record(store: &StateStore, service: &str, replica: &str) -> ReplicaStatus {
    let raw = store
        .hget("status", &replica_key(service, replica))
        .await
        .unwrap()
        .expect("status record published");
    serde_json::from_str(&raw).unwrap()
}

/// Tar archive holding `files`.
pub fn tar_bundle(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append_data(&mut header, path, *content).unwrap();
    }
    builder.into_inner().unwrap()
}
