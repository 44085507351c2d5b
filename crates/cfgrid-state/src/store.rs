//! StateStore: the shared store every cfgrid replica coordinates through.
//!
//! Exposes the small set of key/value primitives the coordination layer is
//! built on: string keys with TTL and compare-and-delete, hash tables, lists
//! and a pub/sub channel. Exactly one process owns the redb database; it
//! opens the store locally and serves it with [`crate::server::router`].
//! Every other process connects to the owner, and each primitive becomes
//! one request that the owner runs inside a single redb transaction.
//!
//! Both handles expose the same API, so locks, jobs and status records are
//! shared by every replica whichever side of the connection it is on.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::command::{Command, Reply};
use crate::error::StateResult;
use crate::local::LocalStore;
use crate::pubsub::{Message, PollReply, PollRequest};
use crate::remote::{self, RemoteStore};

#[derive(Clone)]
enum Backend {
    Local(LocalStore),
    Remote(RemoteStore),
}

/// Handle on the shared store. Cheap to clone.
#[derive(Clone)]
pub struct StateStore {
    backend: Backend,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path. This process
    /// becomes the owner.
    pub fn open(path: &Path) -> StateResult<Self> {
        Ok(Self {
            backend: Backend::Local(LocalStore::open(path)?),
        })
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        Ok(Self {
            backend: Backend::Local(LocalStore::open_in_memory()?),
        })
    }

    /// Use the store owned by the process listening on `addr` (`host:port`).
    pub fn connect(addr: impl Into<String>) -> Self {
        let remote = RemoteStore::new(addr);
        info!(owner = remote.addr(), "using remote state store");
        Self {
            backend: Backend::Remote(remote),
        }
    }

    /// Whether this process owns the database.
    pub fn is_local(&self) -> bool {
        matches!(self.backend, Backend::Local(_))
    }

    /// Run one primitive against the owning database.
    pub async fn execute(&self, command: Command) -> StateResult<Reply> {
        match &self.backend {
            Backend::Local(local) => local.execute(command),
            Backend::Remote(remote) => remote.execute(&command).await,
        }
    }

    /// Pub/sub messages after a sequence number (see [`PollRequest`]).
    pub async fn poll(&self, request: &PollRequest) -> StateResult<PollReply> {
        match &self.backend {
            Backend::Local(local) => Ok(local.channels.poll(request).await),
            Backend::Remote(remote) => remote.poll(request).await,
        }
    }

    /// Apply data commands in one transaction; all succeed or none do.
    pub async fn atomic(&self, commands: Vec<Command>) -> StateResult<Vec<Reply>> {
        self.execute(Command::Atomic { commands })
            .await?
            .into_many()
    }

    // ── Keys ───────────────────────────────────────────────────────

    /// Set `key` to `value` only if no live value exists. Returns true if set.
    pub async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> StateResult<bool> {
        self.execute(Command::SetNx {
            key: key.to_string(),
            value: value.to_string(),
            ttl_ms: ttl.map(|ttl| ttl.as_millis() as u64),
        })
        .await?
        .into_flag()
    }

    /// Get the live value of a string key.
    pub async fn get(&self, key: &str) -> StateResult<Option<String>> {
        self.execute(Command::Get {
            key: key.to_string(),
        })
        .await?
        .into_value()
    }

    /// Delete `key` only if its live value equals `expected`. Returns true if deleted.
    pub async fn delete_if_eq(&self, key: &str, expected: &str) -> StateResult<bool> {
        self.execute(Command::DeleteIfEq {
            key: key.to_string(),
            expected: expected.to_string(),
        })
        .await?
        .into_flag()
    }

    // ── Hashes ─────────────────────────────────────────────────────

    /// Upsert one field of a hash table. Keeps the table's current expiry.
    pub async fn hset(&self, key: &str, field: &str, value: &str) -> StateResult<()> {
        self.hset_many(key, &[(field, value)]).await
    }

    /// Upsert several fields of a hash table in one transaction.
    pub async fn hset_many(&self, key: &str, fields: &[(&str, &str)]) -> StateResult<()> {
        self.execute(hset_command(key, fields, false))
            .await?
            .into_flag()
            .map(|_| ())
    }

    /// Upsert fields of a live hash table, keeping its expiry. Returns false
    /// without writing when the table is missing or expired.
    pub async fn hset_existing(&self, key: &str, fields: &[(&str, &str)]) -> StateResult<bool> {
        self.execute(hset_command(key, fields, true))
            .await?
            .into_flag()
    }

    /// Get one field of a hash table.
    pub async fn hget(&self, key: &str, field: &str) -> StateResult<Option<String>> {
        self.execute(Command::HGet {
            key: key.to_string(),
            field: field.to_string(),
        })
        .await?
        .into_value()
    }

    /// Get every field of a hash table. A missing table reads as empty.
    pub async fn hgetall(&self, key: &str) -> StateResult<BTreeMap<String, String>> {
        self.execute(Command::HGetAll {
            key: key.to_string(),
        })
        .await?
        .into_fields()
    }

    /// Remove a field only while it still holds `expected`. Returns true if removed.
    pub async fn hdel_if_eq(&self, key: &str, field: &str, expected: &str) -> StateResult<bool> {
        self.execute(Command::HDelIfEq {
            key: key.to_string(),
            field: field.to_string(),
            expected: expected.to_string(),
        })
        .await?
        .into_flag()
    }

    // ── Lists ──────────────────────────────────────────────────────

    /// Append values to a list. Returns the new length.
    pub async fn rpush(&self, key: &str, values: &[String]) -> StateResult<usize> {
        let len = self
            .execute(rpush_command(key, values, false))
            .await?
            .into_length()?;
        Ok(len.unwrap_or_default() as usize)
    }

    /// Append values to a live list, keeping its expiry. Returns `None`
    /// without writing when the list is missing or expired.
    pub async fn rpush_existing(&self, key: &str, values: &[String]) -> StateResult<Option<usize>> {
        let len = self
            .execute(rpush_command(key, values, true))
            .await?
            .into_length()?;
        Ok(len.map(|len| len as usize))
    }

    /// Read a whole list in insertion order. A missing list reads as empty.
    pub async fn lrange(&self, key: &str) -> StateResult<Vec<String>> {
        self.execute(Command::LRange {
            key: key.to_string(),
        })
        .await?
        .into_values()
    }

    // ── Any kind ───────────────────────────────────────────────────

    /// Set the TTL of a key of any kind. Returns false if the key is absent.
    pub async fn expire(&self, key: &str, ttl: Duration) -> StateResult<bool> {
        self.execute(expire_command(key, ttl))
            .await?
            .into_flag()
    }

    /// Delete a key of any kind. Returns true if a live value existed.
    pub async fn delete(&self, key: &str) -> StateResult<bool> {
        self.execute(Command::Delete {
            key: key.to_string(),
        })
        .await?
        .into_flag()
    }

    /// Whether a live key of any kind exists.
    pub async fn exists(&self, key: &str) -> StateResult<bool> {
        self.execute(Command::Exists {
            key: key.to_string(),
        })
        .await?
        .into_flag()
    }

    // ── Pub/sub ────────────────────────────────────────────────────

    /// Publish a payload on a channel. Returns the message's sequence number
    /// on that channel; having no subscribers is not an error.
    pub async fn publish(&self, channel: &str, payload: &str) -> StateResult<u64> {
        self.execute(Command::Publish {
            channel: channel.to_string(),
            payload: payload.to_string(),
        })
        .await?
        .into_sequence()
    }

    /// Subscribe to a channel. Only messages published after this call are seen.
    pub async fn subscribe(&self, channel: &str) -> StateResult<Subscription> {
        let feed = match &self.backend {
            Backend::Local(local) => Feed::Local(local.channels.watch(channel)),
            Backend::Remote(remote) => {
                let head = self
                    .execute(Command::Head {
                        channel: channel.to_string(),
                    })
                    .await?
                    .into_head()?;
                Feed::Remote(remote::spawn_poller(remote.clone(), channel.to_string(), head))
            }
        };
        Ok(Subscription {
            channel: channel.to_string(),
            feed,
        })
    }
}

/// `HSet` command for a batch or a single call.
pub fn hset_command(key: &str, fields: &[(&str, &str)], existing_only: bool) -> Command {
    Command::HSet {
        key: key.to_string(),
        fields: fields
            .iter()
            .map(|(field, value)| (field.to_string(), value.to_string()))
            .collect(),
        existing_only,
    }
}

/// `RPush` command for a batch or a single call.
pub fn rpush_command(key: &str, values: &[String], existing_only: bool) -> Command {
    Command::RPush {
        key: key.to_string(),
        values: values.to_vec(),
        existing_only,
    }
}

/// `Expire` command for a batch or a single call.
pub fn expire_command(key: &str, ttl: Duration) -> Command {
    Command::Expire {
        key: key.to_string(),
        ttl_ms: ttl.as_millis() as u64,
    }
}

enum Feed {
    Local(broadcast::Receiver<Message>),
    Remote(mpsc::Receiver<String>),
}

/// Receiving side of a pub/sub channel.
pub struct Subscription {
    channel: String,
    feed: Feed,
}

impl Subscription {
    /// Wait for the next payload on this channel.
    ///
    /// Returns `None` once the store has been dropped. Messages overwritten
    /// while the subscriber lagged behind are lost.
    pub async fn recv(&mut self) -> Option<String> {
        match &mut self.feed {
            Feed::Local(rx) => loop {
                match rx.recv().await {
                    Ok(message) => return Some(message.payload),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(channel = %self.channel, missed, "subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            Feed::Remote(rx) => rx.recv().await,
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    // ── Keys ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn set_nx_only_sets_absent_keys() {
        let store = test_store();
        assert!(store.set_nx("lock:config", "a", None).await.unwrap());
        assert!(!store.set_nx("lock:config", "b", None).await.unwrap());
        assert_eq!(store.get("lock:config").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn set_nx_reclaims_expired_keys() {
        let store = test_store();
        assert!(store
            .set_nx("lock:config", "a", Some(Duration::from_millis(20)))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("lock:config").await.unwrap(), None);
        assert!(store.set_nx("lock:config", "b", None).await.unwrap());
        assert_eq!(store.get("lock:config").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn delete_if_eq_requires_matching_value() {
        let store = test_store();
        store.set_nx("lock:config", "owner", None).await.unwrap();

        assert!(!store.delete_if_eq("lock:config", "intruder").await.unwrap());
        assert!(store.exists("lock:config").await.unwrap());

        assert!(store.delete_if_eq("lock:config", "owner").await.unwrap());
        assert!(!store.exists("lock:config").await.unwrap());
        assert!(!store.delete_if_eq("lock:config", "owner").await.unwrap());
    }

    // ── Hashes ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn hash_fields_upsert() {
        let store = test_store();
        store.hset("status", "items:0", "one").await.unwrap();
        store.hset("status", "items:1", "two").await.unwrap();
        store.hset("status", "items:0", "three").await.unwrap();

        let all = store.hgetall("status").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["items:0"], "three");
        assert_eq!(store.hget("status", "items:1").await.unwrap().as_deref(), Some("two"));
        assert_eq!(store.hget("status", "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hash_expires_as_a_unit() {
        let store = test_store();
        store.hset("status", "a:0", "x").await.unwrap();
        assert!(store.expire("status", Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.hgetall("status").await.unwrap().is_empty());

        // A plain write after expiry starts a fresh table without TTL.
        store.hset("status", "b:0", "y").await.unwrap();
        assert_eq!(store.hgetall("status").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn existing_only_writes_never_recreate_expired_keys() {
        let store = test_store();
        store.hset("job:1", "status", "CREATED").await.unwrap();
        store.rpush("job:1:logs", &[String::new()]).await.unwrap();
        store.expire("job:1", Duration::from_millis(20)).await.unwrap();
        store.expire("job:1:logs", Duration::from_millis(20)).await.unwrap();

        assert!(store.hset_existing("job:1", &[("status", "RUNNING")]).await.unwrap());
        assert_eq!(
            store.rpush_existing("job:1:logs", &["line".to_string()]).await.unwrap(),
            Some(2)
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!store.hset_existing("job:1", &[("status", "DONE")]).await.unwrap());
        assert_eq!(
            store.rpush_existing("job:1:logs", &["late".to_string()]).await.unwrap(),
            None
        );
        assert!(!store.exists("job:1").await.unwrap());
        assert!(!store.exists("job:1:logs").await.unwrap());
    }

    #[tokio::test]
    async fn hdel_if_eq_only_removes_unchanged_fields() {
        let store = test_store();
        store.hset_many("status", &[("a:0", "garbage"), ("b:0", "ok")]).await.unwrap();

        assert!(!store.hdel_if_eq("status", "a:0", "rewritten").await.unwrap());
        assert!(store.hdel_if_eq("status", "a:0", "garbage").await.unwrap());
        assert_eq!(store.hgetall("status").await.unwrap().len(), 1);

        assert!(store.hdel_if_eq("status", "b:0", "ok").await.unwrap());
        assert!(!store.exists("status").await.unwrap());
    }

    #[tokio::test]
    async fn atomic_batch_applies_every_command() {
        let store = test_store();
        let replies = store
            .atomic(vec![
                hset_command("job:1", &[("status", "CREATED")], false),
                rpush_command("job:1:logs", &[String::new()], false),
                expire_command("job:1", Duration::from_secs(60)),
                expire_command("job:1:logs", Duration::from_secs(60)),
            ])
            .await
            .unwrap();
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[2], Reply::Flag(true));
        assert_eq!(store.lrange("job:1:logs").await.unwrap(), vec![""]);
    }

    // ── Lists ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn lists_keep_insertion_order() {
        let store = test_store();
        store.rpush("job:1:logs", &["a".to_string()]).await.unwrap();
        let len = store
            .rpush("job:1:logs", &["b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(len, 3);
        assert_eq!(store.lrange("job:1:logs").await.unwrap(), vec!["a", "b", "c"]);
        assert!(store.lrange("job:2:logs").await.unwrap().is_empty());
    }

    // ── Any kind ───────────────────────────────────────────────────

    #[tokio::test]
    async fn expire_and_delete_on_missing_keys() {
        let store = test_store();
        assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());
        assert!(!store.delete("missing").await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_every_kind() {
        let store = test_store();
        store.set_nx("k", "v", None).await.unwrap();
        store.hset("h", "f", "v").await.unwrap();
        store.rpush("l", &["v".to_string()]).await.unwrap();

        assert!(store.delete("k").await.unwrap());
        assert!(store.delete("h").await.unwrap());
        assert!(store.delete("l").await.unwrap());
        assert!(!store.exists("k").await.unwrap());
        assert!(!store.exists("h").await.unwrap());
        assert!(!store.exists("l").await.unwrap());
    }

    // ── Pub/sub ────────────────────────────────────────────────────

    #[tokio::test]
    async fn subscribers_only_see_their_channel() {
        let store = test_store();
        let mut config = store.subscribe("config").await.unwrap();

        store.publish("other", "ignored").await.unwrap();
        assert_eq!(store.publish("config", "abc123").await.unwrap(), 1);

        assert_eq!(config.recv().await.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let store = test_store();
        assert_eq!(store.publish("config", "abc123").await.unwrap(), 1);
        assert_eq!(store.publish("config", "def456").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn clones_share_the_channel() {
        let store = test_store();
        let mut sub = store.clone().subscribe("config").await.unwrap();
        store.publish("config", "h1").await.unwrap();
        assert_eq!(sub.recv().await.as_deref(), Some("h1"));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("shared.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.hset("status", "items:0", "x").await.unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.hget("status", "items:0").await.unwrap().as_deref(), Some("x"));
    }
}
