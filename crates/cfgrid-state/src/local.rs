//! The owning side of the shared store: commands executed against redb.
//!
//! Read-only commands run in a read transaction. Everything else, including
//! every command of an [`Command::Atomic`] batch, runs in one write
//! transaction, so check-then-write sequences (`setNx`, `deleteIfEq`,
//! `existingOnly` writes) are atomic with respect to every other writer.
//! Expired entries read as absent and are overwritten by the next write of
//! the same key.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{Command, Reply};
use crate::error::{StateError, StateResult};
use crate::pubsub::Channels;
use crate::store::epoch_millis;
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Hash = BTreeMap<String, String>;
type List = Vec<String>;
type WriteTable<'txn> = redb::Table<'txn, &'static str, &'static [u8]>;

/// Stored value with its optional expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope<T> {
    value: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at_ms: Option<u64>,
}

impl<T> Envelope<T> {
    fn persistent(value: T) -> Self {
        Self {
            value,
            expires_at_ms: None,
        }
    }

    fn is_live(&self, now: u64) -> bool {
        self.expires_at_ms.is_none_or(|at| at > now)
    }
}

/// redb database plus the pub/sub channels of the owning process.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Database>,
    pub(crate) channels: Arc<Channels>,
}

impl LocalStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> StateResult<Self> {
        let store = Self {
            db: Arc::new(db),
            channels: Arc::new(Channels::new()),
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(KEYS).map_err(map_err!(Table))?;
        txn.open_table(HASHES).map_err(map_err!(Table))?;
        txn.open_table(LISTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn execute(&self, command: Command) -> StateResult<Reply> {
        match command {
            Command::Publish { channel, payload } => {
                Ok(Reply::Sequence(self.channels.publish(&channel, &payload)))
            }
            Command::Head { channel } => Ok(Reply::Head(self.channels.head(&channel))),
            command if command.is_read_only() => self.read(command),
            command => self.write(command),
        }
    }

    fn read(&self, command: Command) -> StateResult<Reply> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let keys = txn.open_table(KEYS).map_err(map_err!(Table))?;
        let hashes = txn.open_table(HASHES).map_err(map_err!(Table))?;
        let lists = txn.open_table(LISTS).map_err(map_err!(Table))?;
        let view = View {
            keys: &keys,
            hashes: &hashes,
            lists: &lists,
        };
        view.query(command, epoch_millis())
    }

    fn write(&self, command: Command) -> StateResult<Reply> {
        let name = command.name();
        let now = epoch_millis();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let reply = {
            let mut tables = Tables {
                keys: txn.open_table(KEYS).map_err(map_err!(Table))?,
                hashes: txn.open_table(HASHES).map_err(map_err!(Table))?,
                lists: txn.open_table(LISTS).map_err(map_err!(Table))?,
            };
            tables.apply(command, now)?
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(command = name, ?reply, "store write");
        Ok(reply)
    }
}

// ── Reads ─────────────────────────────────────────────────────────

/// The three tables as seen by read-only commands.
struct View<'a, T> {
    keys: &'a T,
    hashes: &'a T,
    lists: &'a T,
}

impl<T: ReadableTable<&'static str, &'static [u8]>> View<'_, T> {
    fn query(&self, command: Command, now: u64) -> StateResult<Reply> {
        match command {
            Command::Get { key } => Ok(Reply::Value(
                load_live::<String>(self.keys, &key, now)?.map(|e| e.value),
            )),
            Command::HGet { key, field } => Ok(Reply::Value(
                load_live::<Hash>(self.hashes, &key, now)?.and_then(|mut e| e.value.remove(&field)),
            )),
            Command::HGetAll { key } => Ok(Reply::Fields(
                load_live::<Hash>(self.hashes, &key, now)?
                    .map(|e| e.value)
                    .unwrap_or_default(),
            )),
            Command::LRange { key } => Ok(Reply::Values(
                load_live::<List>(self.lists, &key, now)?
                    .map(|e| e.value)
                    .unwrap_or_default(),
            )),
            Command::Exists { key } => Ok(Reply::Flag(
                load_live::<serde_json::Value>(self.keys, &key, now)?.is_some()
                    || load_live::<serde_json::Value>(self.hashes, &key, now)?.is_some()
                    || load_live::<serde_json::Value>(self.lists, &key, now)?.is_some(),
            )),
            other => Err(StateError::Read(format!(
                "{} is not a read-only command",
                other.name()
            ))),
        }
    }
}

// ── Writes ────────────────────────────────────────────────────────

/// The three tables opened inside one write transaction.
struct Tables<'txn> {
    keys: WriteTable<'txn>,
    hashes: WriteTable<'txn>,
    lists: WriteTable<'txn>,
}

impl Tables<'_> {
    fn apply(&mut self, command: Command, now: u64) -> StateResult<Reply> {
        match command {
            Command::SetNx { key, value, ttl_ms } => {
                let set = load_live::<String>(&self.keys, &key, now)?.is_none();
                if set {
                    let envelope = Envelope {
                        value,
                        expires_at_ms: ttl_ms.map(|ttl| now + ttl),
                    };
                    put(&mut self.keys, &key, &envelope)?;
                }
                Ok(Reply::Flag(set))
            }
            Command::DeleteIfEq { key, expected } => {
                let matches = load_live::<String>(&self.keys, &key, now)?
                    .is_some_and(|envelope| envelope.value == expected);
                if matches {
                    self.keys.remove(key.as_str()).map_err(map_err!(Write))?;
                }
                Ok(Reply::Flag(matches))
            }
            Command::HSet {
                key,
                fields,
                existing_only,
            } => {
                let mut envelope = match load_live::<Hash>(&self.hashes, &key, now)? {
                    Some(envelope) => envelope,
                    None if existing_only => return Ok(Reply::Flag(false)),
                    None => Envelope::persistent(Hash::new()),
                };
                envelope.value.extend(fields);
                put(&mut self.hashes, &key, &envelope)?;
                Ok(Reply::Flag(true))
            }
            Command::HDelIfEq {
                key,
                field,
                expected,
            } => {
                let Some(mut envelope) = load_live::<Hash>(&self.hashes, &key, now)? else {
                    return Ok(Reply::Flag(false));
                };
                if envelope.value.get(&field) != Some(&expected) {
                    return Ok(Reply::Flag(false));
                }
                envelope.value.remove(&field);
                if envelope.value.is_empty() {
                    self.hashes.remove(key.as_str()).map_err(map_err!(Write))?;
                } else {
                    put(&mut self.hashes, &key, &envelope)?;
                }
                Ok(Reply::Flag(true))
            }
            Command::RPush {
                key,
                values,
                existing_only,
            } => {
                let mut envelope = match load_live::<List>(&self.lists, &key, now)? {
                    Some(envelope) => envelope,
                    None if existing_only => return Ok(Reply::Length(None)),
                    None => Envelope::persistent(List::new()),
                };
                envelope.value.extend(values);
                let len = envelope.value.len() as u64;
                put(&mut self.lists, &key, &envelope)?;
                Ok(Reply::Length(Some(len)))
            }
            Command::Expire { key, ttl_ms } => {
                let expires_at_ms = Some(now + ttl_ms);
                let found = retime::<String>(&mut self.keys, &key, now, expires_at_ms)?
                    | retime::<Hash>(&mut self.hashes, &key, now, expires_at_ms)?
                    | retime::<List>(&mut self.lists, &key, now, expires_at_ms)?;
                Ok(Reply::Flag(found))
            }
            Command::Delete { key } => {
                let mut existed = false;
                for table in [&mut self.keys, &mut self.hashes, &mut self.lists] {
                    if let Some(guard) = table.remove(key.as_str()).map_err(map_err!(Write))? {
                        let envelope: Envelope<serde_json::Value> =
                            serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                        existed |= envelope.is_live(now);
                    }
                }
                Ok(Reply::Flag(existed))
            }
            Command::Atomic { commands } => {
                let replies = commands
                    .into_iter()
                    .map(|command| self.apply(command, now))
                    .collect::<StateResult<Vec<_>>>()?;
                Ok(Reply::Many(replies))
            }
            Command::Publish { .. } | Command::Head { .. } => Err(StateError::Write(
                "pub/sub commands cannot run inside a transaction".to_string(),
            )),
            read => View {
                keys: &self.keys,
                hashes: &self.hashes,
                lists: &self.lists,
            }
            .query(read, now),
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────

/// Load a key and drop it from view if it has expired.
fn load_live<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
    now: u64,
) -> StateResult<Option<Envelope<T>>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let envelope: Envelope<T> =
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(envelope.is_live(now).then_some(envelope))
        }
        None => Ok(None),
    }
}

fn put<T: Serialize>(table: &mut WriteTable<'_>, key: &str, envelope: &Envelope<T>) -> StateResult<()> {
    let value = serde_json::to_vec(envelope).map_err(map_err!(Serialize))?;
    table
        .insert(key, value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

/// Replace the expiry of a live key in one table. Returns true if found.
fn retime<T: Serialize + DeserializeOwned>(
    table: &mut WriteTable<'_>,
    key: &str,
    now: u64,
    expires_at_ms: Option<u64>,
) -> StateResult<bool> {
    match load_live::<T>(&*table, key, now)? {
        Some(mut envelope) => {
            envelope.expires_at_ms = expires_at_ms;
            put(table, key, &envelope)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
