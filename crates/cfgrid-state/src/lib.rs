//! cfgrid-state: the shared store every cfgrid replica coordinates through.
//!
//! Backed by [redb](https://docs.rs/redb), the store offers Redis-shaped
//! primitives (TTL'd string keys, hash tables, lists, pub/sub) and the two
//! coordination records built directly on them:
//!
//! - [`DistributedLock`]: non-blocking, TTL'd, ownership-gated mutual exclusion
//! - [`JobTracker`]: ephemeral records of asynchronous operations
//!
//! # Architecture
//!
//! All values are JSON envelopes in redb's `&[u8]` value columns, carrying an
//! optional expiry. Composite keys (`lock:{resource}`, `job:{id}:logs`,
//! `{serviceTag}:{replicaId}` fields) keep the record kinds apart.
//!
//! One process owns the database and serves it over HTTP ([`server`]); the
//! others reach it through [`StateStore::connect`]. Each primitive is a
//! [`Command`] executed in one redb transaction on the owner, and pub/sub
//! messages are sequenced so remote subscribers can long-poll for them.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` and can be shared across
//! async tasks.

pub mod command;
pub mod error;
pub mod jobs;
mod local;
pub mod lock;
pub mod pubsub;
mod remote;
pub mod server;
pub mod store;
pub mod tables;
pub mod types;

pub use command::{Command, Reply};
pub use error::{StateError, StateResult};
pub use jobs::JobTracker;
pub use lock::{DistributedLock, LockHandle};
pub use pubsub::{ChannelHead, Message, PollReply, PollRequest};
pub use store::{
    StateStore, Subscription, epoch_millis, expire_command, hset_command, rpush_command,
};
pub use types::*;
