//! cfgrid-snapshot: the configuration a replica is serving.
//!
//! A [`ConfigSnapshot`] is an immutable tree of files identified by a hash.
//! The [`ConfigStore`] owns the current snapshot behind a read/write lock:
//! file reads and listings share the read side, and a rollout holds the
//! write side only while it fetches and swaps in the next snapshot.
//!
//! New snapshots come from a [`VersionSource`] (a checked-out reference of a
//! version-controlled repository, see [`GitSource`]) or from a canned tar
//! bundle via [`bundle::unpack`].

pub mod bundle;
pub mod error;
pub mod git;
pub mod mime;
pub mod snapshot;
pub mod source;
pub mod store;

pub use error::{SnapshotError, SnapshotResult, SourceError, SourceResult};
pub use git::GitSource;
pub use snapshot::ConfigSnapshot;
pub use source::{Checkout, NoRepository, SourceFuture, VersionSource, checkout_snapshot};
pub use store::{ConfigFile, ConfigStore, SnapshotUpdate};
