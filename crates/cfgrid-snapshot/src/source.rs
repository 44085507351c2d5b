//! Version sources: where reference-based snapshots come from.
//!
//! The trait returns boxed futures so that sources can be shared as
//! `Arc<dyn VersionSource>` between the rollout coordinator and the
//! broadcast follower, and replaced by in-memory fakes in tests.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info};

use crate::error::{SourceError, SourceResult};
use crate::snapshot::ConfigSnapshot;

/// Boxed future alias for version source operations.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = SourceResult<T>> + Send + 'a>>;

/// Outcome of a fetch-and-checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkout {
    /// The working tree moved to this hash.
    Updated(String),
    /// The working tree was already at this hash. Not an error.
    UpToDate(String),
}

impl Checkout {
    pub fn hash(&self) -> &str {
        match self {
            Checkout::Updated(hash) | Checkout::UpToDate(hash) => hash,
        }
    }
}

/// A version-controlled repository holding the configuration.
///
/// At most one clone is kept; [`VersionSource::discard_clone`] drops it so
/// the next reference-based rollout clones afresh.
pub trait VersionSource: Send + Sync {
    /// Clone the repository if no clone exists.
    fn ensure_cloned(&self) -> SourceFuture<'_, ()>;

    /// Fetch from the remote and check out `reference` (branch, tag or hash).
    fn fetch_and_checkout<'a>(&'a self, reference: &'a str) -> SourceFuture<'a, Checkout>;

    /// Read the checked-out working tree as a snapshot identified by `hash`.
    fn load_snapshot<'a>(&'a self, hash: &'a str) -> SourceFuture<'a, ConfigSnapshot>;

    /// Remove the clone, if any.
    fn discard_clone(&self) -> SourceFuture<'_, ()>;
}

/// Clone if needed, check out `reference` and read the resulting tree.
pub async fn checkout_snapshot(
    source: &dyn VersionSource,
    reference: &str,
) -> SourceResult<ConfigSnapshot> {
    source.ensure_cloned().await?;
    let checkout = source.fetch_and_checkout(reference).await?;
    match &checkout {
        Checkout::Updated(hash) => info!(%reference, %hash, "checked out reference"),
        Checkout::UpToDate(hash) => debug!(%reference, %hash, "already up to date"),
    }
    source.load_snapshot(checkout.hash()).await
}

/// Source used when no repository is configured: every reference-based
/// operation fails, and only canned bundles can be rolled out.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRepository;

impl VersionSource for NoRepository {
    fn ensure_cloned(&self) -> SourceFuture<'_, ()> {
        Box::pin(async { Err(SourceError::NotConfigured) })
    }

    fn fetch_and_checkout<'a>(&'a self, _reference: &'a str) -> SourceFuture<'a, Checkout> {
        Box::pin(async { Err(SourceError::NotConfigured) })
    }

    fn load_snapshot<'a>(&'a self, _hash: &'a str) -> SourceFuture<'a, ConfigSnapshot> {
        Box::pin(async { Err(SourceError::NotConfigured) })
    }

    fn discard_clone(&self) -> SourceFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
