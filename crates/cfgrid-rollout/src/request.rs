//! Rollout requests and their validation.

use bytes::Bytes;

use crate::error::{RolloutError, RolloutResult};

/// A rollout request as received from a caller.
///
/// Exactly one source must be given: a reference name, or a canned bundle
/// together with the hash that identifies it. Empty values count as absent.
#[derive(Debug, Clone, Default)]
pub struct RolloutRequest {
    pub ref_name: Option<String>,
    pub canned_bundle: Option<Bytes>,
    pub bundle_hash: Option<String>,
}

/// A validated rollout source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutSource {
    /// Branch, tag or hash of the configuration repository.
    Reference(String),
    /// Tar archive whose identity is the caller-supplied hash.
    Bundle { archive: Bytes, hash: String },
}

impl RolloutRequest {
    pub fn reference(name: impl Into<String>) -> Self {
        Self {
            ref_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn bundle(archive: impl Into<Bytes>, hash: impl Into<String>) -> Self {
        Self {
            ref_name: None,
            canned_bundle: Some(archive.into()),
            bundle_hash: Some(hash.into()),
        }
    }

    /// Check that exactly one source is present.
    pub fn validate(self) -> RolloutResult<RolloutSource> {
        let ref_name = self.ref_name.filter(|name| !name.trim().is_empty());
        let archive = self.canned_bundle.filter(|archive| !archive.is_empty());
        let hash = self.bundle_hash.filter(|hash| !hash.trim().is_empty());

        match (ref_name, archive, hash) {
            (Some(name), None, None) => Ok(RolloutSource::Reference(name)),
            (None, Some(archive), Some(hash)) => Ok(RolloutSource::Bundle { archive, hash }),
            (None, None, None) => Err(invalid("one of refName or cannedBundle is required")),
            (None, Some(_), None) => Err(invalid("cannedBundle requires bundleHash")),
            (None, None, Some(_)) => Err(invalid("bundleHash requires cannedBundle")),
            (Some(_), _, _) => Err(invalid("refName cannot be combined with a canned bundle")),
        }
    }
}

impl RolloutSource {
    /// Human-readable job title.
    pub fn title(&self) -> String {
        match self {
            RolloutSource::Reference(name) => format!("update configuration to '{name}'"),
            RolloutSource::Bundle { hash, .. } => format!("update configuration from bundle {hash}"),
        }
    }
}

fn invalid(message: &str) -> RolloutError {
    RolloutError::InvalidArgument(message.to_string())
}
