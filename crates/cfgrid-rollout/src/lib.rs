//! cfgrid-rollout: configuration rollouts and cluster convergence.
//!
//! One replica receives an update request and becomes the initiator for
//! that rollout by winning the configuration lock. Every other replica
//! learns about the new hash from the broadcast and follows it.
//!
//! # Components
//!
//! - **`request`**: request validation (exactly one source)
//! - **`coordinator`**: initiator state machine: lock, job, fetch, broadcast, wait
//! - **`follower`**: peer-side handler of the broadcast
//! - **`phase`**: rollout phases and tunables

pub mod coordinator;
pub mod error;
pub mod follower;
pub mod phase;
pub mod request;

pub use coordinator::{RolloutCoordinator, RolloutTask};
pub use error::{RolloutError, RolloutResult};
pub use follower::{ConfigFollower, FollowOutcome};
pub use phase::{RolloutPhase, RolloutSettings};
pub use request::{RolloutRequest, RolloutSource};
