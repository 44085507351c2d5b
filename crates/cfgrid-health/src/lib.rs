//! cfgrid-health: the replica status blackboard.
//!
//! Every replica of every service publishes `{color, config hash}` into one
//! shared hash table. Readers reduce the table in two deliberately different
//! ways:
//!
//! ```text
//! StatusAggregator::aggregate(max_age) → ClusterView
//!   ├── convergence(own_service, target)  worst peer wins      (rollout wait loop)
//!   └── health_report()                   least severe wins,   (status endpoint)
//!                                         RED on hash mismatch
//! ```
//!
//! The [`StatusPublisher`] keeps this replica's own record fresh and runs
//! the daily table reset.

pub mod aggregator;
pub mod publisher;

pub use aggregator::{ClusterHealth, ClusterView, ServiceStatus, StatusAggregator};
pub use publisher::{LocalStatus, ResetSchedule, StatusPublisher};
