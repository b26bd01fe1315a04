/*!
 * Cheyenne - object vaulting pipeline
 *
 * Copies every newly written object into a vault bucket with provenance tags:
 * - Router: classifies change notifications by size, assigns correlation ids,
 *   dispatches per tier to ordered queues and rotates the ordering group
 * - Duplication Worker: server-side copies into the vault, tags the origin,
 *   and reconciles partially failed batches with the source queue
 * - AWS collaborators behind the `aws` feature, in-memory ones for tests and dry runs
 */

pub mod config;
pub mod duplicator;
pub mod error;
pub mod event;
pub mod logging;
pub mod router;
pub mod shard;
pub mod tags;
pub mod tier;

#[cfg(feature = "aws")]
pub mod aws;

// Re-export commonly used types
pub use config::VaultConfig;
pub use duplicator::{DuplicationOutcome, DuplicationReport, DuplicationWorker};
pub use error::{Result, VaultError};
pub use event::{ChangeNotification, CorrelationId, PlatformBatch, VaultEventRecord};
pub use router::{RouteOutcome, RouteReport, Router, RouterTargets};
pub use shard::ShardSlot;
pub use tier::{DispatchTier, SizeTier};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
