pub mod context;
pub mod error;
pub mod expectations;
pub mod filter;
pub mod reconciler;
pub mod replicas;
pub mod status;
pub mod sync;

pub use context::{CachingRemoteClientBuilder, Context, RemoteClientBuilder, RemoteConnection};
pub use error::{BackoffConfig, Error, Result, RetryTracker};
pub use expectations::ExpectationsStore;
pub use reconciler::{error_policy, reconcile, FINALIZER};
pub use status::{condition_status, UpdatePolicy};
pub use sync::SyncPlan;
