//! Cluster Store
//!
//! Object store abstraction used by the container runtime config controller.
//!
//! # Example
//!
//! ```no_run
//! use cluster_store::{ClusterStore, KubeClusterStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let (store, _writers) = KubeClusterStore::new(client);
//!
//! // Drive the cache writers with watch streams, then wait for the initial list
//! store.wait_for_cache_sync().await?;
//! let pools = store.list_machine_config_pools().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Cached reads**: intents, pools and cluster singletons from reflector stores
//! - **Conditional writes**: updates carry the caller's resource version
//! - **Merge patches**: three-way JSON merge patch construction
//! - **Mock**: in-memory store behind the `test-util` feature

pub mod error;
pub mod kube_store;
pub mod merge_patch;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use error::StoreError;
pub use kube_store::{CacheWriters, KubeClusterStore};
pub use merge_patch::create_three_way_merge_patch;
pub use store_trait::ClusterStore;
#[cfg(feature = "test-util")]
pub use mock::MockClusterStore;
