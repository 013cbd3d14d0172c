//! Incremental, dependency-tracked metadata computation.
//!
//! Providers derive metadata items from entity declarations and from each
//! other. The engine records every read a provider makes, caches the result
//! and, on each change, recomputes only the items whose inputs actually
//! changed. The merge step weaves the fragments of an entity's items into
//! its final member set.
//!
//! # Modules
//!
//! - [`provider`]: the provider contract and the dependency-reading context
//! - [`registry`]: installed providers and marker dispatch
//! - [`store`]: the item cache and its concurrent reader
//! - [`engine`]: recomputation passes
//! - [`merge`]: governor views and fragment collisions
//! - [`hash`]: blake3 output fingerprints
//! - [`config`]: EngineConfig
//! - [`error`]: EngineError, ProviderError

pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod merge;
pub mod provider;
pub mod registry;
pub mod store;

pub use config::EngineConfig;
pub use engine::{ComputeFailure, Engine, PassReport};
pub use error::{EngineError, ProviderError};
pub use hash::{item_fingerprint, Fingerprint};
pub use merge::{FragmentCollision, GovernorView};
pub use provider::{ComputeContext, Computed, Lookup, MetadataProvider};
pub use registry::{ProviderRegistry, Registration};
pub use store::{ItemReader, ItemStore};
