//! run-state — the collaborator stores behind the execution pipeline.
//!
//! The runtime and gateway only see the [`MetadataStore`], [`BlobStore`]
//! and [`LogStore`] traits. [`StateStore`] implements all three on top of
//! [redb](https://docs.rs/redb), plus persistence for metrics snapshots.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{endpoint_id}:{deployment_id}`,
//! `{deployment_id}:{request_id}`) enable prefix scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod traits;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use traits::{BlobStore, LogStore, MetadataStore};
pub use types::MetricsSnapshot;
