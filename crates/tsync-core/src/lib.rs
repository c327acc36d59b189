//! tsync Core Library
//!
//! This crate keeps a local directory tree in step with a remote "target"
//! that offers no version history: only file contents, existence and an
//! opaque per-file revision identifier.
//!
//! # Architecture
//!
//! - **Baselines**: for every synchronized file the local modification time
//!   and remote identifier observed at the last transfer are recorded in a
//!   [`Synchronizer`]. Comparing against them tells local edits from remote
//!   ones without a common ancestor.
//! - **Backends**: a [`RemoteBackend`] implementation per site type
//!   (`file://` built in, an in-process memory target for tests).
//! - **Providers**: a [`TargetProvider`] runs get, put, delete and the
//!   dirty/out-of-date queries over a bound root.
//!
//! # Quick Start
//!
//! ```text
//! let mut context = TargetContext::open(Config::load()?)?;
//! let provider = context.configure(
//!     Path::new("/home/me/site"),
//!     TargetConfiguration::for_site("file", "file:///srv/www"),
//! )?;
//!
//! // Make the local tree match the target
//! provider.get(&[root], Depth::Infinite, &Progress::new())?;
//! ```
//!
//! # Modules
//!
//! - `context`: Entry point binding roots and resolving providers
//! - `provider`: Batch operations and provider configuration
//! - `state`: Per-resource synchronization state and baselines
//! - `reconcile`: One-way tree reconciliation
//! - `classify`: Sync direction/kind classification
//! - `location`: Sites, bindings and backend factories
//! - `backend`: Remote target access
//! - `synchronizer`: Persistent per-resource records
//! - `config`: Application configuration

pub mod backend;
pub mod classify;
pub mod codec;
pub mod config;
pub mod context;
pub mod depth;
pub mod error;
pub mod location;
pub mod progress;
pub mod provider;
pub mod reconcile;
pub mod state;
pub mod synchronizer;
pub mod transfer;

pub use backend::{BackendError, FileSystemBackend, MemoryBackend, RemoteBackend, RemotePath};
pub use classify::{classify, Granularity, SyncKind, TargetSyncElement};
pub use config::Config;
pub use context::TargetContext;
pub use depth::Depth;
pub use error::{BatchError, ErrorKind, Severity, Status, TargetError, TargetResult};
pub use location::{LocationMapping, Site, SiteEvent, SiteRegistry};
pub use progress::{Progress, ProgressEvent};
pub use provider::{TargetConfiguration, TargetProvider};
pub use reconcile::ReconcileStats;
pub use state::{Baseline, ResourceState};
pub use synchronizer::{MemorySynchronizer, QualifiedKey, SqliteSynchronizer, Synchronizer};
