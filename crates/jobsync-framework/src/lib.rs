//! Framework reconciliation engine
//!
//! Keeps the cluster's `Framework` objects in line with the job database:
//! - `Snapshot` projects a Framework into request/status halves and flat
//!   database records
//! - `AddOns` manages the secrets and priority class a Framework needs
//! - `Reconciler` upserts Frameworks, tolerating not-found/conflict races
//! - `state` translates controller states into user-facing job states

#![deny(missing_docs)]

pub mod addons;
pub mod client;
pub mod codec;
pub mod crd;
pub mod job_config;
pub mod naming;
pub mod reconciler;
pub mod snapshot;
pub mod state;

#[cfg(test)]
mod testing;

pub use addons::{AddOnUpdate, AddOns};
pub use client::{ClusterClient, ClusterConfig, KubeClusterClient};
pub use crd::{FrameworkDocument, FrameworkRequest};
pub use naming::{HashedNameEncoder, NameEncoder, PlainNameEncoder};
pub use reconciler::Reconciler;
pub use snapshot::Snapshot;
pub use state::{translate, translate_raw, FrameworkState, JobState};
