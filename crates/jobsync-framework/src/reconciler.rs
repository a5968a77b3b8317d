//! Framework reconciliation
//!
//! Pushes a snapshot's request half to the cluster. The upsert in
//! [`Reconciler::synchronize_request`] is safe to run repeatedly and from
//! several callers at once: a missing Framework falls back to create, and the
//! API server's atomic create rejects every duplicate with a 409.
//!
//! The reconciler never retries. Callers decide when to try again.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use jobsync_common::Result;

use crate::addons::AddOns;
use crate::client::ClusterClient;
use crate::crd::FrameworkDocument;
use crate::snapshot::Snapshot;

/// Reconciles framework snapshots against the cluster
#[derive(Clone)]
pub struct Reconciler {
    client: Arc<dyn ClusterClient>,
}

impl Reconciler {
    /// Create a reconciler on top of a cluster client
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Merge-patch the existing Framework with the snapshot's request
    ///
    /// A 404 is returned to the caller like any other error.
    #[instrument(skip_all, fields(framework = %snapshot.get_name()))]
    pub async fn synchronize_modify(&self, snapshot: &Snapshot) -> Result<FrameworkDocument> {
        let live = self
            .client
            .patch_framework(snapshot.get_name(), &snapshot.get_request(false))
            .await?;
        debug!("framework request synchronized");
        Ok(live)
    }

    /// Create the add-ons, then the Framework
    ///
    /// Once the Framework exists its secrets are re-parented onto it in the
    /// background. If the Framework already exists (409) the error is
    /// returned and the add-ons are left in place, since they belong to that
    /// existing Framework.
    #[instrument(skip_all, fields(framework = %snapshot.get_name()))]
    pub async fn synchronize_create(
        &self,
        snapshot: &Snapshot,
        add_ons: &AddOns,
    ) -> Result<FrameworkDocument> {
        add_ons.create(self.client.as_ref()).await?;

        match self.client.create_framework(&snapshot.get_request(false)).await {
            Ok(live) => {
                info!("framework created");
                add_ons.silent_patch(self.client.clone(), &live);
                Ok(live)
            }
            Err(e) if e.is_conflict() => {
                warn!(error = %e, "framework already exists");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Idempotent upsert: modify, falling back to create when not found
    pub async fn synchronize_request(
        &self,
        snapshot: &Snapshot,
        add_ons: &AddOns,
    ) -> Result<FrameworkDocument> {
        match self.synchronize_modify(snapshot).await {
            Err(e) if e.is_not_found() => {
                debug!(framework = %snapshot.get_name(), "framework not found, creating");
                self.synchronize_create(snapshot, add_ons).await
            }
            result => result,
        }
    }

    /// [`Reconciler::synchronize_request`] on a detached task
    ///
    /// Errors are logged and dropped; there is no handle to wait on.
    pub fn silent_synchronize_request(&self, snapshot: Snapshot, add_ons: AddOns) {
        let reconciler = self.clone();
        tokio::spawn(async move {
            if let Err(e) = reconciler.synchronize_request(&snapshot, &add_ons).await {
                warn!(framework = %snapshot.get_name(), error = %e, "error ignored");
            }
        });
    }

    /// Delete a Framework on a detached task
    ///
    /// Errors (including 404) are logged and dropped.
    pub fn silent_delete_framework(&self, name: impl Into<String>) {
        let name = name.into();
        let client = self.client.clone();
        tokio::spawn(async move {
            match client.delete_framework(&name).await {
                Ok(()) => info!(framework = %name, "framework deleted"),
                Err(e) => warn!(framework = %name, error = %e, "error ignored"),
            }
        });
    }

    /// Read the live Framework, `None` if it doesn't exist
    pub async fn fetch(&self, name: &str) -> Result<Option<Snapshot>> {
        match self.client.get_framework(name).await {
            Ok(doc) => Snapshot::new(doc).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
