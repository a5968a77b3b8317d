//! Cluster-resource client
//!
//! [`ClusterClient`] is the seam between reconciliation logic and the API
//! server. Implementations must surface the API server's status code
//! unchanged: a 404 on get/patch and a 409 on create drive the reconciler's
//! upsert, see [`jobsync_common::Error::is_not_found`] and
//! [`jobsync_common::Error::is_conflict`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams, PostParams,
};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use jobsync_common::{
    Error, Result, DEFAULT_NAMESPACE, FRAMEWORK_API_VERSION, FRAMEWORK_KIND, FRAMEWORK_PLURAL,
};

use crate::crd::{FrameworkDocument, FrameworkRequest};

/// Trait abstracting the cluster operations the reconciler needs
///
/// This trait allows mocking the API server in tests while using the real
/// client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Get a Framework by name
    async fn get_framework(&self, name: &str) -> Result<FrameworkDocument>;

    /// Create a Framework from a request projection
    ///
    /// Fails with a 409 if it already exists.
    async fn create_framework(&self, request: &FrameworkRequest) -> Result<FrameworkDocument>;

    /// JSON merge-patch an existing Framework with a request projection
    ///
    /// Fails with a 404 if it doesn't exist.
    async fn patch_framework(
        &self,
        name: &str,
        request: &FrameworkRequest,
    ) -> Result<FrameworkDocument>;

    /// Delete a Framework by name
    async fn delete_framework(&self, name: &str) -> Result<()>;

    /// Create a Secret
    async fn create_secret(&self, secret: &Secret) -> Result<()>;

    /// Point a Secret's owner reference at its Framework
    async fn patch_secret_owner(&self, name: &str, owner: &OwnerReference) -> Result<()>;

    /// Delete a Secret by name
    async fn delete_secret(&self, name: &str) -> Result<()>;

    /// Create a cluster-scoped PriorityClass
    async fn create_priority_class(&self, priority_class: &PriorityClass) -> Result<()>;

    /// Delete a PriorityClass by name
    async fn delete_priority_class(&self, name: &str) -> Result<()>;
}

/// Where Frameworks and their secrets live
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Namespace for Frameworks and Secrets
    pub namespace: String,
    /// Framework API group/version
    pub api_version: String,
    /// Framework plural resource name
    pub plural: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            api_version: FRAMEWORK_API_VERSION.to_string(),
            plural: FRAMEWORK_PLURAL.to_string(),
        }
    }
}

impl ClusterConfig {
    /// API resource description for the Framework kind
    pub fn framework_resource(&self) -> ApiResource {
        let (group, version) = self
            .api_version
            .split_once('/')
            .unwrap_or(("", self.api_version.as_str()));
        let gvk = GroupVersionKind::gvk(group, version, FRAMEWORK_KIND);
        ApiResource::from_gvk_with_plural(&gvk, &self.plural)
    }
}

/// Real cluster client implementation
pub struct KubeClusterClient {
    client: Client,
    namespace: String,
    framework_resource: ApiResource,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given kube Client
    pub fn new(client: Client, config: &ClusterConfig) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            framework_resource: config.framework_resource(),
        }
    }

    fn frameworks(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &self.framework_resource)
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn priority_classes(&self) -> Api<PriorityClass> {
        Api::all(self.client.clone())
    }
}

fn to_document(object: DynamicObject) -> Result<FrameworkDocument> {
    let value = serde_json::to_value(object)?;
    serde_json::from_value(value)
        .map_err(|e| Error::serialization_for_kind(FRAMEWORK_KIND, e.to_string()))
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_framework(&self, name: &str) -> Result<FrameworkDocument> {
        let object = self.frameworks().get(name).await?;
        to_document(object)
    }

    async fn create_framework(&self, request: &FrameworkRequest) -> Result<FrameworkDocument> {
        let object: DynamicObject = serde_json::from_value(serde_json::to_value(request)?)?;
        let created = self
            .frameworks()
            .create(&PostParams::default(), &object)
            .await?;
        debug!(framework = ?request.metadata.name, "created framework");
        to_document(created)
    }

    async fn patch_framework(
        &self,
        name: &str,
        request: &FrameworkRequest,
    ) -> Result<FrameworkDocument> {
        let patched = self
            .frameworks()
            .patch(name, &PatchParams::default(), &Patch::Merge(request))
            .await?;
        debug!(framework = %name, "patched framework");
        to_document(patched)
    }

    async fn delete_framework(&self, name: &str) -> Result<()> {
        self.frameworks()
            .delete(name, &DeleteParams::default())
            .await?;
        debug!(framework = %name, "deleted framework");
        Ok(())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        self.secrets().create(&PostParams::default(), secret).await?;
        Ok(())
    }

    async fn patch_secret_owner(&self, name: &str, owner: &OwnerReference) -> Result<()> {
        let patch = serde_json::json!({
            "metadata": {
                "ownerReferences": [owner]
            }
        });
        self.secrets()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        self.secrets().delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn create_priority_class(&self, priority_class: &PriorityClass) -> Result<()> {
        self.priority_classes()
            .create(&PostParams::default(), priority_class)
            .await?;
        Ok(())
    }

    async fn delete_priority_class(&self, name: &str) -> Result<()> {
        self.priority_classes()
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}
