//! Auxiliary resources coupled to a Framework
//!
//! Secrets and the priority class must exist before the Framework that
//! references them is created. Once the Framework exists, the secrets are
//! re-parented onto it so the cluster garbage-collects them together; that
//! step and cleanup are best-effort and run detached.

pub mod descriptors;

use std::future::Future;
use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture, FutureExt};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use jobsync_common::{Error, Result, FRAMEWORK_KIND};

use crate::client::ClusterClient;
use crate::crd::FrameworkDocument;

/// Serialized add-on descriptors, as stored next to the job request
///
/// Each present field is the JSON form of one descriptor.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddOnUpdate {
    /// Job configuration secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_secret_def: Option<String>,
    /// User-extension secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_extension_secret_def: Option<String>,
    /// Priority class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_def: Option<String>,
    /// Registry-credential secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_secret_def: Option<String>,
    /// Token secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret_def: Option<String>,
}

/// Up to five auxiliary objects belonging to one Framework
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AddOns {
    config_secret: Option<Secret>,
    user_extension_secret: Option<Secret>,
    priority_class: Option<PriorityClass>,
    docker_secret: Option<Secret>,
    token_secret: Option<Secret>,
}

impl AddOns {
    /// Build from already-deserialized descriptors
    pub fn new(
        config_secret: Option<Secret>,
        user_extension_secret: Option<Secret>,
        priority_class: Option<PriorityClass>,
        docker_secret: Option<Secret>,
        token_secret: Option<Secret>,
    ) -> Self {
        Self {
            config_secret,
            user_extension_secret,
            priority_class,
            docker_secret,
            token_secret,
        }
    }

    /// Build from serialized (JSON) descriptors
    pub fn from_serialized(
        config_secret: Option<&str>,
        user_extension_secret: Option<&str>,
        priority_class: Option<&str>,
        docker_secret: Option<&str>,
        token_secret: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            config_secret: parse_def("Secret", config_secret)?,
            user_extension_secret: parse_def("Secret", user_extension_secret)?,
            priority_class: parse_def("PriorityClass", priority_class)?,
            docker_secret: parse_def("Secret", docker_secret)?,
            token_secret: parse_def("Secret", token_secret)?,
        })
    }

    /// Rebuild from a persisted record, see [`AddOns::get_update`]
    pub fn from_update(update: &AddOnUpdate) -> Result<Self> {
        Self::from_serialized(
            update.config_secret_def.as_deref(),
            update.user_extension_secret_def.as_deref(),
            update.priority_class_def.as_deref(),
            update.docker_secret_def.as_deref(),
            update.token_secret_def.as_deref(),
        )
    }

    /// Set the job configuration secret
    pub fn with_config_secret(mut self, secret: Secret) -> Self {
        self.config_secret = Some(secret);
        self
    }

    /// Set the user-extension secret
    pub fn with_user_extension_secret(mut self, secret: Secret) -> Self {
        self.user_extension_secret = Some(secret);
        self
    }

    /// Set the priority class
    pub fn with_priority_class(mut self, priority_class: PriorityClass) -> Self {
        self.priority_class = Some(priority_class);
        self
    }

    /// Set the registry-credential secret
    pub fn with_docker_secret(mut self, secret: Secret) -> Self {
        self.docker_secret = Some(secret);
        self
    }

    /// Set the token secret
    pub fn with_token_secret(mut self, secret: Secret) -> Self {
        self.token_secret = Some(secret);
        self
    }

    /// No descriptors at all
    pub fn is_empty(&self) -> bool {
        self.secrets().next().is_none() && self.priority_class.is_none()
    }

    fn secrets(&self) -> impl Iterator<Item = &Secret> {
        [
            &self.config_secret,
            &self.user_extension_secret,
            &self.docker_secret,
            &self.token_secret,
        ]
        .into_iter()
        .flatten()
    }

    /// Create every present descriptor
    ///
    /// An object that already exists counts as created. Any other failure
    /// aborts the call.
    pub async fn create(&self, client: &dyn ClusterClient) -> Result<()> {
        let mut creates: Vec<BoxFuture<'_, Result<()>>> = self
            .secrets()
            .map(|secret| {
                let name = object_name(&secret.metadata.name);
                tolerate_conflict("Secret", name, client.create_secret(secret)).boxed()
            })
            .collect();

        if let Some(pc) = &self.priority_class {
            let name = object_name(&pc.metadata.name);
            creates.push(
                tolerate_conflict("PriorityClass", name, client.create_priority_class(pc)).boxed(),
            );
        }

        try_join_all(creates).await?;
        Ok(())
    }

    /// Re-parent every secret onto the live Framework, detached
    ///
    /// Failures are logged and dropped. The priority class is cluster-scoped
    /// and cannot be owned by a namespaced Framework, so it is left alone.
    pub fn silent_patch(&self, client: Arc<dyn ClusterClient>, live: &FrameworkDocument) {
        let Some(owner) = owner_reference(live) else {
            warn!(
                framework = ?live.metadata.name,
                "live framework has no uid, skipping add-on owner patch"
            );
            return;
        };

        for secret in self.secrets() {
            let name = object_name(&secret.metadata.name).to_string();
            let client = client.clone();
            let owner = owner.clone();
            tokio::spawn(async move {
                match client.patch_secret_owner(&name, &owner).await {
                    Ok(()) => debug!(secret = %name, framework = %owner.name, "patched secret owner"),
                    Err(e) => warn!(secret = %name, error = %e, "error ignored"),
                }
            });
        }
    }

    /// Delete every present descriptor, detached
    ///
    /// Failures are logged and dropped.
    pub fn silent_delete(&self, client: Arc<dyn ClusterClient>) {
        for secret in self.secrets() {
            let name = object_name(&secret.metadata.name).to_string();
            let client = client.clone();
            tokio::spawn(async move {
                if let Err(e) = client.delete_secret(&name).await {
                    warn!(secret = %name, error = %e, "error ignored");
                }
            });
        }

        if let Some(pc) = &self.priority_class {
            let name = object_name(&pc.metadata.name).to_string();
            tokio::spawn(async move {
                if let Err(e) = client.delete_priority_class(&name).await {
                    warn!(priority_class = %name, error = %e, "error ignored");
                }
            });
        }
    }

    /// Serialize the present descriptors for persistence
    pub fn get_update(&self) -> Result<AddOnUpdate> {
        Ok(AddOnUpdate {
            config_secret_def: to_def(&self.config_secret)?,
            user_extension_secret_def: to_def(&self.user_extension_secret)?,
            priority_class_def: to_def(&self.priority_class)?,
            docker_secret_def: to_def(&self.docker_secret)?,
            token_secret_def: to_def(&self.token_secret)?,
        })
    }
}

/// Owner reference pointing at a live Framework
///
/// `None` until the API server has assigned the Framework a uid.
pub fn owner_reference(live: &FrameworkDocument) -> Option<OwnerReference> {
    Some(OwnerReference {
        api_version: live.api_version.clone(),
        kind: FRAMEWORK_KIND.to_string(),
        name: live.metadata.name.clone()?,
        uid: live.metadata.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

async fn tolerate_conflict(
    kind: &str,
    name: &str,
    create: impl Future<Output = Result<()>>,
) -> Result<()> {
    match create.await {
        Ok(()) => {
            debug!(kind = %kind, name = %name, "created add-on");
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            warn!(kind = %kind, name = %name, "add-on already exists");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn object_name(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or_default()
}

fn parse_def<T: DeserializeOwned>(kind: &str, raw: Option<&str>) -> Result<Option<T>> {
    raw.map(|raw| {
        serde_json::from_str(raw).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
    })
    .transpose()
}

fn to_def<T: Serialize>(def: &Option<T>) -> Result<Option<String>> {
    def.as_ref()
        .map(|d| serde_json::to_string(d).map_err(Error::from))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::descriptors::*;
    use super::*;
    use crate::client::MockClusterClient;
    use crate::testing::{api_error, FakeCluster};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tokio::sync::mpsc;

    fn full_addons() -> AddOns {
        AddOns::default()
            .with_config_secret(
                config_secret("abc", &serde_json::json!({"k": "v"})).unwrap(),
            )
            .with_user_extension_secret(user_extension_secret("abc", BTreeMap::new()))
            .with_priority_class(priority_class("abc", 10, Utc::now()))
            .with_docker_secret(docker_secret("abc", &[RegistryAuth::default()]).unwrap())
            .with_token_secret(token_secret("abc", "t"))
    }

    fn live_framework(uid: Option<&str>) -> FrameworkDocument {
        let mut doc = FrameworkDocument::new("abc", Default::default());
        doc.metadata.uid = uid.map(str::to_string);
        doc
    }

    #[tokio::test]
    async fn create_twice_is_idempotent() {
        let cluster = FakeCluster::new();
        let addons = full_addons();

        addons.create(&cluster).await.unwrap();
        addons.create(&cluster).await.unwrap();

        assert_eq!(
            cluster.secret_names(),
            vec!["abc-configcred", "abc-extcred", "abc-regcred", "abc-tokencred"]
        );
        assert_eq!(cluster.priority_class_names(), vec!["abc-priority"]);
    }

    #[tokio::test]
    async fn create_with_no_descriptors_touches_nothing() {
        let mock = MockClusterClient::new();
        let addons = AddOns::default();
        assert!(addons.is_empty());
        addons.create(&mock).await.unwrap();
    }

    #[tokio::test]
    async fn create_aborts_on_other_failures() {
        let mut mock = MockClusterClient::new();
        mock.expect_create_secret()
            .returning(|_| Err(api_error(403, "Forbidden")));

        let addons = AddOns::default().with_token_secret(token_secret("abc", "t"));
        let err = addons.create(&mock).await.unwrap_err();
        assert_eq!(err.status_code(), Some(403));
    }

    #[tokio::test]
    async fn create_tolerates_existing_priority_class() {
        let mut mock = MockClusterClient::new();
        mock.expect_create_priority_class()
            .times(1)
            .returning(|_| Err(api_error(409, "AlreadyExists")));

        let addons = AddOns::default().with_priority_class(priority_class("abc", 0, Utc::now()));
        addons.create(&mock).await.unwrap();
    }

    #[tokio::test]
    async fn silent_patch_reparents_secrets_but_not_priority_class() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mock = MockClusterClient::new();
        mock.expect_patch_secret_owner()
            .times(4)
            .returning(move |name, owner| {
                let _ = tx.send((name.to_string(), owner.clone()));
                // A failed patch must not surface anywhere
                if name == "abc-regcred" {
                    Err(api_error(500, "InternalError"))
                } else {
                    Ok(())
                }
            });
        mock.expect_delete_priority_class().never();

        let client: Arc<dyn ClusterClient> = Arc::new(mock);
        full_addons().silent_patch(client, &live_framework(Some("uid-1")));

        let mut patched = Vec::new();
        for _ in 0..4 {
            let (name, owner) = rx.recv().await.unwrap();
            assert_eq!(owner.uid, "uid-1");
            assert_eq!(owner.kind, "Framework");
            assert_eq!(owner.name, "abc");
            assert_eq!(owner.controller, Some(true));
            assert_eq!(owner.block_owner_deletion, Some(true));
            patched.push(name);
        }
        patched.sort();
        assert_eq!(
            patched,
            vec!["abc-configcred", "abc-extcred", "abc-regcred", "abc-tokencred"]
        );
    }

    #[tokio::test]
    async fn silent_patch_without_uid_does_nothing() {
        let mut mock = MockClusterClient::new();
        mock.expect_patch_secret_owner().never();
        let client: Arc<dyn ClusterClient> = Arc::new(mock);
        full_addons().silent_patch(client, &live_framework(None));
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn silent_delete_removes_everything_and_swallows_errors() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let secret_tx = tx.clone();
        let mut mock = MockClusterClient::new();
        mock.expect_delete_secret().times(4).returning(move |name| {
            let _ = secret_tx.send(name.to_string());
            Err(api_error(404, "NotFound"))
        });
        mock.expect_delete_priority_class()
            .times(1)
            .returning(move |name| {
                let _ = tx.send(name.to_string());
                Ok(())
            });

        full_addons().silent_delete(Arc::new(mock));

        let mut deleted = Vec::new();
        for _ in 0..5 {
            deleted.push(rx.recv().await.unwrap());
        }
        deleted.sort();
        assert_eq!(
            deleted,
            vec![
                "abc-configcred",
                "abc-extcred",
                "abc-priority",
                "abc-regcred",
                "abc-tokencred"
            ]
        );
    }

    #[test]
    fn update_round_trips_descriptors() {
        let addons = full_addons();
        let update = addons.get_update().unwrap();
        assert!(update.config_secret_def.is_some());
        assert!(update.priority_class_def.is_some());
        assert_eq!(AddOns::from_update(&update).unwrap(), addons);

        let partial = AddOns::default().with_token_secret(token_secret("abc", "t"));
        let record = serde_json::to_value(partial.get_update().unwrap()).unwrap();
        let keys: Vec<_> = record.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["tokenSecretDef"]);
    }

    #[test]
    fn malformed_serialized_descriptor_is_rejected() {
        let err = AddOns::from_serialized(Some("{"), None, None, None, None).unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(AddOns::from_serialized(None, None, None, None, None)
            .unwrap()
            .is_empty());
    }
}
