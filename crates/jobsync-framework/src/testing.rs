//! In-memory cluster for tests
//!
//! Enforces the two API server behaviors reconciliation relies on: 404 for
//! missing objects and an atomic create that rejects duplicates with 409.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use kube::error::ErrorResponse;

use jobsync_common::{Error, Result};

use crate::client::ClusterClient;
use crate::crd::{FrameworkDocument, FrameworkRequest};

/// Build the error the API server returns for `code`
pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} ({code})"),
        reason: reason.to_string(),
        code,
    }))
}

#[derive(Default)]
pub(crate) struct FakeCluster {
    frameworks: Mutex<BTreeMap<String, FrameworkDocument>>,
    secrets: Mutex<BTreeMap<String, Secret>>,
    priority_classes: Mutex<BTreeMap<String, PriorityClass>>,
    framework_creates: AtomicUsize,
    next_uid: AtomicUsize,
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn framework(&self, name: &str) -> Option<FrameworkDocument> {
        self.frameworks.lock().unwrap().get(name).cloned()
    }

    pub(crate) fn framework_count(&self) -> usize {
        self.frameworks.lock().unwrap().len()
    }

    /// Successful framework creates so far
    pub(crate) fn framework_creates(&self) -> usize {
        self.framework_creates.load(Ordering::SeqCst)
    }

    pub(crate) fn secret(&self, name: &str) -> Option<Secret> {
        self.secrets.lock().unwrap().get(name).cloned()
    }

    pub(crate) fn secret_names(&self) -> Vec<String> {
        self.secrets.lock().unwrap().keys().cloned().collect()
    }

    pub(crate) fn priority_class_names(&self) -> Vec<String> {
        self.priority_classes.lock().unwrap().keys().cloned().collect()
    }
}

fn name_of(name: &Option<String>) -> String {
    name.clone().unwrap_or_default()
}

fn insert_new<T>(store: &Mutex<BTreeMap<String, T>>, name: String, object: T) -> Result<()> {
    let mut store = store.lock().unwrap();
    if store.contains_key(&name) {
        return Err(api_error(409, "AlreadyExists"));
    }
    store.insert(name, object);
    Ok(())
}

fn remove<T>(store: &Mutex<BTreeMap<String, T>>, name: &str) -> Result<()> {
    match store.lock().unwrap().remove(name) {
        Some(_) => Ok(()),
        None => Err(api_error(404, "NotFound")),
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_framework(&self, name: &str) -> Result<FrameworkDocument> {
        tokio::task::yield_now().await;
        self.framework(name)
            .ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn create_framework(&self, request: &FrameworkRequest) -> Result<FrameworkDocument> {
        tokio::task::yield_now().await;

        let mut doc: FrameworkDocument = serde_json::from_value(serde_json::to_value(request)?)?;
        let uid = self.next_uid.fetch_add(1, Ordering::SeqCst);
        doc.metadata.uid = Some(format!("uid-{uid}"));
        doc.metadata.namespace = Some("default".to_string());
        doc.metadata.creation_timestamp = Some(Time(Utc::now()));

        insert_new(&self.frameworks, name_of(&doc.metadata.name), doc.clone())?;
        self.framework_creates.fetch_add(1, Ordering::SeqCst);
        Ok(doc)
    }

    async fn patch_framework(
        &self,
        name: &str,
        request: &FrameworkRequest,
    ) -> Result<FrameworkDocument> {
        tokio::task::yield_now().await;

        let mut frameworks = self.frameworks.lock().unwrap();
        let live = frameworks
            .get_mut(name)
            .ok_or_else(|| api_error(404, "NotFound"))?;

        let mut merged = serde_json::to_value(&*live)?;
        json_patch::merge(&mut merged, &serde_json::to_value(request)?);
        *live = serde_json::from_value(merged)?;
        Ok(live.clone())
    }

    async fn delete_framework(&self, name: &str) -> Result<()> {
        tokio::task::yield_now().await;
        remove(&self.frameworks, name)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        tokio::task::yield_now().await;
        insert_new(&self.secrets, name_of(&secret.metadata.name), secret.clone())
    }

    async fn patch_secret_owner(&self, name: &str, owner: &OwnerReference) -> Result<()> {
        tokio::task::yield_now().await;
        let mut secrets = self.secrets.lock().unwrap();
        let secret = secrets
            .get_mut(name)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        secret.metadata.owner_references = Some(vec![owner.clone()]);
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        tokio::task::yield_now().await;
        remove(&self.secrets, name)
    }

    async fn create_priority_class(&self, priority_class: &PriorityClass) -> Result<()> {
        tokio::task::yield_now().await;
        insert_new(
            &self.priority_classes,
            name_of(&priority_class.metadata.name),
            priority_class.clone(),
        )
    }

    async fn delete_priority_class(&self, name: &str) -> Result<()> {
        tokio::task::yield_now().await;
        remove(&self.priority_classes, name)
    }
}
