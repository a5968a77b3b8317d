//! Add-on descriptor builders
//!
//! Builds the auxiliary objects a job submission needs next to its
//! Framework. Every object is named after the encoded framework name plus a
//! fixed suffix, so the pair can always be found again from the framework.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::json;

use jobsync_common::{Error, Result};

/// Registry used when an auth entry doesn't name one
pub const DEFAULT_REGISTRY: &str = "https://index.docker.io/v1/";

/// Suffix of the registry-credential secret
pub const DOCKER_SECRET_SUFFIX: &str = "regcred";
/// Suffix of the job configuration secret
pub const CONFIG_SECRET_SUFFIX: &str = "configcred";
/// Suffix of the priority class
pub const PRIORITY_CLASS_SUFFIX: &str = "priority";
/// Suffix of the token secret
pub const TOKEN_SECRET_SUFFIX: &str = "tokencred";
/// Suffix of the user-extension secret
pub const USER_EXTENSION_SECRET_SUFFIX: &str = "extcred";

/// Key of the job secrets inside the configuration secret
pub const SECRETS_FILE_KEY: &str = "secrets.yaml";

/// Lowest and highest job priority accepted by the scheduler
pub const MIN_JOB_PRIORITY: i32 = -1;
/// See [`MIN_JOB_PRIORITY`]
pub const MAX_JOB_PRIORITY: i32 = 126;

const PRIORITY_TIME_BITS: u32 = 23;

/// Name of an add-on object for a framework
pub fn addon_name(encoded_framework: &str, suffix: &str) -> String {
    format!("{encoded_framework}-{suffix}")
}

/// Credentials for one image registry
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryAuth {
    /// Registry user
    #[serde(default)]
    pub username: String,
    /// Registry password or token
    #[serde(default)]
    pub password: String,
    /// Registry URI; [`DEFAULT_REGISTRY`] when absent
    #[serde(default)]
    pub registryuri: Option<String>,
}

/// `kubernetes.io/dockerconfigjson` secret holding every registry credential
pub fn docker_secret(encoded_framework: &str, auths: &[RegistryAuth]) -> Result<Secret> {
    let mut registries = serde_json::Map::new();
    for auth in auths {
        let registry = auth.registryuri.as_deref().unwrap_or(DEFAULT_REGISTRY);
        let token = STANDARD.encode(format!("{}:{}", auth.username, auth.password));
        registries.insert(registry.to_string(), json!({ "auth": token }));
    }
    let docker_config = serde_json::to_string(&json!({ "auths": registries }))?;

    Ok(Secret {
        metadata: named(addon_name(encoded_framework, DOCKER_SECRET_SUFFIX)),
        type_: Some("kubernetes.io/dockerconfigjson".to_string()),
        string_data: Some(BTreeMap::from([(
            ".dockerconfigjson".to_string(),
            docker_config,
        )])),
        ..Default::default()
    })
}

/// Opaque secret carrying the job's own secrets as `secrets.yaml`
pub fn config_secret(encoded_framework: &str, secrets: &serde_json::Value) -> Result<Secret> {
    let yaml = serde_yaml::to_string(secrets)
        .map_err(|e| Error::serialization_for_kind("Secret", e.to_string()))?;
    Ok(opaque_secret(
        addon_name(encoded_framework, CONFIG_SECRET_SUFFIX),
        BTreeMap::from([(SECRETS_FILE_KEY.to_string(), yaml)]),
    ))
}

/// Opaque secret carrying a job-scoped access token
pub fn token_secret(encoded_framework: &str, token: &str) -> Secret {
    opaque_secret(
        addon_name(encoded_framework, TOKEN_SECRET_SUFFIX),
        BTreeMap::from([("token".to_string(), token.to_string())]),
    )
}

/// Opaque secret carrying data for user-supplied runtime extensions
pub fn user_extension_secret(encoded_framework: &str, data: BTreeMap<String, String>) -> Secret {
    opaque_secret(
        addon_name(encoded_framework, USER_EXTENSION_SECRET_SUFFIX),
        data,
    )
}

/// Pod priority for a job
///
/// Higher job priorities always win; within one priority, older jobs win.
/// `job_priority` is clamped to [`MIN_JOB_PRIORITY`]..=[`MAX_JOB_PRIORITY`]
/// and only the low 23 bits of the creation time are used.
pub fn pod_priority(job_priority: i32, created_at_secs: i64) -> i32 {
    let priority = job_priority.clamp(MIN_JOB_PRIORITY, MAX_JOB_PRIORITY);
    let time_bits = (created_at_secs & ((1 << PRIORITY_TIME_BITS) - 1)) as i32;
    -(((MAX_JOB_PRIORITY - priority) << PRIORITY_TIME_BITS) + time_bits)
}

/// Per-job priority class used by every pod of the framework
pub fn priority_class(
    encoded_framework: &str,
    job_priority: i32,
    created_at: DateTime<Utc>,
) -> PriorityClass {
    PriorityClass {
        metadata: named(addon_name(encoded_framework, PRIORITY_CLASS_SUFFIX)),
        value: pod_priority(job_priority, created_at.timestamp()),
        preemption_policy: Some("PreemptLowerPriority".to_string()),
        global_default: Some(false),
        ..Default::default()
    }
}

fn named(name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        ..Default::default()
    }
}

fn opaque_secret(name: String, data: BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: named(name),
        type_: Some("Opaque".to_string()),
        string_data: Some(data),
        ..Default::default()
    }
}
