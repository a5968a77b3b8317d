//! Framework document types
//!
//! Typed view of the framework controller's `Framework` object. Only the
//! fields the reconciler reads are typed; everything else is carried in the
//! flattened `extra` maps so a document survives a read-modify-write cycle
//! untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use jobsync_common::{FRAMEWORK_API_VERSION, FRAMEWORK_KIND};

use crate::state::{FrameworkState, EXIT_CODE_CREATE_PERMANENT_FAILURE};

/// Diagnostics attached to frameworks that were never created in the cluster
pub const CREATE_PERMANENT_FAILURE_DIAGNOSTICS: &str =
    "Job is submitted to database, but cannot be created in ApiServer due to permanent failures.";

/// Completion phase attached to frameworks that were never created in the cluster
pub const CREATE_PERMANENT_FAILURE_PHASE: &str = "CreateFrameworkPermanentFailed";

// =============================================================================
// Document
// =============================================================================

/// Full Framework document: request (metadata + spec) and observed status
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkDocument {
    /// API group/version, e.g. `frameworkcontroller.microsoft.com/v1`
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Always `Framework`
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Desired state
    #[serde(default)]
    pub spec: FrameworkSpec,

    /// Observed state; synthesized as "pending, no attempts yet" when absent
    #[serde(default, deserialize_with = "null_as_pending")]
    pub status: FrameworkStatus,

    /// Unrecognized top-level fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_api_version() -> String {
    FRAMEWORK_API_VERSION.to_string()
}

fn default_kind() -> String {
    FRAMEWORK_KIND.to_string()
}

fn null_as_pending<'de, D>(deserializer: D) -> Result<FrameworkStatus, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<FrameworkStatus>::deserialize(deserializer)?.unwrap_or_default())
}

impl FrameworkDocument {
    /// Create a framework document with the given name and spec
    pub fn new(name: impl Into<String>, spec: FrameworkSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            spec,
            status: FrameworkStatus::default(),
            extra: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Spec
// =============================================================================

/// Whether the framework should be running
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionType {
    /// Run (or keep running) the framework
    #[default]
    Start,
    /// Stop the framework
    Stop,
}

impl std::fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::Stop => write!(f, "Stop"),
        }
    }
}

/// Framework-level retry policy
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicySpec {
    /// Let the controller classify failures before retrying
    #[serde(default)]
    pub fancy_retry_policy: bool,

    /// Maximum retries; -1 means unlimited, -2 means "always retry"
    #[serde(default)]
    pub max_retry_count: i32,

    /// Unrecognized fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One task role: a group of identical tasks
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRoleSpec {
    /// Task role name
    pub name: String,

    /// Number of tasks in this role
    #[serde(default)]
    pub task_number: u32,

    /// Task template (retry policy + pod template), produced upstream
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub task: Value,

    /// Unrecognized fields (e.g. frameworkAttemptCompletionPolicy)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Framework desired state
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkSpec {
    /// Start or Stop
    #[serde(default)]
    pub execution_type: ExecutionType,

    /// Retry policy for the whole framework
    #[serde(default)]
    pub retry_policy: RetryPolicySpec,

    /// Ordered task roles
    #[serde(default)]
    pub task_roles: Vec<TaskRoleSpec>,

    /// Unrecognized fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl FrameworkSpec {
    /// Total number of tasks across all roles
    pub fn total_task_number(&self) -> u64 {
        self.task_roles
            .iter()
            .map(|role| u64::from(role.task_number))
            .sum()
    }
}

// =============================================================================
// Status
// =============================================================================

/// Failure classification attached to a completion status
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionType {
    /// Succeeded / Failed
    pub name: String,
    /// Tags such as Permanent, Transient, User, Platform
    #[serde(default)]
    pub attributes: Vec<String>,
}

/// How an attempt completed
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStatus {
    /// Exit code
    pub code: i32,

    /// Human-readable diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,

    /// Controller completion phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Failure-type tags
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub completion_type: Option<CompletionType>,

    /// Task whose completion triggered the attempt completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Value>,

    /// Unrecognized fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Status of the current attempt
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttemptStatus {
    /// Set once the attempt completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_status: Option<CompletionStatus>,

    /// Per task role status blocks, once expanded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_role_statuses: Option<Vec<Value>>,

    /// gzip + base64 encoded `taskRoleStatuses`, used when the list is large
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_role_statuses_compressed: Option<String>,

    /// Unrecognized fields (id, instance uid, timestamps, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Retry bookkeeping
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicyStatus {
    /// Delay before the next attempt starts, while one is pending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_sec: Option<i64>,

    /// All retries so far
    #[serde(default)]
    pub total_retried_count: u32,

    /// Retries caused by the user's own failures
    #[serde(default)]
    pub accountable_retried_count: u32,

    /// Unrecognized fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Framework observed state
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkStatus {
    /// Raw controller execution state
    pub state: String,

    /// When the framework object was first seen by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// When the first attempt started running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_time: Option<DateTime<Utc>>,

    /// Last state transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_time: Option<DateTime<Utc>>,

    /// When the framework completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Current attempt
    #[serde(default)]
    pub attempt_status: AttemptStatus,

    /// Retry bookkeeping
    #[serde(default)]
    pub retry_policy_status: RetryPolicyStatus,

    /// Unrecognized fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for FrameworkStatus {
    /// Pending, no attempts yet
    fn default() -> Self {
        Self {
            state: FrameworkState::AttemptCreationPending.to_string(),
            start_time: None,
            run_time: None,
            transition_time: None,
            completion_time: None,
            attempt_status: AttemptStatus {
                task_role_statuses: Some(Vec::new()),
                ..Default::default()
            },
            retry_policy_status: RetryPolicyStatus::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl FrameworkStatus {
    /// Terminal status for a framework that could never be created in the cluster
    pub fn create_permanently_failed(now: DateTime<Utc>) -> Self {
        let mut attempt_extra = BTreeMap::new();
        attempt_extra.insert("id".to_string(), Value::from(0));

        let mut completion_extra = BTreeMap::new();
        completion_extra.insert("id".to_string(), Value::from(0));
        for key in ["startTime", "runTime", "completionTime"] {
            completion_extra.insert(key.to_string(), Value::String(now.to_rfc3339()));
        }

        Self {
            state: FrameworkState::Completed.to_string(),
            start_time: Some(now),
            run_time: Some(now),
            transition_time: Some(now),
            completion_time: Some(now),
            attempt_status: AttemptStatus {
                completion_status: Some(CompletionStatus {
                    code: EXIT_CODE_CREATE_PERMANENT_FAILURE,
                    diagnostics: Some(CREATE_PERMANENT_FAILURE_DIAGNOSTICS.to_string()),
                    phase: Some(CREATE_PERMANENT_FAILURE_PHASE.to_string()),
                    completion_type: Some(CompletionType {
                        name: "Failed".to_string(),
                        attributes: vec!["Permanent".to_string()],
                    }),
                    trigger: None,
                    extra: completion_extra,
                }),
                task_role_statuses: Some(Vec::new()),
                task_role_statuses_compressed: None,
                extra: attempt_extra,
            },
            retry_policy_status: RetryPolicyStatus::default(),
            extra: BTreeMap::new(),
        }
    }

    /// Exit code of the current attempt, once it completed
    pub fn exit_code(&self) -> Option<i32> {
        self.attempt_status
            .completion_status
            .as_ref()
            .map(|c| c.code)
    }
}

// =============================================================================
// Request projection
// =============================================================================

/// The request half of a framework: what gets pushed to the cluster
///
/// Metadata only ever carries name, labels and annotations.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkRequest {
    /// API group/version
    pub api_version: String,
    /// Always `Framework`
    pub kind: String,
    /// name, labels, annotations
    pub metadata: ObjectMeta,
    /// Desired state
    pub spec: FrameworkSpec,
}
