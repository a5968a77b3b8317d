//! Framework snapshots and their database projections
//!
//! A [`Snapshot`] wraps one framework's full document for the length of a
//! single reconciliation pass. It splits the document into the request half
//! (pushed to the cluster) and the status half (mirrored into the database),
//! and produces the flat records the database layer persists.
//!
//! The only mutation performed by the `*_update` projections is expanding a
//! compressed task-role status list in place.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use jobsync_common::{Error, Result};

use crate::codec::decompress_field;
use crate::crd::{ExecutionType, FrameworkDocument, FrameworkRequest, FrameworkStatus};
use crate::job_config::JobConfig;
use crate::state::{translate_raw, FrameworkState, JobState};

/// Annotation holding the monotonically increasing request generation
pub const REQUEST_GENERATION_ANNOTATION: &str = "requestGeneration";
/// Annotation holding the serialized job configuration
pub const CONFIG_ANNOTATION: &str = "config";
/// Annotation holding the user-facing job name
pub const JOB_NAME_ANNOTATION: &str = "jobName";
/// Annotation holding the total GPU count
pub const TOTAL_GPU_ANNOTATION: &str = "totalGpuNumber";
/// Annotation holding the log path infix
pub const LOG_PATH_INFIX_ANNOTATION: &str = "logPathInfix";
/// Label holding the owning user
pub const USER_NAME_LABEL: &str = "userName";
/// Label holding the virtual cluster / queue
pub const VIRTUAL_CLUSTER_LABEL: &str = "virtualCluster";

// =============================================================================
// Database records
// =============================================================================

/// A flat database record, optionally carrying the serialized snapshot
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Update<T> {
    /// The record's columns
    #[serde(flatten)]
    pub fields: T,
    /// Full serialized framework document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

/// Columns derived from the request half
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestFields {
    /// Framework object name
    pub name: String,
    /// Namespace, once the API server has assigned one
    pub namespace: Option<String>,
    /// User-facing job name (`jobName` annotation)
    pub job_name: Option<String>,
    /// Owning user (`userName` label)
    pub user_name: Option<String>,
    /// Raw job configuration (`config` annotation)
    pub job_config: Option<String>,
    /// Start or Stop
    pub execution_type: ExecutionType,
    /// Virtual cluster (`virtualCluster` label)
    pub virtual_cluster: Option<String>,
    /// Priority class requested in the job configuration
    pub job_priority: Option<String>,
    /// Total GPUs (`totalGpuNumber` annotation)
    pub total_gpu_number: Option<u32>,
    /// Tasks across all task roles
    pub total_task_number: u64,
    /// Number of task roles
    pub total_task_role_number: u64,
    /// Log path infix (`logPathInfix` annotation)
    pub log_path_infix: Option<String>,
    /// Notify when the job starts running
    pub notification_at_running: bool,
    /// Running notification already sent; always false on write
    pub notified_at_running: bool,
    /// Notify when the job succeeds
    pub notification_at_succeeded: bool,
    /// Succeeded notification already sent; always false on write
    pub notified_at_succeeded: bool,
    /// Notify when the job fails
    pub notification_at_failed: bool,
    /// Failed notification already sent; always false on write
    pub notified_at_failed: bool,
    /// Notify when the job is stopped
    pub notification_at_stopped: bool,
    /// Stopped notification already sent; always false on write
    pub notified_at_stopped: bool,
    /// Notify on each retry
    pub notification_at_retried: bool,
    /// Retries already notified; always 0 on write
    pub notified_at_retried: u32,
}

/// Columns derived from the status half
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusFields {
    /// Total retries
    pub retries: u32,
    /// Pending retry delay in seconds
    pub retry_delay_time: Option<i64>,
    /// Retries the platform caused: total minus user-accountable
    pub platform_retries: u32,
    /// Always 0; the controller doesn't classify resource retries
    pub resource_retries: u32,
    /// User-accountable retries
    pub user_retries: u32,
    /// Creation timestamp assigned by the API server
    pub creation_time: Option<DateTime<Utc>>,
    /// First run time, or completion time for frameworks that never ran
    pub launch_time: Option<DateTime<Utc>>,
    /// When the framework completed
    pub completion_time: Option<DateTime<Utc>>,
    /// Exit code of the current attempt, once completed
    pub app_exit_code: Option<i32>,
    /// Raw controller state
    pub sub_state: String,
    /// Translated job state
    pub state: JobState,
}

/// Request and status columns together
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AllFields {
    /// Request columns
    #[serde(flatten)]
    pub request: RequestFields,
    /// Status columns
    #[serde(flatten)]
    pub status: StatusFields,
}

/// Columns for migrating a framework that predates generation bookkeeping
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LegacyFields {
    /// Request and status columns
    #[serde(flatten)]
    pub all: AllFields,
    /// Creation time, or the migration time if the object has none
    pub submission_time: DateTime<Utc>,
    /// Always 1
    pub request_generation: u64,
}

/// Record produced by [`Snapshot::get_request_update`]
pub type RequestUpdate = Update<RequestFields>;
/// Record produced by [`Snapshot::get_status_update`]
pub type StatusUpdate = Update<StatusFields>;
/// Record produced by [`Snapshot::get_all_update`]
pub type AllUpdate = Update<AllFields>;
/// Record produced by [`Snapshot::get_record_for_legacy_transfer`]
pub type LegacyRecord = Update<LegacyFields>;

// =============================================================================
// Snapshot
// =============================================================================

/// Normalized view of one framework document
///
/// Always has a status: documents without one get the pending status.
/// Cloning (see [`Snapshot::copy`]) is a deep copy.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    doc: FrameworkDocument,
}

impl Snapshot {
    /// Wrap a framework document
    ///
    /// Fails if the document has no name.
    pub fn new(doc: FrameworkDocument) -> Result<Self> {
        validate(&doc)?;
        Ok(Self { doc })
    }

    /// Build from a JSON value (database row or API response)
    pub fn from_value(value: Value) -> Result<Self> {
        let doc: FrameworkDocument = serde_json::from_value(value)
            .map_err(|e| Error::serialization_for_kind("Framework", e.to_string()))?;
        Self::new(doc)
    }

    /// Independent deep copy
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Project the request half
    ///
    /// With `omit_generation` the `requestGeneration` annotation is removed,
    /// so two requests that differ only in generation compare equal.
    pub fn get_request(&self, omit_generation: bool) -> FrameworkRequest {
        let mut annotations = self.doc.metadata.annotations.clone();
        if omit_generation {
            if let Some(annotations) = annotations.as_mut() {
                annotations.remove(REQUEST_GENERATION_ANNOTATION);
            }
        }

        FrameworkRequest {
            api_version: self.doc.api_version.clone(),
            kind: self.doc.kind.clone(),
            metadata: ObjectMeta {
                name: self.doc.metadata.name.clone(),
                labels: self.doc.metadata.labels.clone(),
                annotations,
                ..Default::default()
            },
            spec: self.doc.spec.clone(),
        }
    }

    /// Replace the request half with another snapshot's, keeping status
    ///
    /// Labels and annotations are only replaced when the other snapshot has them.
    pub fn override_request(&mut self, other: &Snapshot) {
        self.doc.api_version = other.doc.api_version.clone();
        self.doc.kind = other.doc.kind.clone();
        self.doc.spec = other.doc.spec.clone();

        let metadata = &mut self.doc.metadata;
        metadata.name = other.doc.metadata.name.clone();
        if let Some(labels) = &other.doc.metadata.labels {
            metadata.labels = Some(labels.clone());
        }
        if let Some(annotations) = &other.doc.metadata.annotations {
            metadata.annotations = Some(annotations.clone());
        }
    }

    /// Expand a compressed task-role status list in place
    ///
    /// No-op when the list is already expanded or nothing is compressed.
    pub fn unzip_task_role_statuses(&mut self) -> Result<()> {
        let name = self.get_name().to_string();
        let attempt = &mut self.doc.status.attempt_status;
        if attempt.task_role_statuses.is_some() {
            return Ok(());
        }
        let Some(compressed) = attempt.task_role_statuses_compressed.as_deref() else {
            return Ok(());
        };

        let statuses: Vec<Value> = decompress_field(compressed)?;
        debug!(
            framework = %name,
            task_roles = statuses.len(),
            "expanded compressed task role statuses"
        );
        attempt.task_role_statuses = Some(statuses);
        attempt.task_role_statuses_compressed = None;
        Ok(())
    }

    /// Record for the request half
    pub fn get_request_update(&mut self, with_snapshot: bool) -> Result<RequestUpdate> {
        let fields = self.request_fields()?;
        self.wrap(fields, with_snapshot)
    }

    /// Record for the status half
    pub fn get_status_update(&mut self, with_snapshot: bool) -> Result<StatusUpdate> {
        let fields = self.status_fields();
        self.wrap(fields, with_snapshot)
    }

    /// Record for both halves
    pub fn get_all_update(&mut self, with_snapshot: bool) -> Result<AllUpdate> {
        let fields = AllFields {
            request: self.request_fields()?,
            status: self.status_fields(),
        };
        self.wrap(fields, with_snapshot)
    }

    /// One-time migration record for frameworks without generation bookkeeping
    ///
    /// Submission time is taken from the creation timestamp (or now), and the
    /// request generation is forced to 1 before the snapshot is serialized.
    pub fn get_record_for_legacy_transfer(&mut self) -> Result<LegacyRecord> {
        self.set_request_generation(1);
        let all = self.get_all_update(true)?;
        let submission_time = self.get_creation_time().unwrap_or_else(Utc::now);

        Ok(Update {
            fields: LegacyFields {
                all: all.fields,
                submission_time,
                request_generation: 1,
            },
            snapshot: all.snapshot,
        })
    }

    /// Framework name
    pub fn get_name(&self) -> &str {
        self.doc.metadata.name.as_deref().unwrap_or_default()
    }

    /// Alias for [`Snapshot::get_name`]
    pub fn name(&self) -> &str {
        self.get_name()
    }

    /// Raw controller state
    pub fn get_state(&self) -> &str {
        &self.doc.status.state
    }

    /// Translated job state
    pub fn job_state(&self) -> JobState {
        let status = &self.doc.status;
        translate_raw(
            &status.state,
            status.exit_code(),
            status.retry_policy_status.retry_delay_sec,
        )
    }

    /// Observed status
    pub fn status(&self) -> &FrameworkStatus {
        &self.doc.status
    }

    /// Total retries so far
    pub fn get_total_retried_count(&self) -> u32 {
        self.doc.status.retry_policy_status.total_retried_count
    }

    /// Deep copy of the wrapped document
    pub fn get_snapshot(&self) -> FrameworkDocument {
        self.doc.clone()
    }

    /// Serialized document
    pub fn get_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.doc)?)
    }

    /// Whether the API server has assigned a creation timestamp
    pub fn has_creation_time(&self) -> bool {
        self.doc.metadata.creation_timestamp.is_some()
    }

    /// Creation timestamp, if assigned
    pub fn get_creation_time(&self) -> Option<DateTime<Utc>> {
        self.doc
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
    }

    /// Set the request generation annotation
    pub fn set_request_generation(&mut self, generation: u64) {
        self.doc
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(
                REQUEST_GENERATION_ANNOTATION.to_string(),
                generation.to_string(),
            );
    }

    /// Request generation; legacy frameworks without one are set to 1
    pub fn get_request_generation(&mut self) -> Result<u64> {
        let current = self
            .doc
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(REQUEST_GENERATION_ANNOTATION));

        match current {
            Some(raw) => raw.trim().parse().map_err(|_| {
                Error::invalid_snapshot_for(
                    self.get_name(),
                    format!("requestGeneration '{raw}' is not a number"),
                )
            }),
            None => {
                self.set_request_generation(1);
                Ok(1)
            }
        }
    }

    /// Merge-patch (RFC 7386) the document with caller-supplied changes
    ///
    /// Any `status` key in the patch is dropped. On error the snapshot is
    /// left unchanged.
    pub fn apply_request_patch(&mut self, mut patch: Value) -> Result<()> {
        if let Some(object) = patch.as_object_mut() {
            object.remove("status");
        }

        let mut merged = serde_json::to_value(&self.doc)?;
        json_patch::merge(&mut merged, &patch);
        let mut doc: FrameworkDocument = serde_json::from_value(merged)
            .map_err(|e| Error::serialization_for_kind("Framework", e.to_string()))?;
        doc.status = self.doc.status.clone();
        validate(&doc)?;

        self.doc = doc;
        Ok(())
    }

    /// Mark a framework that could never be created in the cluster as failed
    ///
    /// Only valid while the framework is still pending its first attempt.
    pub fn set_failed(&mut self) -> Result<()> {
        if self.get_total_retried_count() != 0
            || self.get_state() != FrameworkState::AttemptCreationPending.as_str()
        {
            return Err(Error::precondition(
                self.get_name(),
                format!(
                    "set_failed only applies to frameworks that never started (state {}, {} retries)",
                    self.get_state(),
                    self.get_total_retried_count()
                ),
            ));
        }

        self.doc.status = FrameworkStatus::create_permanently_failed(Utc::now());
        Ok(())
    }

    fn annotation(&self, key: &str) -> Option<&String> {
        self.doc.metadata.annotations.as_ref()?.get(key)
    }

    fn label(&self, key: &str) -> Option<&String> {
        self.doc.metadata.labels.as_ref()?.get(key)
    }

    fn request_fields(&self) -> Result<RequestFields> {
        let raw_config = self.annotation(CONFIG_ANNOTATION);
        let config = JobConfig::load(raw_config.map(String::as_str))?;
        let notify = config.status_change_notification();

        let total_gpu_number = self
            .annotation(TOTAL_GPU_ANNOTATION)
            .map(|raw| {
                raw.trim().parse::<u32>().map_err(|_| {
                    Error::invalid_snapshot_for(
                        self.get_name(),
                        format!("totalGpuNumber '{raw}' is not a number"),
                    )
                })
            })
            .transpose()?;

        let spec = &self.doc.spec;
        Ok(RequestFields {
            name: self.get_name().to_string(),
            namespace: self.doc.metadata.namespace.clone(),
            job_name: self.annotation(JOB_NAME_ANNOTATION).cloned(),
            user_name: self.label(USER_NAME_LABEL).cloned(),
            job_config: raw_config.cloned(),
            execution_type: spec.execution_type,
            virtual_cluster: self.label(VIRTUAL_CLUSTER_LABEL).cloned(),
            job_priority: config.job_priority_class().map(str::to_string),
            total_gpu_number,
            total_task_number: spec.total_task_number(),
            total_task_role_number: spec.task_roles.len() as u64,
            log_path_infix: self.annotation(LOG_PATH_INFIX_ANNOTATION).cloned(),
            notification_at_running: notify.running,
            notified_at_running: false,
            notification_at_succeeded: notify.succeeded,
            notified_at_succeeded: false,
            notification_at_failed: notify.failed,
            notified_at_failed: false,
            notification_at_stopped: notify.stopped,
            notified_at_stopped: false,
            notification_at_retried: notify.retried,
            notified_at_retried: 0,
        })
    }

    fn status_fields(&self) -> StatusFields {
        let status = &self.doc.status;
        let retry = &status.retry_policy_status;

        StatusFields {
            retries: retry.total_retried_count,
            retry_delay_time: retry.retry_delay_sec,
            platform_retries: retry
                .total_retried_count
                .saturating_sub(retry.accountable_retried_count),
            resource_retries: 0,
            user_retries: retry.accountable_retried_count,
            creation_time: self.get_creation_time(),
            launch_time: status.run_time.or(status.completion_time),
            completion_time: status.completion_time,
            app_exit_code: status.exit_code(),
            sub_state: status.state.clone(),
            state: self.job_state(),
        }
    }

    fn wrap<T>(&mut self, fields: T, with_snapshot: bool) -> Result<Update<T>> {
        let snapshot = if with_snapshot {
            self.unzip_task_role_statuses()?;
            Some(self.get_string()?)
        } else {
            None
        };
        Ok(Update { fields, snapshot })
    }
}

fn validate(doc: &FrameworkDocument) -> Result<()> {
    match doc.metadata.name.as_deref() {
        Some(name) if !name.is_empty() => Ok(()),
        _ => Err(Error::invalid_snapshot("framework document has no metadata.name")),
    }
}

impl FromStr for Snapshot {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let doc: FrameworkDocument = serde_json::from_str(s)
            .map_err(|e| Error::serialization_for_kind("Framework", e.to_string()))?;
        Self::new(doc)
    }
}

impl TryFrom<Value> for Snapshot {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}
