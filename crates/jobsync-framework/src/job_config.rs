//! Job configuration loading
//!
//! The submitted job protocol is stored verbatim (YAML) in the framework's
//! `config` annotation. Only a few optional fields matter here; every one of
//! them has an explicit default so a sparse or legacy config still yields a
//! complete database record.

use serde::Deserialize;

use jobsync_common::Result;

/// Which terminal/retry transitions the user wants to be notified about
///
/// Every flag defaults to `false`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatusChangeNotification {
    /// Notify when the job starts running
    pub running: bool,
    /// Notify when the job succeeds
    pub succeeded: bool,
    /// Notify when the job fails
    pub failed: bool,
    /// Notify when the job is stopped
    pub stopped: bool,
    /// Notify on each retry
    pub retried: bool,
}

/// Scheduler hints written by admission control
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HivedSchedulerExtras {
    /// Priority class requested for the job; defaults to none
    #[serde(default)]
    pub job_priority_class: Option<String>,
}

/// The `extras` section of a job config
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobExtras {
    /// Scheduler hints
    #[serde(default)]
    pub hivedscheduler: Option<HivedSchedulerExtras>,

    /// Notification preferences
    #[serde(default)]
    pub job_status_change_notification: Option<StatusChangeNotification>,
}

/// Structured view of the job configuration annotation
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct JobConfig {
    /// Optional extras
    #[serde(default)]
    pub extras: Option<JobExtras>,
}

impl JobConfig {
    /// Load from the raw annotation value
    ///
    /// A missing or empty annotation, or a document that is not a mapping,
    /// yields the default config. A mapping whose known fields have the wrong
    /// type is an error.
    pub fn load(raw: Option<&str>) -> Result<Self> {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return Ok(Self::default());
        };

        let value: serde_yaml::Value = serde_yaml::from_str(raw)?;
        if !value.is_mapping() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_value(value)?)
    }

    /// Priority class requested through scheduler extras
    pub fn job_priority_class(&self) -> Option<&str> {
        self.extras
            .as_ref()
            .and_then(|e| e.hivedscheduler.as_ref())
            .and_then(|h| h.job_priority_class.as_deref())
    }

    /// Notification preferences, all disabled when unspecified
    pub fn status_change_notification(&self) -> StatusChangeNotification {
        self.extras
            .as_ref()
            .and_then(|e| e.job_status_change_notification.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
protocolVersion: 2
name: mnist
type: job
taskRoles:
  worker:
    instances: 2
extras:
  hivedscheduler:
    jobPriorityClass: prod
  jobStatusChangeNotification:
    running: true
    failed: true
"#;

    #[test]
    fn reads_priority_and_notifications() {
        let config = JobConfig::load(Some(FULL_CONFIG)).unwrap();
        assert_eq!(config.job_priority_class(), Some("prod"));

        let notify = config.status_change_notification();
        assert!(notify.running);
        assert!(notify.failed);
        assert!(!notify.succeeded);
        assert!(!notify.stopped);
        assert!(!notify.retried);
    }

    #[test]
    fn absent_fields_default() {
        for raw in [None, Some(""), Some("   \n"), Some("name: x"), Some("extras: null")] {
            let config = JobConfig::load(raw).unwrap();
            assert_eq!(config.job_priority_class(), None, "raw = {raw:?}");
            assert_eq!(
                config.status_change_notification(),
                StatusChangeNotification::default()
            );
        }
    }

    #[test]
    fn non_mapping_documents_default() {
        assert_eq!(JobConfig::load(Some("just a string")).unwrap(), JobConfig::default());
        assert_eq!(JobConfig::load(Some("- a\n- b")).unwrap(), JobConfig::default());
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let err = JobConfig::load(Some("extras: [unclosed")).unwrap_err();
        assert!(matches!(err, jobsync_common::Error::Config { .. }));
    }

    #[test]
    fn wrongly_typed_flag_is_a_config_error() {
        let raw = "extras:\n  jobStatusChangeNotification:\n    running: [1, 2]\n";
        assert!(JobConfig::load(Some(raw)).is_err());
    }
}
