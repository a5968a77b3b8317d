//! Framework execution state to user-facing job state translation
//!
//! The framework controller reports a fine-grained attempt lifecycle. Callers
//! only ever see the handful of [`JobState`]s below.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Exit code the controller reports when a user asked for the job to stop
pub const EXIT_CODE_STOPPED_BY_USER: i32 = -210;

/// Exit code the controller reports when the platform stopped the job
pub const EXIT_CODE_STOPPED_BY_PLATFORM: i32 = -220;

/// Exit code written by [`crate::Snapshot::set_failed`] for frameworks that
/// could never be created in the cluster
pub const EXIT_CODE_CREATE_PERMANENT_FAILURE: i32 = -1100;

/// Execution state of a framework as reported by the framework controller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameworkState {
    /// Attempt is waiting to be created
    AttemptCreationPending,
    /// Attempt creation was requested from the API server
    AttemptCreationRequested,
    /// Attempt objects exist but are not running yet
    AttemptPreparing,
    /// Attempt is running
    AttemptRunning,
    /// Attempt is waiting to be deleted
    AttemptDeletionPending,
    /// Attempt deletion was requested from the API server
    AttemptDeletionRequested,
    /// Attempt objects are being deleted
    AttemptDeleting,
    /// Attempt finished, the framework may retry
    AttemptCompleted,
    /// Framework finished for good
    Completed,
}

impl FrameworkState {
    /// The controller's name for this state
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AttemptCreationPending => "AttemptCreationPending",
            Self::AttemptCreationRequested => "AttemptCreationRequested",
            Self::AttemptPreparing => "AttemptPreparing",
            Self::AttemptRunning => "AttemptRunning",
            Self::AttemptDeletionPending => "AttemptDeletionPending",
            Self::AttemptDeletionRequested => "AttemptDeletionRequested",
            Self::AttemptDeleting => "AttemptDeleting",
            Self::AttemptCompleted => "AttemptCompleted",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for FrameworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a state string is not one the controller defines
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownFrameworkState(pub String);

impl fmt::Display for UnknownFrameworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown framework state '{}'", self.0)
    }
}

impl std::error::Error for UnknownFrameworkState {}

impl FromStr for FrameworkState {
    type Err = UnknownFrameworkState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "AttemptCreationPending" => Self::AttemptCreationPending,
            "AttemptCreationRequested" => Self::AttemptCreationRequested,
            "AttemptPreparing" => Self::AttemptPreparing,
            "AttemptRunning" => Self::AttemptRunning,
            "AttemptDeletionPending" => Self::AttemptDeletionPending,
            "AttemptDeletionRequested" => Self::AttemptDeletionRequested,
            "AttemptDeleting" => Self::AttemptDeleting,
            "AttemptCompleted" => Self::AttemptCompleted,
            "Completed" => Self::Completed,
            other => return Err(UnknownFrameworkState(other.to_string())),
        })
    }
}

/// User-facing job state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Not running yet, or waiting to retry
    Waiting,
    /// Running (including attempts being torn down for a retry)
    Running,
    /// A stop was requested and is in progress
    Stopping,
    /// Finished with exit code 0
    Succeeded,
    /// Stopped by the user or the platform
    Stopped,
    /// Finished with any other exit code
    Failed,
    /// State the controller reported is not recognized
    Unknown,
}

impl JobState {
    /// Upper-case name stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Succeeded => "SUCCEEDED",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// The job will not change state any more
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_stop_exit_code(exit_code: Option<i32>) -> bool {
    matches!(
        exit_code,
        Some(EXIT_CODE_STOPPED_BY_USER) | Some(EXIT_CODE_STOPPED_BY_PLATFORM)
    )
}

/// Translate a known framework state into a job state
///
/// `retry_delay_sec` is only consulted for `AttemptCompleted`: a pending
/// retry delay means the next attempt has not started yet.
pub fn translate(
    state: FrameworkState,
    exit_code: Option<i32>,
    retry_delay_sec: Option<i64>,
) -> JobState {
    use FrameworkState::*;

    match state {
        AttemptCreationPending | AttemptCreationRequested | AttemptPreparing => JobState::Waiting,
        AttemptRunning => JobState::Running,
        AttemptDeletionPending | AttemptDeletionRequested | AttemptDeleting => {
            if is_stop_exit_code(exit_code) {
                JobState::Stopping
            } else {
                JobState::Running
            }
        }
        AttemptCompleted => match retry_delay_sec {
            None => JobState::Running,
            Some(_) => JobState::Waiting,
        },
        Completed => match exit_code {
            Some(0) => JobState::Succeeded,
            code if is_stop_exit_code(code) => JobState::Stopped,
            _ => JobState::Failed,
        },
    }
}

/// Translate a raw state string; unrecognized states become [`JobState::Unknown`]
pub fn translate_raw(state: &str, exit_code: Option<i32>, retry_delay_sec: Option<i64>) -> JobState {
    state
        .parse::<FrameworkState>()
        .map(|s| translate(s, exit_code, retry_delay_sec))
        .unwrap_or(JobState::Unknown)
}
