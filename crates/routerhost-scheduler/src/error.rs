//! Scheduler error types.

use routerhost_state::StateError;
use thiserror::Error;

/// Errors that can occur during scheduling and registry operations.
///
/// Failing to place a router is not an error: it is reported as a
/// [`ScheduleOutcome`](crate::binding::ScheduleOutcome) and the router is
/// backlogged.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("router not found: {0}")]
    RouterNotFound(String),

    #[error("router type not found: {0}")]
    RouterTypeNotFound(String),

    #[error("multiple router types named {0}, specify the id instead")]
    MultipleRouterTypes(String),

    #[error("router port not found: {0}")]
    PortNotFound(String),

    #[error("hosting device not found: {0}")]
    HostingDeviceNotFound(String),

    #[error("hosting device template not found: {0}")]
    TemplateNotFound(String),

    #[error("device credential not found: {0}")]
    CredentialNotFound(String),

    #[error("missing or inconsistent binding info for router {0}")]
    BindingInfo(String),

    #[error("hosting device {0} is in use")]
    HostingDeviceInUse(String),

    #[error("hosting device template {0} is in use")]
    TemplateInUse(String),

    #[error("router type {0} is in use")]
    RouterTypeInUse(String),

    #[error("device credential {0} is in use")]
    CredentialInUse(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("scheduler strategy error: {0}")]
    Strategy(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl SchedulerError {
    /// Translate a store integrity conflict into a domain error, leaving
    /// other store errors untouched.
    pub(crate) fn on_conflict(err: StateError, f: impl FnOnce() -> SchedulerError) -> SchedulerError {
        if err.is_conflict() {
            f()
        } else {
            SchedulerError::State(err)
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
