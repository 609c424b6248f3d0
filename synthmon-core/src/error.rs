//! Error types for the reconciliation core.

use std::time::Duration;
use thiserror::Error;

/// The main error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Sentinel returned by the filter watcher for events the pipeline should
    /// drop. Suppressed at the informer boundary, never logged as an error.
    #[error("event filtered")]
    SkipEvent,

    /// The payload handed to the pipeline is not a supported object.
    #[error("unexpected object type")]
    UnexpectedObject,

    /// A payload claimed a supported kind but did not decode as one.
    #[error("decoding {kind} payload: {source}")]
    Decode {
        /// Kind the payload was expected to be.
        kind: String,
        /// Underlying decode failure.
        source: serde_json::Error,
    },

    /// A watcher received an object of a different variant than it expects.
    #[error("type assertion failed, expected {expected} got {actual}")]
    TypeAssert {
        /// The expected object kind.
        expected: &'static str,
        /// The kind actually received.
        actual: &'static str,
    },

    /// The operation was interrupted by shutdown.
    #[error("canceled")]
    Canceled,

    /// Two desired checks collided on the same job name.
    #[error("duplicate check: {job}")]
    DuplicateCheck {
        /// The colliding job name.
        job: String,
        /// IDs of the objects the colliding checks were built from.
        objects: Vec<String>,
    },

    /// A check references a probe name the API does not know.
    #[error("check {job} references probe {probe} that doesn't exist")]
    UnknownProbe {
        /// Job name of the offending check.
        job: String,
        /// The unresolvable probe name.
        probe: String,
    },

    /// No annotated services were present in the snapshot.
    #[error("no services annotated for monitoring")]
    NoAnnotatedServices,

    /// A remote API call did not complete within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Reading the remote probe and check sets failed.
    #[error("fetching state from synthetic-monitoring API: {0}")]
    FetchState(#[source] Box<CoreError>),

    /// The generated check set is inconsistent.
    #[error("error in generated check set: {0}")]
    CheckSet(#[source] Box<CoreError>),

    /// A check mutation against the remote API failed.
    #[error("{op} check {job}[id={id}]: {source}")]
    CheckSync {
        /// The mutation that failed ("deleting", "updating", "creating").
        op: &'static str,
        /// Job name of the check.
        job: String,
        /// Remote ID of the check (zero for not-yet-created checks).
        id: i64,
        /// Underlying failure.
        source: Box<CoreError>,
    },

    /// Transport-level client failure.
    #[error(transparent)]
    Client(#[from] synthmon_client::ClientError),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
