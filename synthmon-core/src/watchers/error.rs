//! Pipeline actions and the structured error reported at the informer
//! boundary.

use crate::error::CoreError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// What the pipeline was doing when an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// An object appeared.
    Add,
    /// An object changed.
    Update,
    /// An object disappeared.
    Delete,
    /// An incoming payload failed conversion; routed only to error handling.
    Cast,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Add => "add",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Cast => "cast",
        };
        f.write_str(name)
    }
}

/// A failure in the watcher pipeline, carrying enough context to diagnose
/// which step broke on which object.
#[derive(Debug, Error)]
#[error("watcher {action} failed for object {object}: {source}")]
pub struct PipelineError {
    /// The action being dispatched.
    pub action: Action,
    /// A description of the object involved.
    pub object: String,
    /// The watcher registration the failure happened under.
    pub watcher: String,
    /// The underlying failure.
    pub source: CoreError,
}

impl PipelineError {
    /// Whether this error only signals a filtered event.
    pub fn is_skip(&self) -> bool {
        matches!(self.source, CoreError::SkipEvent)
    }
}

/// Receives pipeline failures at the informer boundary.
pub type ErrorHandler = Arc<dyn Fn(&PipelineError) + Send + Sync>;
