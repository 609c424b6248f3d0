//! Event logging step.

use super::Watcher;
use crate::error::Result;
use crate::schema::Object;
use async_trait::async_trait;
use tracing::Level;

/// Records every event at a fixed level and always succeeds.
pub struct Logger {
    level: Level,
}

impl Logger {
    /// Log events at the given level.
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    fn log(&self, action: &str, obj: &Object) {
        match self.level {
            Level::TRACE => tracing::trace!(obj = %obj.id(), action),
            Level::DEBUG => tracing::debug!(obj = %obj.id(), action),
            Level::INFO => tracing::info!(obj = %obj.id(), action),
            Level::WARN => tracing::warn!(obj = %obj.id(), action),
            Level::ERROR => tracing::error!(obj = %obj.id(), action),
        }
    }

    fn log_update(&self, old_obj: &Object, new_obj: &Object) {
        match self.level {
            Level::TRACE => tracing::trace!(old = %old_obj.id(), new = %new_obj.id(), "update"),
            Level::DEBUG => tracing::debug!(old = %old_obj.id(), new = %new_obj.id(), "update"),
            Level::INFO => tracing::info!(old = %old_obj.id(), new = %new_obj.id(), "update"),
            Level::WARN => tracing::warn!(old = %old_obj.id(), new = %new_obj.id(), "update"),
            Level::ERROR => tracing::error!(old = %old_obj.id(), new = %new_obj.id(), "update"),
        }
    }
}

#[async_trait]
impl Watcher for Logger {
    async fn on_add(&self, obj: &mut Object) -> Result<()> {
        self.log("add", obj);
        Ok(())
    }

    async fn on_update(&self, old_obj: &mut Object, new_obj: &mut Object) -> Result<()> {
        self.log_update(old_obj, new_obj);
        Ok(())
    }

    async fn on_delete(&self, obj: &mut Object) -> Result<()> {
        self.log("delete", obj);
        Ok(())
    }
}
