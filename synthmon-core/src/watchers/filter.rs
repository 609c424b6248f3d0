//! Predicate-based event filtering.

use super::Watcher;
use crate::error::{CoreError, Result};
use crate::schema::Object;
use async_trait::async_trait;

/// Drops events whose object does not satisfy a predicate by returning the
/// [`CoreError::SkipEvent`] sentinel. On update, the event passes if either
/// the old or the new object matches, so transitions out of the watched set
/// are still observed.
pub struct Filter {
    predicate: Box<dyn Fn(&Object) -> bool + Send + Sync>,
}

impl Filter {
    /// Build a filter from a predicate.
    pub fn new(predicate: impl Fn(&Object) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
        }
    }

    fn matches(&self, obj: &Object) -> bool {
        (self.predicate)(obj)
    }
}

#[async_trait]
impl Watcher for Filter {
    async fn on_add(&self, obj: &mut Object) -> Result<()> {
        if !self.matches(obj) {
            return Err(CoreError::SkipEvent);
        }
        Ok(())
    }

    async fn on_update(&self, old_obj: &mut Object, new_obj: &mut Object) -> Result<()> {
        if !(self.matches(old_obj) || self.matches(new_obj)) {
            return Err(CoreError::SkipEvent);
        }
        Ok(())
    }

    async fn on_delete(&self, obj: &mut Object) -> Result<()> {
        if !self.matches(obj) {
            return Err(CoreError::SkipEvent);
        }
        Ok(())
    }
}
