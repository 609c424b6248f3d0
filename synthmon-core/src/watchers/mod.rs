//! Composable event handlers fed by the platform informer.
//!
//! A [`Watcher`] is a pure handler over typed [`Object`]s; it knows nothing
//! about the informer driving it. Handlers are composed with [`Chain`]:
//! the usual pipeline is type-assert, meta-set, filter, log, publish.

mod assert;
mod error;
mod filter;
mod logger;
mod publisher;

pub use assert::TypeAssert;
pub use error::{Action, ErrorHandler, PipelineError};
pub use filter::Filter;
pub use logger::Logger;
pub use publisher::{Event, Publisher};

use crate::error::Result;
use crate::schema::{Object, Resource};
use async_trait::async_trait;

/// A handler for typed object events.
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Handle an object appearing.
    async fn on_add(&self, obj: &mut Object) -> Result<()>;

    /// Handle an object changing.
    async fn on_update(&self, old_obj: &mut Object, new_obj: &mut Object) -> Result<()>;

    /// Handle an object disappearing.
    async fn on_delete(&self, obj: &mut Object) -> Result<()>;
}

/// Stamps the configured resource's group/version/kind onto every object.
/// Informers strip type information from the payloads they deliver.
pub struct ResourceMetaSetter(pub Resource);

#[async_trait]
impl Watcher for ResourceMetaSetter {
    async fn on_add(&self, obj: &mut Object) -> Result<()> {
        obj.set_group_version_kind(self.0.group_version_kind());
        Ok(())
    }

    async fn on_update(&self, old_obj: &mut Object, new_obj: &mut Object) -> Result<()> {
        old_obj.set_group_version_kind(self.0.group_version_kind());
        new_obj.set_group_version_kind(self.0.group_version_kind());
        Ok(())
    }

    async fn on_delete(&self, obj: &mut Object) -> Result<()> {
        obj.set_group_version_kind(self.0.group_version_kind());
        Ok(())
    }
}

/// Calls watchers in order; the first error short-circuits the chain and is
/// returned, on every path.
pub struct Chain(Vec<Box<dyn Watcher>>);

impl Chain {
    /// Compose watchers into a chain.
    pub fn new(watchers: Vec<Box<dyn Watcher>>) -> Self {
        Self(watchers)
    }
}

#[async_trait]
impl Watcher for Chain {
    async fn on_add(&self, obj: &mut Object) -> Result<()> {
        for watcher in &self.0 {
            watcher.on_add(obj).await?;
        }
        Ok(())
    }

    async fn on_update(&self, old_obj: &mut Object, new_obj: &mut Object) -> Result<()> {
        for watcher in &self.0 {
            watcher.on_update(old_obj, new_obj).await?;
        }
        Ok(())
    }

    async fn on_delete(&self, obj: &mut Object) -> Result<()> {
        for watcher in &self.0 {
            watcher.on_delete(obj).await?;
        }
        Ok(())
    }
}
