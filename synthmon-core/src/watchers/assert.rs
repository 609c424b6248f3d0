//! Guard against a chain receiving the wrong object variant.

use super::Watcher;
use crate::error::{CoreError, Result};
use crate::schema::{Object, ObjectKind};
use async_trait::async_trait;

/// Fails with a descriptive error when the inner payload is not of the
/// expected kind.
pub struct TypeAssert {
    expected: ObjectKind,
}

impl TypeAssert {
    /// Assert that every object carries the given kind.
    pub fn new(expected: ObjectKind) -> Self {
        Self { expected }
    }

    fn check(&self, obj: &Object) -> Result<()> {
        let actual = obj.inner().kind();
        if actual != self.expected {
            return Err(CoreError::TypeAssert {
                expected: self.expected.as_str(),
                actual: actual.as_str(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Watcher for TypeAssert {
    async fn on_add(&self, obj: &mut Object) -> Result<()> {
        self.check(obj)
    }

    async fn on_update(&self, old_obj: &mut Object, new_obj: &mut Object) -> Result<()> {
        self.check(old_obj)?;
        self.check(new_obj)
    }

    async fn on_delete(&self, obj: &mut Object) -> Result<()> {
        self.check(obj)
    }
}
