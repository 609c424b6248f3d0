//! Identity and typing for the platform objects the controller watches.
//!
//! Watch payloads arrive untyped; [`Object::from_value`] decodes them into a
//! tagged [`InnerObject`] variant and wraps them with the canonical ID used
//! as the primary key everywhere downstream.

use crate::error::{CoreError, Result};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::fmt;
use std::sync::Arc;

/// Group, version and kind of a platform object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GroupVersionKind {
    /// API group; empty for the core group.
    pub group: String,
    /// API version.
    pub version: String,
    /// Object kind.
    pub kind: String,
}

/// A watchable resource: a [`GroupVersionKind`] plus the plural name the
/// platform's REST layer addresses it by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// API group; empty for the core group.
    pub group: String,
    /// API version.
    pub version: String,
    /// Object kind.
    pub kind: String,
    /// Plural resource name (what the platform API calls "resource").
    pub plural: String,
}

impl Resource {
    /// The `v1/Service` resource.
    pub fn services() -> Self {
        Self {
            group: String::new(),
            version: "v1".to_string(),
            kind: "Service".to_string(),
            plural: "services".to_string(),
        }
    }

    /// The `networking.k8s.io/v1/Ingress` resource.
    pub fn ingresses() -> Self {
        Self {
            group: "networking.k8s.io".to_string(),
            version: "v1".to_string(),
            kind: "Ingress".to_string(),
            plural: "ingresses".to_string(),
        }
    }

    /// The group/version/kind of this resource.
    pub fn group_version_kind(&self) -> GroupVersionKind {
        GroupVersionKind {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&gvk_string(&self.group, &self.version, &self.kind))
    }
}

/// The supported object kinds, used for dispatch and type assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// A `core/v1` Service.
    Service,
    /// A `networking.k8s.io/v1` Ingress.
    Ingress,
}

impl ObjectKind {
    /// The kind name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Service => "Service",
            ObjectKind::Ingress => "Ingress",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The typed payload of an [`Object`]. Adding a resource kind means a new
/// variant here, a snapshot bucket in the aggregator and a watcher
/// registration in the operator.
#[derive(Debug, Clone)]
pub enum InnerObject {
    /// A Service payload.
    Service(Arc<Service>),
    /// An Ingress payload.
    Ingress(Arc<Ingress>),
}

impl InnerObject {
    /// The kind tag of this payload.
    pub fn kind(&self) -> ObjectKind {
        match self {
            InnerObject::Service(_) => ObjectKind::Service,
            InnerObject::Ingress(_) => ObjectKind::Ingress,
        }
    }

    fn metadata(&self) -> &ObjectMeta {
        match self {
            InnerObject::Service(service) => &service.metadata,
            InnerObject::Ingress(ingress) => &ingress.metadata,
        }
    }
}

/// A platform object with its identity.
///
/// The group/version/kind is carried separately from the payload because
/// watch streams strip type information; the meta-setter watcher stamps the
/// configured resource's identity early in the pipeline.
#[derive(Debug, Clone)]
pub struct Object {
    gvk: GroupVersionKind,
    inner: InnerObject,
}

impl Object {
    /// Wrap a typed payload. The group/version/kind starts empty.
    pub fn new(inner: InnerObject) -> Self {
        Self {
            gvk: GroupVersionKind::default(),
            inner,
        }
    }

    /// Decode an untyped watch payload into an [`Object`].
    ///
    /// `resource` names the subscription the payload arrived on and selects
    /// the decode target. Payloads that are not objects, or whose kind the
    /// controller does not support, yield [`CoreError::UnexpectedObject`].
    pub fn from_value(resource: &Resource, value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(CoreError::UnexpectedObject);
        }

        // Type info is usually stripped from watch payloads; when present it
        // seeds the identity until the meta setter stamps the configured one.
        let gvk = gvk_from_payload(&value);

        let decode_err = |source| CoreError::Decode {
            kind: resource.kind.clone(),
            source,
        };
        let inner = match resource.kind.as_str() {
            "Service" => {
                InnerObject::Service(Arc::new(serde_json::from_value(value).map_err(decode_err)?))
            }
            "Ingress" => {
                InnerObject::Ingress(Arc::new(serde_json::from_value(value).map_err(decode_err)?))
            }
            _ => return Err(CoreError::UnexpectedObject),
        };

        Ok(Self { gvk, inner })
    }

    /// The canonical ID: `[group/]version/Kind:namespace/name`.
    pub fn id(&self) -> String {
        object_id(&self.gvk, self.namespace(), self.name())
    }

    /// Namespace of the object; empty for cluster-scoped objects.
    pub fn namespace(&self) -> &str {
        self.inner.metadata().namespace.as_deref().unwrap_or("")
    }

    /// Name of the object.
    pub fn name(&self) -> &str {
        self.inner.metadata().name.as_deref().unwrap_or("")
    }

    /// Look up an annotation by its full name.
    pub fn annotation(&self, name: &str) -> Option<&str> {
        self.inner
            .metadata()
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(name))
            .map(String::as_str)
    }

    /// The object's group/version/kind.
    pub fn group_version_kind(&self) -> &GroupVersionKind {
        &self.gvk
    }

    /// Stamp the object's group/version/kind.
    pub fn set_group_version_kind(&mut self, gvk: GroupVersionKind) {
        self.gvk = gvk;
    }

    /// The typed payload.
    pub fn inner(&self) -> &InnerObject {
        &self.inner
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Build the canonical object ID from its parts.
pub fn object_id(gvk: &GroupVersionKind, namespace: &str, name: &str) -> String {
    let mut id = gvk_string(&gvk.group, &gvk.version, &gvk.kind);
    id.push(':');
    id.push_str(namespace);
    id.push('/');
    id.push_str(name);
    id
}

fn gvk_string(group: &str, version: &str, kind: &str) -> String {
    let mut out = String::new();
    if !group.is_empty() {
        out.push_str(group);
        out.push('/');
    }
    if !version.is_empty() {
        out.push_str(version);
        out.push('/');
    }
    out.push_str(kind);
    out
}

/// Best-effort group/version/kind from a payload's own type fields.
fn gvk_from_payload(value: &serde_json::Value) -> GroupVersionKind {
    let api_version = value["apiVersion"].as_str().unwrap_or("");
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    };
    GroupVersionKind {
        group: group.to_string(),
        version: version.to_string(),
        kind: value["kind"].as_str().unwrap_or("").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn service_object_id() {
        let object = Object::from_value(
            &Resource::services(),
            json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {
                    "name": "my_service",
                    "namespace": "default",
                    "annotations": {"foo": "bar"}
                }
            }),
        )
        .unwrap();

        assert_eq!(object.id(), "v1/Service:default/my_service");
        assert_eq!(object.to_string(), "v1/Service:default/my_service");
        assert_eq!(object.annotation("foo"), Some("bar"));
        assert_eq!(object.inner().kind(), ObjectKind::Service);
    }

    #[test]
    fn ingress_object_id() {
        let object = Object::from_value(
            &Resource::ingresses(),
            json!({
                "apiVersion": "networking.k8s.io/v1",
                "kind": "Ingress",
                "metadata": {"name": "ingress1", "namespace": "ingress"}
            }),
        )
        .unwrap();

        assert_eq!(object.id(), "networking.k8s.io/v1/Ingress:ingress/ingress1");
        assert_eq!(object.inner().kind(), ObjectKind::Ingress);
    }

    #[test]
    fn stripped_type_info_is_stamped_later() {
        let mut object = Object::from_value(
            &Resource::services(),
            json!({
                "metadata": {"name": "svc", "namespace": "ns"}
            }),
        )
        .unwrap();

        // Without type info the ID has no kind prefix.
        assert_eq!(object.id(), ":ns/svc");

        object.set_group_version_kind(Resource::services().group_version_kind());
        assert_eq!(object.id(), "v1/Service:ns/svc");
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let err = Object::from_value(&Resource::services(), json!("not an object")).unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedObject));
    }

    #[test]
    fn unsupported_kind_is_rejected() {
        let pods = Resource {
            group: String::new(),
            version: "v1".to_string(),
            kind: "Pod".to_string(),
            plural: "pods".to_string(),
        };
        let err = Object::from_value(&pods, json!({"metadata": {"name": "p"}})).unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedObject));
    }

    #[test]
    fn resource_display() {
        assert_eq!(
            Resource::ingresses().to_string(),
            "networking.k8s.io/v1/Ingress"
        );
        assert_eq!(Resource::services().to_string(), "v1/Service");
    }
}
