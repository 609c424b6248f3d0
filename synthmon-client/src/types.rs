//! Wire types for the synthetic-monitoring API.
//!
//! Field names follow the API's JSON casing. All fields default, so partial
//! server responses still decode.

use serde::{Deserialize, Serialize};

/// A check as the API stores it.
///
/// `frequency` and `timeout` are milliseconds. `created` and `modified` are
/// server-side timestamps in fractional seconds; the server owns them and the
/// controller never sets them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Check {
    /// Server-assigned check ID. Zero for checks not yet created.
    pub id: i64,
    /// Tenant owning the check.
    pub tenant_id: i64,
    /// Unique job name of the check.
    pub job: String,
    /// Probe target.
    pub target: String,
    /// How often the check runs, in milliseconds.
    pub frequency: i64,
    /// Scheduling offset in milliseconds.
    pub offset: i64,
    /// Per-run timeout in milliseconds.
    pub timeout: i64,
    /// Whether the check is active.
    pub enabled: bool,
    /// Arbitrary labels attached to the check.
    pub labels: Vec<Label>,
    /// Protocol-specific settings.
    pub settings: CheckSettings,
    /// IDs of the probes running this check.
    pub probes: Vec<i64>,
    /// Restrict the check to basic metrics.
    pub basic_metrics_only: bool,
    /// Alerting sensitivity level.
    pub alert_sensitivity: String,
    /// Creation timestamp, seconds since epoch. Server-owned.
    pub created: f64,
    /// Last-modified timestamp, seconds since epoch. Server-owned.
    pub modified: f64,
}

/// A name/value label pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Label name.
    pub name: String,
    /// Label value.
    pub value: String,
}

impl Label {
    /// Create a new label.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Protocol settings for a check. Exactly one variant is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckSettings {
    /// TCP connect check settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpSettings>,
}

/// Settings for a TCP connect check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TcpSettings {
    /// IP protocol version used to reach the target.
    pub ip_version: IpVersion,
}

/// IP protocol version selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpVersion {
    /// Resolver's choice.
    #[default]
    Any,
    /// IPv4 only.
    V4,
    /// IPv6 only.
    V6,
}

/// A probe location registered with the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Probe {
    /// Server-assigned probe ID.
    pub id: i64,
    /// Probe name, unique per tenant.
    pub name: String,
    /// Whether the probe is shared across tenants.
    pub public: bool,
}
