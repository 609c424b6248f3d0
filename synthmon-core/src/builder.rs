//! Turns annotated Services into desired checks.
//!
//! Per-check options are derived by overlaying the service's annotations on
//! the controller defaults. A disabled or unannotated service produces
//! nothing; an enabled one produces a TCP check per (host, port) pair.

use crate::check::Check;
use crate::error::CoreError;
use crate::schema::{object_id, Resource};
use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::api::networking::v1::Ingress;
use std::collections::BTreeMap;
use std::sync::Arc;
use synthmon_client::{Check as RawCheck, CheckSettings, IpVersion, Label, TcpSettings};

/// Prefix shared by all annotations the controller interprets.
pub const ANNOTATIONS_PREFIX: &str = "synthetics.grafana.com/";
/// Opt-in flag; the value is parsed as a boolean.
pub const ENABLED_ANNOTATION: &str = "synthetics.grafana.com/enabled";
/// Explicit job name, overriding the synthesized one.
pub const NAME_ANNOTATION: &str = "synthetics.grafana.com/name";
/// Check frequency in milliseconds.
pub const FREQUENCY_ANNOTATION: &str = "synthetics.grafana.com/frequency";
/// Check timeout in milliseconds.
pub const TIMEOUT_ANNOTATION: &str = "synthetics.grafana.com/timeout";
/// Comma-separated probe names.
pub const PROBES_ANNOTATION: &str = "synthetics.grafana.com/probes";
/// Host override; replaces the service's external IPs.
pub const HOST_ANNOTATION: &str = "synthetics.grafana.com/host";

const DEFAULT_FREQUENCY_MS: i64 = 60_000;
const DEFAULT_TIMEOUT_MS: i64 = 3_000;
const DEFAULT_PROBES: [&str; 4] = ["Atlanta", "NewYork", "Paris", "Singapore"];

/// A per-object problem encountered while building checks. Warnings are
/// logged by the consolidator; they never fail a reconcile.
#[derive(Debug)]
pub struct Warning {
    /// What went wrong.
    pub cause: CoreError,
    /// IDs of the objects involved.
    pub objects: Vec<String>,
}

/// Configuration for how checks are built.
#[derive(Debug, Clone)]
pub struct Options {
    /// Cluster name used as the job prefix.
    pub cluster_name: String,
    /// Labels applied to every built check.
    pub labels: Vec<Label>,
    defaults: CheckOptions,
}

impl Options {
    /// Options with the controller defaults.
    pub fn new() -> Self {
        Self {
            cluster_name: "k8s".to_string(),
            labels: Vec::new(),
            defaults: CheckOptions {
                enabled: false,
                job_name: String::new(),
                frequency: DEFAULT_FREQUENCY_MS,
                timeout: DEFAULT_TIMEOUT_MS,
                labels: Vec::new(),
                probes: DEFAULT_PROBES.iter().map(|s| s.to_string()).collect(),
                host: String::new(),
            },
        }
    }

    /// Overlay a service's annotations on the defaults. Values that fail to
    /// parse leave the default untouched.
    fn check_options(&self, annotations: Option<&BTreeMap<String, String>>) -> CheckOptions {
        let mut opts = self.defaults.clone();
        opts.labels = self.labels.clone();

        let Some(annotations) = annotations else {
            return opts;
        };

        if let Some(enabled) = annotations
            .get(ENABLED_ANNOTATION)
            .and_then(|v| parse_bool(v))
        {
            opts.enabled = enabled;
        }
        if let Some(name) = annotations.get(NAME_ANNOTATION) {
            if !name.is_empty() {
                opts.job_name = name.clone();
            }
        }
        if let Some(frequency) = annotations
            .get(FREQUENCY_ANNOTATION)
            .and_then(|v| v.parse::<u32>().ok())
        {
            opts.frequency = i64::from(frequency);
        }
        if let Some(timeout) = annotations
            .get(TIMEOUT_ANNOTATION)
            .and_then(|v| v.parse::<u32>().ok())
        {
            opts.timeout = i64::from(timeout);
        }
        if let Some(probes) = annotations.get(PROBES_ANNOTATION) {
            let names: Vec<&str> = probes.split(',').collect();
            if names.first().is_some_and(|first| !first.is_empty()) {
                opts.probes = names.into_iter().map(str::to_string).collect();
            }
        }
        if let Some(host) = annotations.get(HOST_ANNOTATION) {
            opts.host = host.clone();
        }

        opts
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

/// Effective per-check options after the annotation overlay.
#[derive(Debug, Clone)]
struct CheckOptions {
    enabled: bool,
    job_name: String,
    frequency: i64,
    timeout: i64,
    labels: Vec<Label>,
    probes: Vec<String>,
    host: String,
}

impl CheckOptions {
    fn check_for_host_port(
        &self,
        svc: &Service,
        host: &str,
        port: &ServicePort,
        cluster_name: &str,
    ) -> Option<Check> {
        // The platform defaults an absent protocol to TCP.
        let protocol = port.protocol.as_deref().unwrap_or("TCP");
        let settings = match protocol {
            "TCP" => CheckSettings {
                tcp: Some(TcpSettings {
                    ip_version: IpVersion::V4,
                }),
            },
            // No probe-side support yet.
            "UDP" | "SCTP" => return None,
            _ => CheckSettings::default(),
        };

        let port_name = match port.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => port.port.to_string(),
        };

        let job = if self.job_name.is_empty() {
            format!(
                "{}_{}/{}_{}:{}/{}",
                cluster_name,
                svc.metadata.namespace.as_deref().unwrap_or(""),
                svc.metadata.name.as_deref().unwrap_or(""),
                host,
                port_name,
                protocol,
            )
        } else {
            self.job_name.clone()
        };

        let raw = RawCheck {
            job,
            enabled: true,
            frequency: self.frequency,
            timeout: self.timeout,
            labels: self.labels.clone(),
            settings,
            ..Default::default()
        };

        Some(Check::new(raw, self.probes.clone()).with_origin(service_id(svc)))
    }
}

/// Builds desired checks from annotated cluster objects.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    options: Options,
}

impl Builder {
    /// A builder with the given options.
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    /// Map annotated services to checks. Ingresses are accepted for future
    /// use and currently contribute nothing.
    pub fn build(
        &self,
        services: &[Arc<Service>],
        _ingresses: &[Arc<Ingress>],
    ) -> (Vec<Check>, Vec<Warning>) {
        let mut warnings = Vec::new();

        if services.is_empty() {
            warnings.push(Warning {
                cause: CoreError::NoAnnotatedServices,
                objects: Vec::new(),
            });
            return (Vec::new(), warnings);
        }

        let mut checks = Vec::new();
        for svc in services {
            checks.extend(self.service_checks(svc));
        }

        (checks, warnings)
    }

    fn service_checks(&self, svc: &Arc<Service>) -> Vec<Check> {
        let opts = self
            .options
            .check_options(svc.metadata.annotations.as_ref());
        if !opts.enabled {
            return Vec::new();
        }

        let spec = svc.spec.as_ref();

        let mut hosts: Vec<String> = Vec::new();
        if !opts.host.is_empty() {
            hosts.push(opts.host.clone());
        } else if let Some(ips) = spec.and_then(|s| s.external_ips.as_ref()) {
            hosts.extend(ips.iter().cloned());
        }

        let mut checks = Vec::new();
        if let Some(ports) = spec.and_then(|s| s.ports.as_ref()) {
            for host in &hosts {
                for port in ports {
                    if let Some(check) =
                        opts.check_for_host_port(svc, host, port, &self.options.cluster_name)
                    {
                        checks.push(check);
                    }
                }
            }
        }
        checks
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn service_id(svc: &Service) -> String {
    object_id(
        &Resource::services().group_version_kind(),
        svc.metadata.namespace.as_deref().unwrap_or(""),
        svc.metadata.name.as_deref().unwrap_or(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn service(
        name: &str,
        annotations: &[(&str, &str)],
        external_ips: &[&str],
        ports: Vec<ServicePort>,
    ) -> Arc<Service> {
        Arc::new(Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                external_ips: Some(external_ips.iter().map(|s| s.to_string()).collect()),
                ports: Some(ports),
                ..Default::default()
            }),
            status: None,
        })
    }

    fn tcp_port(name: &str, number: i32) -> ServicePort {
        ServicePort {
            name: (!name.is_empty()).then(|| name.to_string()),
            port: number,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn annotated_service_yields_default_check() {
        let builder = Builder::new(Options::new());
        let svc = service(
            "web",
            &[(ENABLED_ANNOTATION, "true")],
            &["10.0.0.1"],
            vec![tcp_port("http", 80)],
        );

        let (checks, warnings) = builder.build(&[svc], &[]);
        assert!(warnings.is_empty());
        assert_eq!(checks.len(), 1);

        let check = &checks[0];
        assert_eq!(check.job(), "k8s_default/web_10.0.0.1:http/TCP");
        assert_eq!(check.raw.frequency, 60000);
        assert_eq!(check.raw.timeout, 3000);
        assert!(check.raw.enabled);
        assert_eq!(
            check.probes,
            vec!["Atlanta", "NewYork", "Paris", "Singapore"]
        );
        assert_eq!(
            check.raw.settings.tcp,
            Some(TcpSettings {
                ip_version: IpVersion::V4
            })
        );
        assert_eq!(check.origin(), Some("v1/Service:default/web"));
    }

    #[test]
    fn unannotated_service_yields_nothing() {
        let builder = Builder::new(Options::new());
        let svc = service("web", &[], &["10.0.0.1"], vec![tcp_port("http", 80)]);

        let (checks, _) = builder.build(&[svc], &[]);
        assert!(checks.is_empty());
    }

    #[test]
    fn disabled_or_garbage_enabled_value_yields_nothing() {
        let builder = Builder::new(Options::new());
        for value in ["false", "0", "nope"] {
            let svc = service(
                "web",
                &[(ENABLED_ANNOTATION, value)],
                &["10.0.0.1"],
                vec![tcp_port("http", 80)],
            );
            let (checks, _) = builder.build(&[svc], &[]);
            assert!(checks.is_empty(), "value {:?} produced checks", value);
        }
    }

    #[test]
    fn annotations_override_defaults() {
        let builder = Builder::new(Options::new());
        let svc = service(
            "web",
            &[
                (ENABLED_ANNOTATION, "1"),
                (NAME_ANNOTATION, "custom-job"),
                (FREQUENCY_ANNOTATION, "30000"),
                (TIMEOUT_ANNOTATION, "5000"),
                (PROBES_ANNOTATION, "Paris,Singapore"),
            ],
            &["10.0.0.1"],
            vec![tcp_port("http", 80)],
        );

        let (checks, _) = builder.build(&[svc], &[]);
        assert_eq!(checks.len(), 1);

        let check = &checks[0];
        assert_eq!(check.job(), "custom-job");
        assert_eq!(check.raw.frequency, 30000);
        assert_eq!(check.raw.timeout, 5000);
        assert_eq!(check.probes, vec!["Paris", "Singapore"]);
    }

    #[test]
    fn invalid_numeric_annotations_keep_defaults() {
        let builder = Builder::new(Options::new());
        let svc = service(
            "web",
            &[
                (ENABLED_ANNOTATION, "true"),
                (FREQUENCY_ANNOTATION, "often"),
                (TIMEOUT_ANNOTATION, "-1"),
            ],
            &["10.0.0.1"],
            vec![tcp_port("http", 80)],
        );

        let (checks, _) = builder.build(&[svc], &[]);
        assert_eq!(checks[0].raw.frequency, 60000);
        assert_eq!(checks[0].raw.timeout, 3000);
    }

    #[test]
    fn host_annotation_replaces_external_ips() {
        let builder = Builder::new(Options::new());
        let svc = service(
            "web",
            &[
                (ENABLED_ANNOTATION, "true"),
                (HOST_ANNOTATION, "web.example.com"),
            ],
            &["10.0.0.1", "10.0.0.2"],
            vec![tcp_port("http", 80)],
        );

        let (checks, _) = builder.build(&[svc], &[]);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].job(), "k8s_default/web_web.example.com:http/TCP");
    }

    #[test]
    fn one_check_per_host_port_pair() {
        let builder = Builder::new(Options::new());
        let svc = service(
            "web",
            &[(ENABLED_ANNOTATION, "true")],
            &["10.0.0.1", "10.0.0.2"],
            vec![tcp_port("http", 80), tcp_port("https", 443)],
        );

        let (checks, _) = builder.build(&[svc], &[]);
        let jobs: Vec<&str> = checks.iter().map(|c| c.job()).collect();
        assert_eq!(
            jobs,
            vec![
                "k8s_default/web_10.0.0.1:http/TCP",
                "k8s_default/web_10.0.0.1:https/TCP",
                "k8s_default/web_10.0.0.2:http/TCP",
                "k8s_default/web_10.0.0.2:https/TCP",
            ]
        );
    }

    #[test]
    fn unnamed_port_uses_number() {
        let builder = Builder::new(Options::new());
        let svc = service(
            "web",
            &[(ENABLED_ANNOTATION, "true")],
            &["10.0.0.1"],
            vec![tcp_port("", 8080)],
        );

        let (checks, _) = builder.build(&[svc], &[]);
        assert_eq!(checks[0].job(), "k8s_default/web_10.0.0.1:8080/TCP");
    }

    #[test]
    fn udp_and_sctp_ports_are_skipped() {
        let builder = Builder::new(Options::new());
        let mut udp = tcp_port("dns", 53);
        udp.protocol = Some("UDP".to_string());
        let mut sctp = tcp_port("sig", 3868);
        sctp.protocol = Some("SCTP".to_string());

        let svc = service(
            "web",
            &[(ENABLED_ANNOTATION, "true")],
            &["10.0.0.1"],
            vec![udp, sctp, tcp_port("http", 80)],
        );

        let (checks, _) = builder.build(&[svc], &[]);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].job(), "k8s_default/web_10.0.0.1:http/TCP");
    }

    #[test]
    fn no_services_yields_warning() {
        let builder = Builder::new(Options::new());
        let (checks, warnings) = builder.build(&[], &[]);

        assert!(checks.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            warnings[0].cause,
            CoreError::NoAnnotatedServices
        ));
    }

    #[test]
    fn annotation_names_share_prefix() {
        for annotation in [
            ENABLED_ANNOTATION,
            NAME_ANNOTATION,
            FREQUENCY_ANNOTATION,
            TIMEOUT_ANNOTATION,
            PROBES_ANNOTATION,
            HOST_ANNOTATION,
        ] {
            assert!(annotation.starts_with(ANNOTATIONS_PREFIX));
        }
    }
}
