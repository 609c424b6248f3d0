//! Desired-state model for checks: normalized comparison, ownership
//! labelling and probe-name resolution on top of the API wire types.

use crate::error::{CoreError, Result};
use std::collections::HashMap;
use synthmon_client::{Check as RawCheck, Label, Probe};

/// Label marking a check as owned by this controller.
pub const MANAGED_LABEL: &str = "managed_by";
/// Value of the ownership label.
pub const MANAGED_VALUE: &str = "k8s-controller";

/// A check together with the probe *names* it should run on.
///
/// The raw payload carries probe IDs; names are resolved into
/// [`RawCheck::probes`] via [`Check::resolve_probe_ids`] once the remote
/// probe set is known.
#[derive(Debug, Clone)]
pub struct Check {
    /// The wire payload sent to and received from the API.
    pub raw: RawCheck,
    /// Probe names, case-insensitive. Overrides `raw.probes` on resolution.
    pub probes: Vec<String>,
    /// ID of the cluster object this check was built from, when known.
    origin: Option<String>,
}

impl Check {
    /// Create a desired check from a payload and probe names.
    pub fn new(raw: RawCheck, probes: Vec<String>) -> Self {
        Self {
            raw,
            probes,
            origin: None,
        }
    }

    /// Wrap a check fetched from the remote API.
    pub fn from_remote(raw: RawCheck) -> Self {
        Self {
            raw,
            probes: Vec::new(),
            origin: None,
        }
    }

    /// Record the cluster object this check was derived from.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// The cluster object this check was derived from, when known.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// The check's job name.
    pub fn job(&self) -> &str {
        &self.raw.job
    }

    /// Structural equality after normalization: server-owned fields (`id`,
    /// `tenant_id`, `created`, `modified`) are zeroed and probe IDs sorted.
    pub fn equals(&self, other: &Check) -> bool {
        normalized(&self.raw) == normalized(&other.raw)
    }

    /// Whether the check carries this controller's ownership label.
    pub fn is_managed(&self) -> bool {
        self.raw
            .labels
            .iter()
            .any(|label| label.name == MANAGED_LABEL && label.value == MANAGED_VALUE)
    }

    /// Append the ownership label if absent. Idempotent.
    pub fn mark_managed(&mut self) {
        if !self.is_managed() {
            self.raw
                .labels
                .push(Label::new(MANAGED_LABEL, MANAGED_VALUE));
        }
    }

    /// Replace the payload's probe IDs with the ones resolved from this
    /// check's probe names.
    pub fn resolve_probe_ids(&mut self, probes: &ProbeSet) -> Result<()> {
        let mut ids = Vec::with_capacity(self.probes.len());
        for name in &self.probes {
            let probe = probes.get(name).ok_or_else(|| CoreError::UnknownProbe {
                job: self.raw.job.clone(),
                probe: name.clone(),
            })?;
            ids.push(probe.id);
        }
        self.raw.probes = ids;
        Ok(())
    }
}

fn normalized(raw: &RawCheck) -> RawCheck {
    let mut check = raw.clone();
    check.id = 0;
    check.tenant_id = 0;
    check.created = 0.0;
    check.modified = 0.0;
    check.probes.sort_unstable();
    check
}

/// A set of checks keyed by job name.
#[derive(Debug, Default)]
pub struct CheckSet {
    checks: HashMap<String, Check>,
}

impl CheckSet {
    /// Build a set from desired checks. Fails if two checks collide on the
    /// same job name; the error carries the IDs of the offending objects.
    pub fn new(checks: Vec<Check>) -> Result<Self> {
        let mut map: HashMap<String, Check> = HashMap::with_capacity(checks.len());
        for check in checks {
            let job = check.raw.job.clone();
            if let Some(existing) = map.get(&job) {
                let objects = [existing.origin(), check.origin()]
                    .into_iter()
                    .flatten()
                    .map(str::to_string)
                    .collect();
                return Err(CoreError::DuplicateCheck { job, objects });
            }
            map.insert(job, check);
        }
        Ok(Self { checks: map })
    }

    /// Build a set from the remote API's check list. Later entries win on a
    /// job collision, matching how the API is keyed.
    pub fn from_remote(checks: Vec<RawCheck>) -> Self {
        let mut map = HashMap::with_capacity(checks.len());
        for raw in checks {
            map.insert(raw.job.clone(), Check::from_remote(raw));
        }
        Self { checks: map }
    }

    /// Set equality by job name and per-check normalized equality.
    pub fn equals(&self, other: &CheckSet) -> bool {
        if self.checks.len() != other.checks.len() {
            return false;
        }
        self.checks.iter().all(|(job, check)| {
            other
                .checks
                .get(job)
                .is_some_and(|remote| check.equals(remote))
        })
    }

    /// Look up a check by job name.
    pub fn get(&self, job: &str) -> Option<&Check> {
        self.checks.get(job)
    }

    /// Whether a job name is present.
    pub fn contains(&self, job: &str) -> bool {
        self.checks.contains_key(job)
    }

    /// Iterate over (job, check) pairs. Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Check)> {
        self.checks.iter()
    }

    /// Number of checks in the set.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

/// The remote probe roster, keyed case-insensitively by name.
#[derive(Debug, Default)]
pub struct ProbeSet {
    probes: HashMap<String, Probe>,
}

impl ProbeSet {
    /// Index a probe list by lowercased name.
    pub fn from_probes(probes: Vec<Probe>) -> Self {
        let probes = probes
            .into_iter()
            .map(|probe| (probe.name.to_lowercase(), probe))
            .collect();
        Self { probes }
    }

    /// Case-insensitive lookup by probe name.
    pub fn get(&self, name: &str) -> Option<&Probe> {
        self.probes.get(&name.to_lowercase())
    }

    /// Number of probes.
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}
