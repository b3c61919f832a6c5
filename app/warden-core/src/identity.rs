//! Gateway identity: the cgroup spawned containers are confined to and the
//! hostname they may link back to.

use crate::config::IdentityConfig;
use crate::error::{CoreError, Result};
use std::path::Path;

const PROC_SELF_CGROUP: &str = "/proc/self/cgroup";

/// Immutable per-process identity of the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    cgroup_parent: String,
    hostname: String,
}

impl Identity {
    #[must_use]
    pub fn new(cgroup_parent: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            cgroup_parent: cgroup_parent.into(),
            hostname: hostname.into(),
        }
    }

    /// Builds the identity from configuration, detecting unset values.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the cgroup cannot be determined or
    /// the hostname cannot be read.
    pub fn detect(overrides: &IdentityConfig) -> Result<Self> {
        let cgroup_parent = if overrides.cgroup_parent.is_empty() {
            detect_cgroup(Path::new(PROC_SELF_CGROUP))?
        } else {
            overrides.cgroup_parent.clone()
        };

        let hostname = if overrides.hostname.is_empty() {
            hostname::get()?
                .into_string()
                .map_err(|_| CoreError::config("hostname is not valid UTF-8"))?
        } else {
            overrides.hostname.clone()
        };

        tracing::info!(cgroup_parent = %cgroup_parent, hostname = %hostname, "gateway identity");
        Ok(Self::new(cgroup_parent, hostname))
    }

    /// Cgroup path forced onto every container and build.
    #[must_use]
    pub fn cgroup_parent(&self) -> &str {
        &self.cgroup_parent
    }

    /// Hostname containers may link to.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

fn detect_cgroup(path: &Path) -> Result<String> {
    let contents = std::fs::read_to_string(path)?;
    parse_cgroup(&contents).ok_or_else(|| {
        CoreError::config(format!(
            "cannot determine gateway cgroup from {}; set identity.cgroup_parent",
            path.display()
        ))
    })
}

/// Extracts the gateway's cgroup from `/proc/self/cgroup` contents.
///
/// When the gateway runs inside an engine-managed container the result is
/// `/docker/<container id>`. Otherwise the unified (or first) hierarchy path
/// is used. The root cgroup is rejected: confining containers to it would
/// confine nothing.
#[must_use]
pub fn parse_cgroup(contents: &str) -> Option<String> {
    let paths: Vec<&str> = contents
        .lines()
        .filter_map(|line| line.splitn(3, ':').nth(2))
        .map(str::trim)
        .filter(|path| !path.is_empty() && *path != "/")
        .collect();

    for path in &paths {
        if let Some(id) = docker_container_id(path) {
            return Some(format!("/docker/{id}"));
        }
    }

    let unified = contents
        .lines()
        .find(|line| line.starts_with("0::"))
        .and_then(|line| line.get(3..))
        .map(str::trim)
        .filter(|path| !path.is_empty() && *path != "/");
    unified.or_else(|| paths.first().copied()).map(str::to_owned)
}

fn docker_container_id(path: &str) -> Option<&str> {
    path.split('/').find_map(|segment| {
        let id = segment
            .strip_prefix("docker-")
            .and_then(|s| s.strip_suffix(".scope"))
            .unwrap_or(segment);
        (id.len() == 64 && id.bytes().all(|b| b.is_ascii_hexdigit())).then_some(id)
    })
}
