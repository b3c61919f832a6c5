//! Engine API payloads the policy layer needs to read or rewrite.
//!
//! Only the fields policy inspects are typed. Everything else is carried
//! through untouched in the flattened `extra` maps so the engine receives the
//! caller's request as sent, minus the rewritten fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `POST /containers/create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerCreateRequest {
    /// Image reference.
    #[serde(default)]
    pub image: String,
    /// Host configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_config: Option<HostConfig>,
    /// Untyped remainder of the request.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Host configuration fields subject to policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    /// Legacy `source:target[:mode]` binds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binds: Option<Vec<String>>,
    /// New-style mounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mounts: Option<Vec<Mount>>,
    /// `container[:mode]` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes_from: Option<Vec<String>>,
    /// `name[:alias]` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgroup_parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipc_mode: Option<String>,
    #[serde(rename = "UTSMode", default, skip_serializing_if = "Option::is_none")]
    pub uts_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userns_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap_add: Option<Vec<String>>,
    /// Untyped remainder.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of `HostConfig.Mounts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Mount {
    /// `bind`, `volume`, `tmpfs` or `npipe`.
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub mount_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Mount {
    /// True when the mount asks for a volume driver and its options, which
    /// would let the engine provision the volume from a host path.
    #[must_use]
    pub fn has_driver_config(&self) -> bool {
        self.extra
            .get("VolumeOptions")
            .and_then(|options| options.get("DriverConfig"))
            .is_some_and(|config| !config.is_null())
    }
}

/// Response of the create endpoints (`Id` plus `Warnings`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateResponse {
    /// Runtime ID.
    pub id: String,
    /// Engine warnings.
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "nullable_vec")]
    pub warnings: Vec<String>,
}

/// Body of `POST /containers/{id}/exec`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecCreateRequest {
    /// Command and arguments.
    #[serde(default, deserialize_with = "nullable_vec")]
    pub cmd: Vec<String>,
    /// Untyped remainder (`AttachStdin`, `Tty`, `Env`, `User`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of `POST /exec/{id}/start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecStartRequest {
    /// Run without attaching.
    #[serde(default)]
    pub detach: bool,
    /// Allocate a TTY.
    #[serde(default)]
    pub tty: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Terminal dimensions for resize calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TtySize {
    pub height: u32,
    pub width: u32,
}

/// Query options for container attach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachOptions {
    pub stream: bool,
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub logs: bool,
    pub detach_keys: Option<String>,
}

impl AttachOptions {
    /// Encodes the options as engine query pairs.
    #[must_use]
    pub fn to_query(&self) -> Vec<(String, String)> {
        let flag = |key: &str, on: bool| (key.to_string(), if on { "1" } else { "0" }.to_string());
        let mut query = vec![
            flag("stream", self.stream),
            flag("stdin", self.stdin),
            flag("stdout", self.stdout),
            flag("stderr", self.stderr),
            flag("logs", self.logs),
        ];
        if let Some(keys) = &self.detach_keys {
            query.push(("detachKeys".to_string(), keys.clone()));
        }
        query
    }
}

/// Query options for container delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Kill a running container first.
    pub force: bool,
    /// Remove anonymous volumes.
    pub volumes: bool,
    /// Remove the link rather than the container.
    pub link: bool,
}

/// Query options for build, passed through after policy rewriting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Raw query pairs in request order.
    pub params: Vec<(String, String)>,
}

impl BuildOptions {
    /// All values of `key`.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.params
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces every value of `key` with a single `value`.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.params.retain(|(k, _)| k != key);
        self.params.push((key.to_string(), value.into()));
    }
}

fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
