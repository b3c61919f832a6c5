use super::Policy;
use crate::engine::{Hijacked, Query};
use crate::error::{CoreError, EngineError, Result};
use crate::registry::ResourceKind;
use crate::types::{
    AttachOptions, ContainerCreateRequest, CreateResponse, HostConfig, RemoveOptions, TtySize,
};
use serde_json::Value;

/// `HostConfig` fields carried through to the engine besides the typed ones.
/// Anything else the caller sends is dropped.
const HOST_CONFIG_PASSTHROUGH: &[&str] = &[
    "AutoRemove",
    "CapDrop",
    "ConsoleSize",
    "CpuPeriod",
    "CpuQuota",
    "CpuShares",
    "CpusetCpus",
    "Dns",
    "DnsOptions",
    "DnsSearch",
    "ExtraHosts",
    "GroupAdd",
    "Init",
    "Memory",
    "MemoryReservation",
    "MemorySwap",
    "NanoCpus",
    "PidsLimit",
    "PortBindings",
    "PublishAllPorts",
    "ReadonlyRootfs",
    "RestartPolicy",
    "ShmSize",
    "Tmpfs",
    "Ulimits",
];

impl Policy {
    /// Lists owned containers.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine call fails.
    pub async fn list_containers(&self, query: &Query) -> Result<Vec<Value>> {
        let containers = self.engine.container_list(query).await?;
        Ok(containers
            .into_iter()
            .filter(|c| {
                c["Id"]
                    .as_str()
                    .is_some_and(|id| self.registry.contains(ResourceKind::Container, id))
            })
            .collect())
    }

    /// Inspects an owned container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not owned or the engine call fails.
    pub async fn inspect_container(&self, id: &str) -> Result<Value> {
        let id = self.resolve(ResourceKind::Container, id)?;
        Ok(self.engine.container_inspect(&id).await?)
    }

    /// Validates, rewrites and creates a container.
    ///
    /// Host access (bind mounts, host namespaces, devices, privileged mode)
    /// is refused or stripped, references to other containers must be owned,
    /// and the cgroup parent is pinned to the gateway's own. An image that is
    /// not owned yet is pulled with the caller's credentials first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request breaks a sandbox rule, references
    /// something not owned, the image cannot be pulled, or the engine
    /// rejects the create.
    pub async fn create_container(
        &self,
        name: Option<&str>,
        mut request: ContainerCreateRequest,
        auth: Option<&str>,
    ) -> Result<CreateResponse> {
        if request.image.is_empty() {
            return Err(CoreError::invalid("image is required"));
        }

        let mut host = request.host_config.take().unwrap_or_default();
        let named_volumes = self.sanitize_host_config(&mut host)?;
        for volume in &named_volumes {
            self.ensure_volume_usable(volume).await?;
        }
        request.host_config = Some(host);

        // The engine resolves names before short ids, so run exactly the
        // image ownership was checked against.
        let image_id = self.ensure_image(&request.image, auth).await?;
        let requested = std::mem::replace(&mut request.image, image_id);

        let name = name.filter(|n| !n.is_empty());
        let created = self.engine.container_create(name, &request).await?;
        self.registry
            .record(ResourceKind::Container, created.id.as_str());
        if let Some(name) = name {
            self.registry.record_alias(
                ResourceKind::Container,
                name.trim_start_matches('/'),
                created.id.as_str(),
            );
        }
        self.record_container_volumes(&created.id).await;

        tracing::info!(id = %created.id, image = %requested, "container created");
        Ok(created)
    }

    /// Applies the sandbox rules to `host` in place and returns the named
    /// volumes it references.
    fn sanitize_host_config(&self, host: &mut HostConfig) -> Result<Vec<String>> {
        let mut named_volumes = Vec::new();

        for bind in host.binds.iter().flatten() {
            let source = bind.split(':').next().unwrap_or_default();
            if source.is_empty() || source.starts_with('/') || source.starts_with('.') {
                return Err(self.deny(format!("bind mount of host path {source} is not allowed")));
            }
            named_volumes.push(source.to_string());
        }

        for mount in host.mounts.iter().flatten() {
            match mount.mount_type.as_deref().unwrap_or("volume") {
                "volume" => {
                    if mount.has_driver_config() {
                        return Err(self.deny("volume driver configuration is not allowed"));
                    }
                    if let Some(source) = mount.source.as_deref().filter(|s| !s.is_empty()) {
                        named_volumes.push(source.to_string());
                    }
                }
                "tmpfs" => {}
                other => {
                    return Err(self.deny(format!("mounts of type {other} are not allowed")));
                }
            }
        }

        for (field, mode) in [
            ("PidMode", &mut host.pid_mode),
            ("IpcMode", &mut host.ipc_mode),
            ("NetworkMode", &mut host.network_mode),
        ] {
            self.check_namespace_mode(field, mode)?;
        }
        for (field, mode) in [("UTSMode", &host.uts_mode), ("UsernsMode", &host.userns_mode)] {
            if mode.as_deref() == Some("host") {
                return Err(self.deny(format!("{field}=host is not allowed")));
            }
        }

        if host.devices.as_ref().is_some_and(|d| !d.is_empty()) {
            return Err(self.deny("device mappings are not allowed"));
        }

        if let Some(volumes_from) = host.volumes_from.as_mut() {
            for entry in volumes_from.iter_mut() {
                let (source, mode) = match entry.split_once(':') {
                    Some((source, mode)) => (source, Some(mode)),
                    None => (entry.as_str(), None),
                };
                let id = self.resolve(ResourceKind::Container, source)?;
                *entry = mode.map_or_else(|| id.clone(), |mode| format!("{id}:{mode}"));
            }
        }

        for link in host.links.iter().flatten() {
            let target = link.split(':').next().unwrap_or_default();
            let target = target.trim_start_matches('/');
            if target == self.identity.hostname() {
                continue;
            }
            self.resolve(ResourceKind::Container, target)?;
        }

        let before = host.extra.len();
        host.extra
            .retain(|field, _| HOST_CONFIG_PASSTHROUGH.contains(&field.as_str()));
        if host.extra.len() < before {
            tracing::debug!(dropped = before - host.extra.len(), "dropping host config fields");
        }

        host.cgroup_parent = Some(self.identity.cgroup_parent().to_string());
        host.privileged = Some(false);
        if host.cap_add.take().is_some_and(|caps| !caps.is_empty()) {
            tracing::debug!("dropping requested capabilities");
        }

        Ok(named_volumes)
    }

    /// `host` is refused; `container:<ref>` must name an owned container and
    /// is rewritten to its full id.
    fn check_namespace_mode(&self, field: &str, mode: &mut Option<String>) -> Result<()> {
        let Some(value) = mode.as_deref() else {
            return Ok(());
        };
        if value == "host" {
            return Err(self.deny(format!("{field}=host is not allowed")));
        }
        if let Some(target) = value.strip_prefix("container:") {
            let id = self.resolve(ResourceKind::Container, target)?;
            *mode = Some(format!("container:{id}"));
        }
        Ok(())
    }

    fn deny(&self, reason: impl Into<String>) -> CoreError {
        let reason = reason.into();
        tracing::warn!("denied: {reason}");
        CoreError::forbidden(reason)
    }

    /// A named volume may be used if it is owned or does not exist yet.
    async fn ensure_volume_usable(&self, name: &str) -> Result<()> {
        if self.registry.contains(ResourceKind::Volume, name) {
            return Ok(());
        }
        match self.engine.volume_inspect(name).await {
            Err(EngineError::NotFound(_)) => Ok(()),
            Ok(_) => Err(self.deny(format!("volume {name} is not owned"))),
            Err(err) => Err(err.into()),
        }
    }

    async fn record_container_volumes(&self, id: &str) {
        let inspect = match self.engine.container_inspect(id).await {
            Ok(inspect) => inspect,
            Err(err) => {
                tracing::warn!(id, "failed to inspect new container: {err}");
                return;
            }
        };
        for mount in inspect["Mounts"].as_array().into_iter().flatten() {
            if mount["Type"] != "volume" {
                continue;
            }
            if let Some(name) = mount["Name"].as_str() {
                self.registry.record(ResourceKind::Volume, name);
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if the container is not owned or the engine call fails.
    pub async fn start_container(&self, id: &str) -> Result<()> {
        let id = self.resolve(ResourceKind::Container, id)?;
        Ok(self.engine.container_start(&id).await?)
    }

    /// # Errors
    ///
    /// Returns an error if the container is not owned or the engine call fails.
    pub async fn stop_container(&self, id: &str, timeout: Option<u64>) -> Result<()> {
        let id = self.resolve(ResourceKind::Container, id)?;
        Ok(self.engine.container_stop(&id, timeout).await?)
    }

    /// # Errors
    ///
    /// Returns an error if the container is not owned or the engine call fails.
    pub async fn kill_container(&self, id: &str, signal: Option<&str>) -> Result<()> {
        let id = self.resolve(ResourceKind::Container, id)?;
        Ok(self.engine.container_kill(&id, signal).await?)
    }

    /// # Errors
    ///
    /// Returns an error if the container is not owned or the engine call fails.
    pub async fn resize_container(&self, id: &str, size: TtySize) -> Result<()> {
        let id = self.resolve(ResourceKind::Container, id)?;
        Ok(self.engine.container_resize(&id, size).await?)
    }

    /// Removes an owned container and forgets it with all its names.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not owned or the engine call fails.
    pub async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<()> {
        let id = self.resolve(ResourceKind::Container, id)?;
        self.engine.container_remove(&id, options).await?;
        self.registry.forget(ResourceKind::Container, &id);
        tracing::info!(id = %id, "container removed");
        Ok(())
    }

    /// Opens an attach session on an owned container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not owned or the engine refuses.
    pub async fn attach_container(&self, id: &str, options: &AttachOptions) -> Result<Hijacked> {
        let id = self.resolve(ResourceKind::Container, id)?;
        Ok(self.engine.container_attach(&id, options).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{SELF_CGROUP, SELF_HOST, policy};
    use crate::error::CoreError;
    use crate::registry::{RegistryError, ResourceKind};
    use crate::types::{ContainerCreateRequest, RemoveOptions};
    use serde_json::json;

    fn request(body: serde_json::Value) -> ContainerCreateRequest {
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn absolute_bind_is_rejected_before_engine() {
        let (policy, engine) = policy();
        for _ in 0..2 {
            let err = policy
                .create_container(
                    None,
                    request(json!({"Image": "alpine", "HostConfig": {"Binds": ["/etc:/host-etc"]}})),
                    None,
                )
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::Forbidden(_)));
        }
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn bind_mount_type_is_rejected() {
        let (policy, engine) = policy();
        let err = policy
            .create_container(
                None,
                request(json!({
                    "Image": "alpine",
                    "HostConfig": {"Mounts": [{"Type": "bind", "Source": "/", "Target": "/host"}]}
                })),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn volume_mount_with_driver_config_is_rejected() {
        let (policy, engine) = policy();
        let err = policy
            .create_container(
                None,
                request(json!({
                    "Image": "alpine",
                    "HostConfig": {"Mounts": [{
                        "Type": "volume",
                        "Source": "hostroot",
                        "Target": "/host",
                        "VolumeOptions": {"DriverConfig": {
                            "Name": "local",
                            "Options": {"type": "none", "o": "bind", "device": "/"}
                        }}
                    }]}
                })),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn unlisted_host_config_fields_are_dropped() {
        let (policy, engine) = policy();
        policy
            .create_container(
                None,
                request(json!({
                    "Image": "alpine",
                    "HostConfig": {
                        "AutoRemove": true,
                        "Memory": 268_435_456,
                        "SecurityOpt": ["seccomp=unconfined", "apparmor=unconfined"],
                        "CgroupnsMode": "host",
                        "Cgroup": "container:someone-else",
                        "Sysctls": {"kernel.shm_rmid_forced": "1"},
                        "DeviceCgroupRules": ["c 1:3 mr"],
                        "DeviceRequests": [{"Count": -1, "Capabilities": [["gpu"]]}],
                        "VolumeDriver": "local"
                    }
                })),
                None,
            )
            .await
            .unwrap();

        let host = engine.creates().pop().unwrap().host_config.unwrap();
        let mut kept: Vec<_> = host.extra.keys().cloned().collect();
        kept.sort();
        assert_eq!(kept, ["AutoRemove", "Memory"]);
        assert_eq!(host.cgroup_parent.as_deref(), Some(SELF_CGROUP));
    }

    #[tokio::test]
    async fn create_runs_the_owned_image_not_a_lookalike_name() {
        let (policy, engine) = policy();
        policy
            .create_container(None, request(json!({"Image": "alpine"})), None)
            .await
            .unwrap();
        let owned = crate::policy::image_owned(policy.registry(), "alpine").unwrap();
        // A foreign tag named like a prefix of the owned id.
        let short = owned.trim_start_matches("sha256:")[..4].to_string();
        engine.add_image("sha256:f0reign", &[format!("{short}:latest").as_str()]);

        policy
            .create_container(None, request(json!({"Image": short})), None)
            .await
            .unwrap();
        assert_eq!(engine.creates().pop().unwrap().image, owned);
        assert_eq!(engine.call_count("image_pull"), 1);
    }

    #[tokio::test]
    async fn host_namespaces_and_devices_are_rejected() {
        let (policy, _) = policy();
        for host_config in [
            json!({"PidMode": "host"}),
            json!({"NetworkMode": "host"}),
            json!({"UTSMode": "host"}),
            json!({"UsernsMode": "host"}),
            json!({"Devices": [{"PathOnHost": "/dev/kvm"}]}),
            json!({"IpcMode": "container:someone-else"}),
        ] {
            let result = policy
                .create_container(
                    None,
                    request(json!({"Image": "alpine", "HostConfig": host_config})),
                    None,
                )
                .await;
            assert!(result.is_err(), "{host_config} was accepted");
        }
    }

    #[tokio::test]
    async fn create_pins_cgroup_and_records_names_and_volumes() {
        let (policy, engine) = policy();
        let created = policy
            .create_container(
                Some("web"),
                request(json!({
                    "Image": "alpine",
                    "Cmd": ["sleep", "1d"],
                    "HostConfig": {
                        "Binds": ["cache:/cache"],
                        "Privileged": true,
                        "CgroupParent": "/",
                        "CapAdd": ["SYS_ADMIN"]
                    }
                })),
                Some("creds"),
            )
            .await
            .unwrap();

        let sent = engine.creates().pop().unwrap();
        let host = sent.host_config.unwrap();
        assert_eq!(host.cgroup_parent.as_deref(), Some(SELF_CGROUP));
        assert_eq!(host.privileged, Some(false));
        assert!(host.cap_add.is_none());
        assert_eq!(sent.extra["Cmd"], json!(["sleep", "1d"]));

        let registry = policy.registry();
        assert!(registry.contains(ResourceKind::Container, &created.id));
        assert_eq!(
            registry.resolve(ResourceKind::Container, "web").unwrap(),
            created.id
        );
        assert!(registry.contains(ResourceKind::Volume, "cache"));
        assert!(engine.calls().contains(&"image_pull alpine auth=creds".to_string()));
    }

    #[tokio::test]
    async fn foreign_volume_is_rejected() {
        let (policy, engine) = policy();
        engine.add_volume("secrets");
        let err = policy
            .create_container(
                None,
                request(json!({"Image": "alpine", "HostConfig": {"Binds": ["secrets:/s"]}})),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
        assert_eq!(engine.call_count("container_create"), 0);
    }

    #[tokio::test]
    async fn volumes_from_and_links_must_be_owned() {
        let (policy, engine) = policy();
        engine.add_container("f0reign", "db");

        let err = policy
            .create_container(
                None,
                request(json!({"Image": "alpine", "HostConfig": {"VolumesFrom": ["db"]}})),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Registry(RegistryError::NotFound { .. })
        ));

        let err = policy
            .create_container(
                None,
                request(json!({"Image": "alpine", "HostConfig": {"Links": ["db:database"]}})),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Registry(_)));

        // Linking to the gateway itself is allowed.
        policy
            .create_container(
                None,
                request(json!({
                    "Image": "alpine",
                    "HostConfig": {"Links": [format!("{SELF_HOST}:gw")]}
                })),
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn volumes_from_is_rewritten_to_full_id() {
        let (policy, engine) = policy();
        let first = policy
            .create_container(Some("data"), request(json!({"Image": "alpine"})), None)
            .await
            .unwrap();
        policy
            .create_container(
                None,
                request(json!({"Image": "alpine", "HostConfig": {"VolumesFrom": ["data:ro"]}})),
                None,
            )
            .await
            .unwrap();

        let sent = engine.creates().pop().unwrap();
        assert_eq!(
            sent.host_config.unwrap().volumes_from.unwrap(),
            vec![format!("{}:ro", first.id)]
        );
    }

    #[tokio::test]
    async fn never_created_container_is_unauthorized() {
        let (policy, engine) = policy();
        engine.add_container("abc123", "other");

        assert!(policy.inspect_container("abc123").await.is_err());
        assert!(policy.stop_container("abc123", None).await.is_err());
        assert!(
            policy
                .remove_container("abc123", RemoveOptions::default())
                .await
                .is_err()
        );
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn remove_forgets_id_and_name() {
        let (policy, _) = policy();
        let created = policy
            .create_container(Some("web"), request(json!({"Image": "alpine"})), None)
            .await
            .unwrap();
        policy
            .remove_container("web", RemoveOptions::default())
            .await
            .unwrap();

        let registry = policy.registry();
        assert!(!registry.contains(ResourceKind::Container, &created.id));
        assert!(!registry.contains(ResourceKind::Container, "web"));
    }

    #[tokio::test]
    async fn list_filters_foreign_containers() {
        let (policy, engine) = policy();
        engine.add_container("f0reign", "other");
        let created = policy
            .create_container(None, request(json!({"Image": "alpine"})), None)
            .await
            .unwrap();

        let listed = policy.list_containers(&[]).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["Id"], created.id.as_str());
    }

    #[tokio::test]
    async fn short_id_resolves_for_lifecycle_calls() {
        let (policy, engine) = policy();
        let created = policy
            .create_container(None, request(json!({"Image": "alpine"})), None)
            .await
            .unwrap();
        policy.start_container(&created.id[..8]).await.unwrap();
        assert!(
            engine
                .calls()
                .contains(&format!("container_start {}", created.id))
        );
    }
}
