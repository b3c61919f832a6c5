use super::Policy;
use crate::engine::Query;
use crate::error::{CoreError, EngineError, Result};
use crate::registry::ResourceKind;
use serde_json::Value;

impl Policy {
    /// Lists owned volumes.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine call fails.
    pub async fn list_volumes(&self, query: &Query) -> Result<Vec<Value>> {
        let volumes = self.engine.volume_list(query).await?;
        Ok(volumes
            .into_iter()
            .filter(|v| {
                v["Name"]
                    .as_str()
                    .is_some_and(|name| self.registry.contains(ResourceKind::Volume, name))
            })
            .collect())
    }

    /// Creates a volume and records it.
    ///
    /// The engine answers a create for an existing name with that volume,
    /// so a name already taken by a volume we do not own is refused.
    ///
    /// # Errors
    ///
    /// Returns an error if the name belongs to a foreign volume or the
    /// engine call fails.
    pub async fn create_volume(&self, request: &Value) -> Result<Value> {
        if !request.is_object() && !request.is_null() {
            return Err(CoreError::invalid("volume create body must be an object"));
        }
        if let Some(reason) = host_path_option(request) {
            tracing::warn!("denied: {reason}");
            return Err(CoreError::forbidden(reason));
        }
        if let Some(name) = request["Name"].as_str().filter(|n| !n.is_empty()) {
            if !self.registry.contains(ResourceKind::Volume, name) {
                match self.engine.volume_inspect(name).await {
                    Err(EngineError::NotFound(_)) => {}
                    Ok(_) => {
                        tracing::warn!(volume = name, "denied: volume name taken");
                        return Err(CoreError::forbidden(format!(
                            "volume {name} already exists"
                        )));
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        let volume = self.engine.volume_create(request).await?;
        let name = volume["Name"]
            .as_str()
            .ok_or_else(|| EngineError::Protocol("volume create returned no Name".to_string()))?;
        self.registry.record(ResourceKind::Volume, name);
        tracing::info!(volume = name, "volume created");
        Ok(volume)
    }

    /// Removes an owned volume and forgets it.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume is not owned or the engine call fails.
    pub async fn remove_volume(&self, name: &str, force: bool) -> Result<()> {
        self.require(ResourceKind::Volume, name)?;
        self.engine.volume_remove(name, force).await?;
        self.registry.forget(ResourceKind::Volume, name);
        Ok(())
    }
}

/// Driver options that would back the volume with a host path: a `device`
/// or a bind in the mount options.
fn host_path_option(request: &Value) -> Option<String> {
    let options = request.get("DriverOpts")?.as_object()?;
    if options.contains_key("device") {
        return Some("volume driver option device is not allowed".to_string());
    }
    let binds = options
        .get("o")
        .and_then(Value::as_str)
        .is_some_and(|o| o.split(',').any(|opt| opt.trim().ends_with("bind")));
    binds.then(|| "bind volume driver options are not allowed".to_string())
}
