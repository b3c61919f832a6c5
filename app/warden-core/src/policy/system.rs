use super::{Policy, image_owned};
use crate::engine::{ByteStream, Query};
use crate::error::Result;
use crate::jsonstream::filter_lines;
use crate::registry::{Registry, ResourceKind};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Engine `info` fields passed through to callers.
const INFO_FIELDS: &[&str] = &[
    "ID",
    "ServerVersion",
    "Architecture",
    "OSType",
    "IndexServerAddress",
];

impl Policy {
    /// # Errors
    ///
    /// Returns an error if the engine does not answer.
    pub async fn ping(&self) -> Result<()> {
        Ok(self.engine.ping().await?)
    }

    /// # Errors
    ///
    /// Returns an error if the engine call fails.
    pub async fn version(&self) -> Result<Value> {
        Ok(self.engine.version().await?)
    }

    /// Minimal system info: engine identity fields plus owned counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine call fails.
    pub async fn info(&self) -> Result<Value> {
        let engine_info = self.engine.info().await?;
        let mut info = Map::new();
        for field in INFO_FIELDS {
            if let Some(value) = engine_info.get(*field) {
                info.insert((*field).to_string(), value.clone());
            }
        }
        info.insert(
            "Containers".to_string(),
            self.registry.count(ResourceKind::Container).into(),
        );
        info.insert(
            "Images".to_string(),
            self.registry.count(ResourceKind::Image).into(),
        );
        Ok(Value::Object(info))
    }

    /// Engine events concerning owned resources only.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine refuses the subscription.
    pub async fn events(&self, query: &Query) -> Result<ByteStream> {
        let upstream = self.engine.events(query).await?;
        let registry = Arc::clone(&self.registry);
        Ok(filter_lines(upstream, move |event| {
            event_is_owned(&registry, event)
        }))
    }
}

fn event_is_owned(registry: &Registry, event: &Value) -> bool {
    let actor = event
        .pointer("/Actor/ID")
        .or_else(|| event.get("id"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if actor.is_empty() {
        return false;
    }
    match event["Type"].as_str().unwrap_or("container") {
        "container" => registry.contains(ResourceKind::Container, actor),
        "image" => {
            image_owned(registry, actor).is_some()
                || event
                    .pointer("/Actor/Attributes/name")
                    .and_then(Value::as_str)
                    .is_some_and(|name| image_owned(registry, name).is_some())
        }
        "volume" => registry.contains(ResourceKind::Volume, actor),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::policy;
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn info_is_minimal_and_counts_owned() {
        let (policy, _) = policy();
        policy.registry().record(ResourceKind::Container, "c1");
        policy.registry().record(ResourceKind::Container, "c2");

        let info = policy.info().await.unwrap();
        assert_eq!(info["Containers"], 2);
        assert_eq!(info["Images"], 0);
        assert_eq!(info["ServerVersion"], "24.0.7");
        assert!(info.get("Name").is_none());
        assert!(info.get("DockerRootDir").is_none());
    }

    #[tokio::test]
    async fn events_are_filtered_by_ownership() {
        let (policy, engine) = policy();
        policy.registry().record(ResourceKind::Container, "mine");
        policy.registry().record(ResourceKind::Volume, "data");
        engine.push_event(json!({"Type": "container", "Action": "start", "Actor": {"ID": "mine"}}));
        engine.push_event(json!({"Type": "container", "Action": "start", "Actor": {"ID": "theirs"}}));
        engine.push_event(json!({"Type": "volume", "Action": "create", "Actor": {"ID": "data"}}));
        engine.push_event(json!({"Type": "network", "Action": "connect", "Actor": {"ID": "bridge"}}));

        let stream = policy.events(&[]).await.unwrap();
        let body: Vec<u8> = stream
            .map(|chunk| chunk.unwrap().to_vec())
            .concat()
            .await;
        let events: Vec<Value> = String::from_utf8(body)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["Actor"]["ID"], "mine");
        assert_eq!(events[1]["Actor"]["ID"], "data");
    }
}
