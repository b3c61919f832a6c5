use super::Policy;
use crate::engine::Hijacked;
use crate::error::{CoreError, Result};
use crate::registry::ResourceKind;
use crate::types::{CreateResponse, ExecCreateRequest, ExecStartRequest, TtySize};
use serde_json::Value;

/// Outcome of starting an exec.
#[derive(Debug)]
pub enum ExecSession {
    /// Started in the background; nothing to relay.
    Detached,
    /// Attached; the session must be relayed to the caller.
    Attached(Hijacked),
}

impl Policy {
    /// Creates an exec in an owned container and records it.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not owned, the command is empty,
    /// or the engine call fails.
    pub async fn create_exec(
        &self,
        container: &str,
        request: &ExecCreateRequest,
    ) -> Result<CreateResponse> {
        let container = self.resolve(ResourceKind::Container, container)?;
        if request.cmd.is_empty() {
            return Err(CoreError::invalid("No exec command specified"));
        }
        let created = self.engine.exec_create(&container, request).await?;
        self.registry.record(ResourceKind::Exec, created.id.as_str());
        tracing::debug!(exec = %created.id, container = %container, "exec created");
        Ok(created)
    }

    /// # Errors
    ///
    /// Returns an error if the exec is not owned or the engine call fails.
    pub async fn start_exec(&self, id: &str, request: &ExecStartRequest) -> Result<ExecSession> {
        self.require(ResourceKind::Exec, id)?;
        if request.detach {
            self.engine.exec_start_detached(id, request).await?;
            return Ok(ExecSession::Detached);
        }
        Ok(ExecSession::Attached(
            self.engine.exec_attach(id, request).await?,
        ))
    }

    /// # Errors
    ///
    /// Returns an error if the exec is not owned or the engine call fails.
    pub async fn resize_exec(&self, id: &str, size: TtySize) -> Result<()> {
        self.require(ResourceKind::Exec, id)?;
        Ok(self.engine.exec_resize(id, size).await?)
    }

    /// # Errors
    ///
    /// Returns an error if the exec is not owned or the engine call fails.
    pub async fn inspect_exec(&self, id: &str) -> Result<Value> {
        self.require(ResourceKind::Exec, id)?;
        Ok(self.engine.exec_inspect(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::policy;
    use super::ExecSession;
    use crate::error::CoreError;
    use crate::types::{ExecCreateRequest, ExecStartRequest, TtySize};
    use serde_json::json;

    async fn owned_container(policy: &super::Policy) -> String {
        let request = serde_json::from_value(json!({"Image": "alpine"})).unwrap();
        policy.create_container(None, request, None).await.unwrap().id
    }

    fn exec(cmd: &[&str]) -> ExecCreateRequest {
        serde_json::from_value(json!({"Cmd": cmd, "AttachStdout": true})).unwrap()
    }

    #[tokio::test]
    async fn empty_command_is_a_client_error() {
        let (policy, engine) = policy();
        let container = owned_container(&policy).await;
        let err = policy.create_exec(&container, &exec(&[])).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
        assert_eq!(engine.call_count("exec_create"), 0);
    }

    #[tokio::test]
    async fn exec_in_foreign_container_is_denied() {
        let (policy, engine) = policy();
        engine.add_container("f0reign", "other");
        assert!(policy.create_exec("f0reign", &exec(&["sh"])).await.is_err());
        assert_eq!(engine.call_count("exec_create"), 0);
    }

    #[tokio::test]
    async fn exec_lifecycle_requires_ownership() {
        let (policy, engine) = policy();
        let container = owned_container(&policy).await;
        let created = policy.create_exec(&container, &exec(&["sh"])).await.unwrap();

        policy
            .resize_exec(&created.id, TtySize { height: 40, width: 120 })
            .await
            .unwrap();
        assert_eq!(policy.inspect_exec(&created.id).await.unwrap()["ID"], created.id.as_str());

        let detached = ExecStartRequest {
            detach: true,
            ..ExecStartRequest::default()
        };
        assert!(matches!(
            policy.start_exec(&created.id, &detached).await.unwrap(),
            ExecSession::Detached
        ));
        assert!(matches!(
            policy
                .start_exec(&created.id, &ExecStartRequest::default())
                .await
                .unwrap(),
            ExecSession::Attached(_)
        ));
        assert!(engine.take_peer().is_some());

        assert!(policy.inspect_exec("e-unknown").await.is_err());
        assert!(
            policy
                .start_exec("e-unknown", &ExecStartRequest::default())
                .await
                .is_err()
        );
    }
}
