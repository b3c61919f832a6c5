//! Container engine abstraction.
//!
//! The policy layer never talks HTTP. It calls this narrow trait, which the
//! HTTP surface crate implements against a real engine socket and tests
//! replace with an in-memory double.

use crate::error::EngineResult;
use crate::types::{
    AttachOptions, BuildOptions, ContainerCreateRequest, CreateResponse, ExecCreateRequest,
    ExecStartRequest, RemoveOptions, TtySize,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Shared engine trait object.
pub type DynEngine = Arc<dyn Engine>;

/// Chunked response body (progress messages, events).
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Query string pairs forwarded to the engine.
pub type Query = [(String, String)];

/// Bidirectional byte channel obtained by hijacking an engine connection.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> RawStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A hijacked engine session for attach or exec start.
pub struct Hijacked {
    /// Raw duplex channel to the engine.
    pub stream: Box<dyn RawStream>,
    /// Content type the engine announced on upgrade, if any.
    pub content_type: Option<String>,
}

impl std::fmt::Debug for Hijacked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hijacked")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Engine operations consumed by the gateway.
///
/// Identifiers passed in are always already resolved by policy.
#[async_trait]
pub trait Engine: Send + Sync {
    // System

    /// Liveness probe.
    async fn ping(&self) -> EngineResult<()>;

    /// `GET /version` document.
    async fn version(&self) -> EngineResult<Value>;

    /// `GET /info` document.
    async fn info(&self) -> EngineResult<Value>;

    /// Newline-delimited JSON event stream.
    async fn events(&self, query: &Query) -> EngineResult<ByteStream>;

    // Containers

    async fn container_list(&self, query: &Query) -> EngineResult<Vec<Value>>;

    async fn container_inspect(&self, id: &str) -> EngineResult<Value>;

    async fn container_create(
        &self,
        name: Option<&str>,
        request: &ContainerCreateRequest,
    ) -> EngineResult<CreateResponse>;

    async fn container_start(&self, id: &str) -> EngineResult<()>;

    /// Stops a container, letting the engine wait `timeout` seconds before
    /// killing it.
    async fn container_stop(&self, id: &str, timeout: Option<u64>) -> EngineResult<()>;

    async fn container_kill(&self, id: &str, signal: Option<&str>) -> EngineResult<()>;

    async fn container_resize(&self, id: &str, size: TtySize) -> EngineResult<()>;

    async fn container_remove(&self, id: &str, options: RemoveOptions) -> EngineResult<()>;

    async fn container_attach(&self, id: &str, options: &AttachOptions) -> EngineResult<Hijacked>;

    // Exec

    async fn exec_create(
        &self,
        container: &str,
        request: &ExecCreateRequest,
    ) -> EngineResult<CreateResponse>;

    /// Starts an exec without attaching to it.
    async fn exec_start_detached(&self, id: &str, request: &ExecStartRequest)
    -> EngineResult<()>;

    /// Starts an exec and hijacks its I/O stream.
    async fn exec_attach(&self, id: &str, request: &ExecStartRequest) -> EngineResult<Hijacked>;

    async fn exec_resize(&self, id: &str, size: TtySize) -> EngineResult<()>;

    async fn exec_inspect(&self, id: &str) -> EngineResult<Value>;

    // Images

    async fn image_list(&self, query: &Query) -> EngineResult<Vec<Value>>;

    async fn image_inspect(&self, name: &str) -> EngineResult<Value>;

    /// Pulls `image[:tag]`, returning the progress stream.
    async fn image_pull(
        &self,
        image: &str,
        tag: Option<&str>,
        auth: Option<&str>,
    ) -> EngineResult<ByteStream>;

    async fn image_tag(&self, source: &str, repo: &str, tag: Option<&str>) -> EngineResult<()>;

    /// Pushes `name[:tag]`, returning the progress stream.
    async fn image_push(
        &self,
        name: &str,
        tag: Option<&str>,
        auth: Option<&str>,
    ) -> EngineResult<ByteStream>;

    /// Builds from a tar context, returning the progress stream.
    async fn image_build(
        &self,
        options: &BuildOptions,
        registry_config: Option<&str>,
        context: ByteStream,
    ) -> EngineResult<ByteStream>;

    // Volumes

    /// Volume list with engine warnings stripped.
    async fn volume_list(&self, query: &Query) -> EngineResult<Vec<Value>>;

    async fn volume_inspect(&self, name: &str) -> EngineResult<Value>;

    async fn volume_create(&self, request: &Value) -> EngineResult<Value>;

    async fn volume_remove(&self, name: &str, force: bool) -> EngineResult<()>;
}
