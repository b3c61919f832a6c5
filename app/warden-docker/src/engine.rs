//! HTTP client for the real container engine.
//!
//! Each call opens a fresh connection to the engine socket, performs the
//! HTTP/1.1 handshake and sends one request. Keeping connections
//! per-request lets attach and exec hijack theirs without affecting
//! anything else.

use crate::trace::TRACE_ID_HEADER;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::client::conn::http1;
use hyper::{Method, Request, Response, StatusCode, header};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io;
use tokio::net::{TcpStream, UnixStream};
use warden_core::engine::Query;
use warden_core::error::{EngineError, EngineResult};
use warden_core::trace::current_trace_id;
use warden_core::types::{
    AttachOptions, BuildOptions, ContainerCreateRequest, CreateResponse, ExecCreateRequest,
    ExecStartRequest, RemoveOptions, TtySize,
};
use warden_core::{ByteStream, Endpoint, Engine, Hijacked, RawStream};

type RequestBody = UnsyncBoxBody<Bytes, io::Error>;

const REGISTRY_AUTH_HEADER: &str = "X-Registry-Auth";
const REGISTRY_CONFIG_HEADER: &str = "X-Registry-Config";

/// [`Engine`] implementation speaking the engine HTTP API.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    endpoint: Endpoint,
    api_version: String,
}

impl HttpEngine {
    /// Creates a client for `endpoint`, sending requests under
    /// `/v{api_version}`.
    #[must_use]
    pub fn new(endpoint: Endpoint, api_version: impl Into<String>) -> Self {
        Self {
            endpoint,
            api_version: api_version.into(),
        }
    }

    async fn connect(&self) -> EngineResult<Box<dyn RawStream>> {
        let stream: io::Result<Box<dyn RawStream>> = match &self.endpoint {
            Endpoint::Unix(path) => UnixStream::connect(path)
                .await
                .map(|s| Box::new(s) as Box<dyn RawStream>),
            Endpoint::Tcp(addr) => TcpStream::connect(addr)
                .await
                .map(|s| Box::new(s) as Box<dyn RawStream>),
        };
        stream.map_err(|e| EngineError::Transport(format!("{}: {e}", self.endpoint)))
    }

    fn uri(&self, path: &str, query: &Query) -> String {
        let mut uri = format!("/v{}{path}", self.api_version);
        if !query.is_empty() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .finish();
            uri.push('?');
            uri.push_str(&encoded);
        }
        uri
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &Query,
        headers: &[(&str, &str)],
        body: RequestBody,
    ) -> EngineResult<Response<Incoming>> {
        let io = TokioIo::new(self.connect().await?);
        let (mut sender, conn) = http1::Builder::new()
            .handshake(io)
            .await
            .map_err(|e| EngineError::Transport(format!("engine handshake failed: {e}")))?;

        // Upgrades need the connection task alive past the response.
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                let msg = e.to_string().to_lowercase();
                if !msg.contains("canceled") && !msg.contains("incomplete") {
                    tracing::debug!("engine connection ended: {e}");
                }
            }
        });

        let mut builder = Request::builder()
            .method(method)
            .uri(self.uri(path, query))
            .header(header::HOST, "docker");
        let trace_id = current_trace_id();
        if !trace_id.is_empty() {
            builder = builder.header(TRACE_ID_HEADER, trace_id);
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(body)
            .map_err(|e| EngineError::Protocol(format!("failed to build engine request: {e}")))?;

        sender
            .send_request(request)
            .await
            .map_err(|e| EngineError::Transport(format!("engine request failed: {e}")))
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &Query,
        headers: &[(&str, &str)],
        body: RequestBody,
    ) -> EngineResult<Response<Incoming>> {
        checked(self.send(method, path, query, headers, body).await?).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &Query) -> EngineResult<T> {
        read_json(self.call(Method::GET, path, query, &[], empty()).await?).await
    }

    async fn post_empty(&self, path: &str, query: &Query) -> EngineResult<()> {
        drain(self.call(Method::POST, path, query, &[], empty()).await?).await
    }

    async fn hijack(&self, path: &str, query: &Query, body: RequestBody) -> EngineResult<Hijacked> {
        let response = self
            .send(
                Method::POST,
                path,
                query,
                &[
                    (header::CONNECTION.as_str(), "Upgrade"),
                    (header::UPGRADE.as_str(), "tcp"),
                    (header::CONTENT_TYPE.as_str(), "application/json"),
                ],
                body,
            )
            .await?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            let response = checked(response).await?;
            return Err(EngineError::Protocol(format!(
                "engine answered {} instead of upgrading",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let upgraded = hyper::upgrade::on(response)
            .await
            .map_err(|e| EngineError::Transport(format!("engine upgrade failed: {e}")))?;

        Ok(Hijacked {
            stream: Box::new(TokioIo::new(upgraded)),
            content_type,
        })
    }
}

fn empty() -> RequestBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn json<T: Serialize>(value: &T) -> EngineResult<RequestBody> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| EngineError::Protocol(format!("failed to encode request: {e}")))?;
    Ok(Full::new(Bytes::from(bytes))
        .map_err(|never| match never {})
        .boxed_unsync())
}

fn streamed(body: ByteStream) -> RequestBody {
    StreamBody::new(body.map_ok(Frame::data)).boxed_unsync()
}

/// Turns a non-success status into the matching [`EngineError`], using the
/// engine's `{"message": ...}` body when present.
async fn checked(response: Response<Incoming>) -> EngineResult<Response<Incoming>> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();
    let message = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_owned))
        .unwrap_or_else(|| String::from_utf8_lossy(&body).trim().to_string());
    Err(EngineError::from_status(status.as_u16(), message))
}

async fn read_json<T: DeserializeOwned>(response: Response<Incoming>) -> EngineResult<T> {
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| EngineError::Transport(format!("failed to read engine response: {e}")))?
        .to_bytes();
    serde_json::from_slice(&body)
        .map_err(|e| EngineError::Protocol(format!("invalid engine JSON: {e}")))
}

async fn drain(response: Response<Incoming>) -> EngineResult<()> {
    response
        .into_body()
        .collect()
        .await
        .map(|_| ())
        .map_err(|e| EngineError::Transport(format!("failed to read engine response: {e}")))
}

fn byte_stream(response: Response<Incoming>) -> ByteStream {
    response
        .into_body()
        .into_data_stream()
        .map_err(io::Error::other)
        .boxed()
}

fn pairs(items: &[(&str, Option<&str>)]) -> Vec<(String, String)> {
    items
        .iter()
        .filter_map(|(k, v)| v.map(|v| ((*k).to_string(), v.to_string())))
        .collect()
}

fn size_query(size: TtySize) -> Vec<(String, String)> {
    vec![
        ("h".to_string(), size.height.to_string()),
        ("w".to_string(), size.width.to_string()),
    ]
}

#[async_trait]
impl Engine for HttpEngine {
    async fn ping(&self) -> EngineResult<()> {
        drain(self.call(Method::GET, "/_ping", &[], &[], empty()).await?).await
    }

    async fn version(&self) -> EngineResult<Value> {
        self.get_json("/version", &[]).await
    }

    async fn info(&self) -> EngineResult<Value> {
        self.get_json("/info", &[]).await
    }

    async fn events(&self, query: &Query) -> EngineResult<ByteStream> {
        let response = self.call(Method::GET, "/events", query, &[], empty()).await?;
        Ok(byte_stream(response))
    }

    async fn container_list(&self, query: &Query) -> EngineResult<Vec<Value>> {
        self.get_json("/containers/json", query).await
    }

    async fn container_inspect(&self, id: &str) -> EngineResult<Value> {
        self.get_json(&format!("/containers/{id}/json"), &[]).await
    }

    async fn container_create(
        &self,
        name: Option<&str>,
        request: &ContainerCreateRequest,
    ) -> EngineResult<CreateResponse> {
        let response = self
            .call(
                Method::POST,
                "/containers/create",
                &pairs(&[("name", name)]),
                &[(header::CONTENT_TYPE.as_str(), "application/json")],
                json(request)?,
            )
            .await?;
        read_json(response).await
    }

    async fn container_start(&self, id: &str) -> EngineResult<()> {
        self.post_empty(&format!("/containers/{id}/start"), &[]).await
    }

    async fn container_stop(&self, id: &str, timeout: Option<u64>) -> EngineResult<()> {
        let t = timeout.map(|t| t.to_string());
        self.post_empty(
            &format!("/containers/{id}/stop"),
            &pairs(&[("t", t.as_deref())]),
        )
        .await
    }

    async fn container_kill(&self, id: &str, signal: Option<&str>) -> EngineResult<()> {
        self.post_empty(
            &format!("/containers/{id}/kill"),
            &pairs(&[("signal", signal)]),
        )
        .await
    }

    async fn container_resize(&self, id: &str, size: TtySize) -> EngineResult<()> {
        self.post_empty(&format!("/containers/{id}/resize"), &size_query(size))
            .await
    }

    async fn container_remove(&self, id: &str, options: RemoveOptions) -> EngineResult<()> {
        let flag = |on: bool| if on { "1" } else { "0" }.to_string();
        let query = vec![
            ("force".to_string(), flag(options.force)),
            ("v".to_string(), flag(options.volumes)),
            ("link".to_string(), flag(options.link)),
        ];
        let response = self
            .call(
                Method::DELETE,
                &format!("/containers/{id}"),
                &query,
                &[],
                empty(),
            )
            .await?;
        drain(response).await
    }

    async fn container_attach(&self, id: &str, options: &AttachOptions) -> EngineResult<Hijacked> {
        self.hijack(&format!("/containers/{id}/attach"), &options.to_query(), empty())
            .await
    }

    async fn exec_create(
        &self,
        container: &str,
        request: &ExecCreateRequest,
    ) -> EngineResult<CreateResponse> {
        let response = self
            .call(
                Method::POST,
                &format!("/containers/{container}/exec"),
                &[],
                &[(header::CONTENT_TYPE.as_str(), "application/json")],
                json(request)?,
            )
            .await?;
        read_json(response).await
    }

    async fn exec_start_detached(
        &self,
        id: &str,
        request: &ExecStartRequest,
    ) -> EngineResult<()> {
        let response = self
            .call(
                Method::POST,
                &format!("/exec/{id}/start"),
                &[],
                &[(header::CONTENT_TYPE.as_str(), "application/json")],
                json(request)?,
            )
            .await?;
        drain(response).await
    }

    async fn exec_attach(&self, id: &str, request: &ExecStartRequest) -> EngineResult<Hijacked> {
        self.hijack(&format!("/exec/{id}/start"), &[], json(request)?)
            .await
    }

    async fn exec_resize(&self, id: &str, size: TtySize) -> EngineResult<()> {
        self.post_empty(&format!("/exec/{id}/resize"), &size_query(size))
            .await
    }

    async fn exec_inspect(&self, id: &str) -> EngineResult<Value> {
        self.get_json(&format!("/exec/{id}/json"), &[]).await
    }

    async fn image_list(&self, query: &Query) -> EngineResult<Vec<Value>> {
        self.get_json("/images/json", query).await
    }

    async fn image_inspect(&self, name: &str) -> EngineResult<Value> {
        self.get_json(&format!("/images/{name}/json"), &[]).await
    }

    async fn image_pull(
        &self,
        image: &str,
        tag: Option<&str>,
        auth: Option<&str>,
    ) -> EngineResult<ByteStream> {
        let headers: Vec<(&str, &str)> = auth.map(|a| (REGISTRY_AUTH_HEADER, a)).into_iter().collect();
        let response = self
            .call(
                Method::POST,
                "/images/create",
                &pairs(&[("fromImage", Some(image)), ("tag", tag)]),
                &headers,
                empty(),
            )
            .await?;
        Ok(byte_stream(response))
    }

    async fn image_tag(&self, source: &str, repo: &str, tag: Option<&str>) -> EngineResult<()> {
        let response = self
            .call(
                Method::POST,
                &format!("/images/{source}/tag"),
                &pairs(&[("repo", Some(repo)), ("tag", tag)]),
                &[],
                empty(),
            )
            .await?;
        drain(response).await
    }

    async fn image_push(
        &self,
        name: &str,
        tag: Option<&str>,
        auth: Option<&str>,
    ) -> EngineResult<ByteStream> {
        let headers: Vec<(&str, &str)> = auth.map(|a| (REGISTRY_AUTH_HEADER, a)).into_iter().collect();
        let response = self
            .call(
                Method::POST,
                &format!("/images/{name}/push"),
                &pairs(&[("tag", tag)]),
                &headers,
                empty(),
            )
            .await?;
        Ok(byte_stream(response))
    }

    async fn image_build(
        &self,
        options: &BuildOptions,
        registry_config: Option<&str>,
        context: ByteStream,
    ) -> EngineResult<ByteStream> {
        let mut headers = vec![(header::CONTENT_TYPE.as_str(), "application/x-tar")];
        if let Some(config) = registry_config {
            headers.push((REGISTRY_CONFIG_HEADER, config));
        }
        let response = self
            .call(
                Method::POST,
                "/build",
                &options.params,
                &headers,
                streamed(context),
            )
            .await?;
        Ok(byte_stream(response))
    }

    async fn volume_list(&self, query: &Query) -> EngineResult<Vec<Value>> {
        let mut listing: Value = self.get_json("/volumes", query).await?;
        match listing.get_mut("Volumes").map(Value::take).unwrap_or_default() {
            Value::Null => Ok(Vec::new()),
            Value::Array(volumes) => Ok(volumes),
            other => Err(EngineError::Protocol(format!(
                "unexpected volume list: {other}"
            ))),
        }
    }

    async fn volume_inspect(&self, name: &str) -> EngineResult<Value> {
        self.get_json(&format!("/volumes/{name}"), &[]).await
    }

    async fn volume_create(&self, request: &Value) -> EngineResult<Value> {
        let response = self
            .call(
                Method::POST,
                "/volumes/create",
                &[],
                &[(header::CONTENT_TYPE.as_str(), "application/json")],
                json(request)?,
            )
            .await?;
        read_json(response).await
    }

    async fn volume_remove(&self, name: &str, force: bool) -> EngineResult<()> {
        let query = pairs(&[("force", force.then_some("1"))]);
        let response = self
            .call(
                Method::DELETE,
                &format!("/volumes/{name}"),
                &query,
                &[],
                empty(),
            )
            .await?;
        drain(response).await
    }
}
