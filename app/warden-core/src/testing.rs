//! In-memory engine double for tests.
//!
//! Behaves like a small engine: containers, execs, images and volumes live
//! in maps, every call is logged, and hijacked sessions are backed by
//! `tokio::io::duplex` pairs whose engine-side ends can be taken by the test.

use crate::engine::{ByteStream, Engine, Hijacked, Query};
use crate::error::{EngineError, EngineResult};
use crate::policy::normalize_reference;
use crate::types::{
    AttachOptions, BuildOptions, ContainerCreateRequest, CreateResponse, ExecCreateRequest,
    ExecStartRequest, RemoveOptions, TtySize,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::DuplexStream;

/// Content type the double announces for hijacked sessions.
pub const RAW_STREAM: &str = "application/vnd.docker.raw-stream";

#[derive(Default)]
struct State {
    api_version: String,
    containers: BTreeMap<String, Value>,
    names: HashMap<String, String>,
    execs: BTreeMap<String, Value>,
    images: BTreeMap<String, Value>,
    volumes: BTreeMap<String, Value>,
    denied_pulls: HashMap<String, String>,
    hanging_stops: HashSet<String>,
    events: Vec<Value>,
    creates: Vec<ContainerCreateRequest>,
    builds: Vec<BuildOptions>,
    next: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next += 1;
        format!("{prefix}{:04}", self.next)
    }

    fn find_image(&self, name: &str) -> Option<String> {
        if self.images.contains_key(name) {
            return Some(name.to_string());
        }
        let normalized = normalize_reference(name);
        let hex = format!("sha256:{name}");
        self.images
            .iter()
            .find(|(id, doc)| {
                id.starts_with(&hex)
                    || doc["RepoTags"]
                        .as_array()
                        .is_some_and(|tags| tags.iter().any(|t| *t == normalized.as_str()))
            })
            .map(|(id, _)| id.clone())
    }

    fn add_volume(&mut self, name: &str) {
        self.volumes
            .entry(name.to_string())
            .or_insert_with(|| json!({"Name": name, "Driver": "local"}));
    }
}

/// Engine double. See the module docs.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
    calls: Mutex<Vec<String>>,
    peers: Mutex<Vec<DuplexStream>>,
    stops_in_flight: AtomicUsize,
    max_stops_in_flight: AtomicUsize,
}

impl FakeEngine {
    /// Creates an empty engine speaking API 1.43.
    #[must_use]
    pub fn new() -> Self {
        let engine = Self::default();
        engine.state().api_version = "1.43".to_string();
        engine
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    /// Sets the API version reported by `version`.
    pub fn set_api_version(&self, version: &str) {
        self.state().api_version = version.to_string();
    }

    /// Every call received so far, formatted as `"<method> <args>"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose name starts with `method`.
    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(' ').next() == Some(method))
            .count()
    }

    /// Adds a container the gateway did not create.
    pub fn add_container(&self, id: &str, name: &str) {
        let mut state = self.state();
        state.containers.insert(
            id.to_string(),
            json!({"Id": id, "Name": format!("/{name}"), "Mounts": []}),
        );
        state.names.insert(name.to_string(), id.to_string());
    }

    /// Adds an image the gateway did not pull.
    pub fn add_image(&self, id: &str, tags: &[&str]) {
        self.state()
            .images
            .insert(id.to_string(), json!({"Id": id, "RepoTags": tags}));
    }

    /// Adds a volume the gateway did not create.
    pub fn add_volume(&self, name: &str) {
        self.state().add_volume(name);
    }

    /// Makes pulls of `reference` fail in-band with `message`.
    pub fn deny_pull(&self, reference: &str, message: &str) {
        self.state()
            .denied_pulls
            .insert(normalize_reference(reference), message.to_string());
    }

    /// Makes stops of `id` never complete.
    pub fn hang_stop(&self, id: &str) {
        self.state().hanging_stops.insert(id.to_string());
    }

    /// Queues an event for the next `events` call.
    pub fn push_event(&self, event: Value) {
        self.state().events.push(event);
    }

    /// Create requests as received by the engine.
    #[must_use]
    pub fn creates(&self) -> Vec<ContainerCreateRequest> {
        self.state().creates.clone()
    }

    /// Build options as received by the engine.
    #[must_use]
    pub fn builds(&self) -> Vec<BuildOptions> {
        self.state().builds.clone()
    }

    /// Largest number of stops observed in flight at once.
    #[must_use]
    pub fn max_concurrent_stops(&self) -> usize {
        self.max_stops_in_flight.load(Ordering::SeqCst)
    }

    /// Engine-side end of the oldest hijacked session not yet taken.
    pub fn take_peer(&self) -> Option<DuplexStream> {
        let mut peers = self.peers.lock().unwrap();
        (!peers.is_empty()).then(|| peers.remove(0))
    }

    fn hijack(&self) -> Hijacked {
        let (ours, theirs) = tokio::io::duplex(4096);
        self.peers.lock().unwrap().push(theirs);
        Hijacked {
            stream: Box::new(ours),
            content_type: Some(RAW_STREAM.to_string()),
        }
    }

    fn container_exists(&self, id: &str) -> EngineResult<()> {
        if self.state().containers.contains_key(id) {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("No such container: {id}")))
        }
    }

    fn exec_exists(&self, id: &str) -> EngineResult<()> {
        if self.state().execs.contains_key(id) {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("No such exec instance: {id}")))
        }
    }
}

fn lines(messages: &[Value]) -> ByteStream {
    let chunks: Vec<std::io::Result<Bytes>> = messages
        .iter()
        .map(|m| Ok(Bytes::from(format!("{m}\n"))))
        .collect();
    futures::stream::iter(chunks).boxed()
}

fn volume_name(bind: &str) -> Option<&str> {
    let (source, _) = bind.split_once(':')?;
    (!source.starts_with('/')).then_some(source)
}

#[async_trait]
impl Engine for FakeEngine {
    async fn ping(&self) -> EngineResult<()> {
        self.log("ping".to_string());
        Ok(())
    }

    async fn version(&self) -> EngineResult<Value> {
        self.log("version".to_string());
        let api = self.state().api_version.clone();
        Ok(json!({"Version": "24.0.7", "ApiVersion": api, "Os": "linux", "Arch": "amd64"}))
    }

    async fn info(&self) -> EngineResult<Value> {
        self.log("info".to_string());
        Ok(json!({
            "ID": "ENGINE-ID",
            "ServerVersion": "24.0.7",
            "Architecture": "x86_64",
            "OSType": "linux",
            "IndexServerAddress": "https://index.docker.io/v1/",
            "Containers": 99,
            "Images": 42,
            "Name": "build-host",
            "DockerRootDir": "/var/lib/docker",
        }))
    }

    async fn events(&self, _query: &Query) -> EngineResult<ByteStream> {
        self.log("events".to_string());
        let events = std::mem::take(&mut self.state().events);
        Ok(lines(&events))
    }

    async fn container_list(&self, _query: &Query) -> EngineResult<Vec<Value>> {
        self.log("container_list".to_string());
        Ok(self
            .state()
            .containers
            .values()
            .map(|c| json!({"Id": c["Id"], "Names": [c["Name"]]}))
            .collect())
    }

    async fn container_inspect(&self, id: &str) -> EngineResult<Value> {
        self.log(format!("container_inspect {id}"));
        self.state()
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {id}")))
    }

    async fn container_create(
        &self,
        name: Option<&str>,
        request: &ContainerCreateRequest,
    ) -> EngineResult<CreateResponse> {
        self.log(format!("container_create {}", name.unwrap_or("-")));
        let mut state = self.state();
        state.creates.push(request.clone());
        if state.find_image(&request.image).is_none() {
            return Err(EngineError::NotFound(format!(
                "No such image: {}",
                request.image
            )));
        }
        if let Some(name) = name {
            if state.names.contains_key(name) {
                return Err(EngineError::Conflict(format!(
                    "Conflict. The container name \"/{name}\" is already in use"
                )));
            }
        }

        let id = state.next_id("c0ffee");
        let mut mounts = Vec::new();
        if let Some(host) = &request.host_config {
            for bind in host.binds.iter().flatten() {
                if let Some(volume) = volume_name(bind) {
                    mounts.push(json!({"Type": "volume", "Name": volume}));
                }
            }
            for mount in host.mounts.iter().flatten() {
                if mount.mount_type.as_deref() == Some("volume") {
                    mounts.push(json!({"Type": "volume", "Name": mount.source}));
                }
            }
        }
        for mount in &mounts {
            if let Some(volume) = mount["Name"].as_str() {
                state.add_volume(volume);
            }
        }

        let container_name = name.map_or_else(|| format!("/{id}"), |n| format!("/{n}"));
        state.containers.insert(
            id.clone(),
            json!({"Id": id, "Name": container_name, "Mounts": mounts}),
        );
        if let Some(name) = name {
            state.names.insert(name.to_string(), id.clone());
        }
        Ok(CreateResponse {
            id,
            warnings: Vec::new(),
        })
    }

    async fn container_start(&self, id: &str) -> EngineResult<()> {
        self.log(format!("container_start {id}"));
        self.container_exists(id)
    }

    async fn container_stop(&self, id: &str, timeout: Option<u64>) -> EngineResult<()> {
        self.log(format!(
            "container_stop {id} t={}",
            timeout.map_or_else(|| "-".to_string(), |t| t.to_string())
        ));
        self.container_exists(id)?;
        let hangs = self.state().hanging_stops.contains(id);

        let in_flight = self.stops_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_stops_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if hangs {
            futures::future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.stops_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn container_kill(&self, id: &str, signal: Option<&str>) -> EngineResult<()> {
        self.log(format!("container_kill {id} {}", signal.unwrap_or("-")));
        self.container_exists(id)
    }

    async fn container_resize(&self, id: &str, size: TtySize) -> EngineResult<()> {
        self.log(format!("container_resize {id} {}x{}", size.width, size.height));
        self.container_exists(id)
    }

    async fn container_remove(&self, id: &str, options: RemoveOptions) -> EngineResult<()> {
        self.log(format!("container_remove {id} force={}", options.force));
        let mut state = self.state();
        if state.containers.remove(id).is_none() {
            return Err(EngineError::NotFound(format!("No such container: {id}")));
        }
        state.names.retain(|_, target| target != id);
        Ok(())
    }

    async fn container_attach(&self, id: &str, options: &AttachOptions) -> EngineResult<Hijacked> {
        self.log(format!("container_attach {id} stdin={}", options.stdin));
        self.container_exists(id)?;
        Ok(self.hijack())
    }

    async fn exec_create(
        &self,
        container: &str,
        request: &ExecCreateRequest,
    ) -> EngineResult<CreateResponse> {
        self.log(format!("exec_create {container} {}", request.cmd.join(" ")));
        self.container_exists(container)?;
        let mut state = self.state();
        let id = state.next_id("e");
        state
            .execs
            .insert(id.clone(), json!({"ID": id, "ContainerID": container, "Running": false}));
        Ok(CreateResponse {
            id,
            warnings: Vec::new(),
        })
    }

    async fn exec_start_detached(
        &self,
        id: &str,
        _request: &ExecStartRequest,
    ) -> EngineResult<()> {
        self.log(format!("exec_start_detached {id}"));
        self.exec_exists(id)
    }

    async fn exec_attach(&self, id: &str, _request: &ExecStartRequest) -> EngineResult<Hijacked> {
        self.log(format!("exec_attach {id}"));
        self.exec_exists(id)?;
        Ok(self.hijack())
    }

    async fn exec_resize(&self, id: &str, size: TtySize) -> EngineResult<()> {
        self.log(format!("exec_resize {id} {}x{}", size.width, size.height));
        self.exec_exists(id)
    }

    async fn exec_inspect(&self, id: &str) -> EngineResult<Value> {
        self.log(format!("exec_inspect {id}"));
        self.state()
            .execs
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("No such exec instance: {id}")))
    }

    async fn image_list(&self, _query: &Query) -> EngineResult<Vec<Value>> {
        self.log("image_list".to_string());
        Ok(self.state().images.values().cloned().collect())
    }

    async fn image_inspect(&self, name: &str) -> EngineResult<Value> {
        self.log(format!("image_inspect {name}"));
        let state = self.state();
        state
            .find_image(name)
            .and_then(|id| state.images.get(&id).cloned())
            .ok_or_else(|| EngineError::NotFound(format!("No such image: {name}")))
    }

    async fn image_pull(
        &self,
        image: &str,
        tag: Option<&str>,
        auth: Option<&str>,
    ) -> EngineResult<ByteStream> {
        let reference = tag.map_or_else(|| image.to_string(), |t| format!("{image}:{t}"));
        self.log(format!("image_pull {reference} auth={}", auth.unwrap_or("-")));
        let normalized = normalize_reference(&reference);
        let mut state = self.state();
        if let Some(message) = state.denied_pulls.get(&normalized).cloned() {
            return Ok(lines(&[
                json!({"status": format!("Pulling from {image}")}),
                json!({"errorDetail": {"message": message}, "error": message}),
            ]));
        }
        if state.find_image(&normalized).is_none() {
            let id = format!("sha256:{}", state.next_id("1a2b"));
            state
                .images
                .insert(id.clone(), json!({"Id": id, "RepoTags": [normalized]}));
        }
        Ok(lines(&[
            json!({"status": format!("Pulling from {image}")}),
            json!({"status": format!("Downloaded newer image for {normalized}")}),
        ]))
    }

    async fn image_tag(&self, source: &str, repo: &str, tag: Option<&str>) -> EngineResult<()> {
        self.log(format!("image_tag {source} {repo} {}", tag.unwrap_or("-")));
        let mut state = self.state();
        let id = state
            .find_image(source)
            .ok_or_else(|| EngineError::NotFound(format!("No such image: {source}")))?;
        let new_tag = format!("{repo}:{}", tag.unwrap_or("latest"));
        if let Some(tags) = state
            .images
            .get_mut(&id)
            .and_then(|doc| doc["RepoTags"].as_array_mut())
        {
            tags.push(Value::String(new_tag));
        }
        Ok(())
    }

    async fn image_push(
        &self,
        name: &str,
        tag: Option<&str>,
        auth: Option<&str>,
    ) -> EngineResult<ByteStream> {
        self.log(format!(
            "image_push {name} {} auth={}",
            tag.unwrap_or("-"),
            auth.unwrap_or("-")
        ));
        Ok(lines(&[json!({"status": "Pushed"})]))
    }

    async fn image_build(
        &self,
        options: &BuildOptions,
        _registry_config: Option<&str>,
        context: ByteStream,
    ) -> EngineResult<ByteStream> {
        self.log("image_build".to_string());
        let _context: Vec<_> = context.collect().await;
        let mut state = self.state();
        state.builds.push(options.clone());
        let id = format!("sha256:{}", state.next_id("b1d"));
        let tags: Vec<String> = options.values("t").map(normalize_reference).collect();
        state
            .images
            .insert(id.clone(), json!({"Id": id, "RepoTags": tags}));
        Ok(lines(&[
            json!({"stream": "Step 1/1 : FROM scratch\n"}),
            json!({"aux": {"ID": id}}),
        ]))
    }

    async fn volume_list(&self, _query: &Query) -> EngineResult<Vec<Value>> {
        self.log("volume_list".to_string());
        Ok(self.state().volumes.values().cloned().collect())
    }

    async fn volume_inspect(&self, name: &str) -> EngineResult<Value> {
        self.log(format!("volume_inspect {name}"));
        self.state()
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("get {name}: no such volume")))
    }

    async fn volume_create(&self, request: &Value) -> EngineResult<Value> {
        self.log("volume_create".to_string());
        let mut state = self.state();
        let name = match request["Name"].as_str().filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => state.next_id("vol"),
        };
        state.add_volume(&name);
        Ok(state.volumes[&name].clone())
    }

    async fn volume_remove(&self, name: &str, force: bool) -> EngineResult<()> {
        self.log(format!("volume_remove {name} force={force}"));
        if self.state().volumes.remove(name).is_none() {
            return Err(EngineError::NotFound(format!("get {name}: no such volume")));
        }
        Ok(())
    }
}
