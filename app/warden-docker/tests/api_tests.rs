//! Router tests against the in-memory engine.

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;
use warden_core::testing::{FakeEngine, RAW_STREAM};
use warden_core::{Identity, Policy, Registry, ResourceKind};
use warden_docker::create_router;

struct Harness {
    app: Router,
    engine: Arc<FakeEngine>,
    policy: Policy,
}

fn harness() -> Harness {
    let engine = Arc::new(FakeEngine::new());
    let policy = Policy::new(
        engine.clone(),
        Arc::new(Registry::new()),
        Identity::new("/docker/gateway", "gateway"),
    );
    Harness {
        app: create_router(policy.clone(), "1.41"),
        engine,
        policy,
    }
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

async fn send(app: &Router, method: Method, uri: &str, body: impl Into<Body>) -> Reply {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    Reply {
        status,
        headers,
        body,
    }
}

async fn create(app: &Router, uri: &str, body: Value) -> Reply {
    send(app, Method::POST, uri, body.to_string()).await
}

#[tokio::test]
async fn ping_announces_api_version() {
    let h = harness();
    let reply = send(&h.app, Method::GET, "/_ping", Body::empty()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "OK");
    assert_eq!(reply.headers["api-version"], "1.41");
    assert_eq!(reply.headers["docker-experimental"], "false");

    let head = send(&h.app, Method::HEAD, "/v1.41/_ping", Body::empty()).await;
    assert_eq!(head.status, StatusCode::OK);
}

#[tokio::test]
async fn versioned_and_unknown_paths() {
    let h = harness();
    assert_eq!(
        send(&h.app, Method::GET, "/v1.24/version", Body::empty()).await.status,
        StatusCode::OK
    );
    let unknown = send(&h.app, Method::GET, "/networks", Body::empty()).await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    assert_eq!(unknown.json()["message"], "page not found");
}

#[tokio::test]
async fn responses_carry_trace_id() {
    let h = harness();
    let req = Request::builder()
        .uri("/version")
        .header("X-Trace-Id", "abc-123")
        .body(Body::empty())
        .unwrap();
    let resp = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.headers()["x-trace-id"], "abc-123");
}

#[tokio::test]
async fn info_only_reports_owned_counts() {
    let h = harness();
    h.engine.add_container("foreign", "foreign");
    let info = send(&h.app, Method::GET, "/info", Body::empty()).await.json();
    assert_eq!(info["Containers"], 0);
    assert_eq!(info["ID"], "ENGINE-ID");
    assert!(info.get("Name").is_none());
}

#[tokio::test]
async fn create_then_manage_owned_container() {
    let h = harness();
    let created = create(
        &h.app,
        "/v1.41/containers/create?name=web",
        json!({"Image": "alpine", "Cmd": ["sleep", "60"]}),
    )
    .await;
    assert_eq!(created.status, StatusCode::CREATED);
    let id = created.json()["Id"].as_str().unwrap().to_string();

    let by_name = send(&h.app, Method::GET, "/containers/web/json", Body::empty()).await;
    assert_eq!(by_name.status, StatusCode::OK);
    assert_eq!(by_name.json()["Id"], id.as_str());

    let short = &id[..8];
    let start = send(
        &h.app,
        Method::POST,
        &format!("/containers/{short}/start"),
        Body::empty(),
    )
    .await;
    assert_eq!(start.status, StatusCode::NO_CONTENT);
    assert!(h.engine.calls().contains(&format!("container_start {id}")));

    let resize = send(
        &h.app,
        Method::POST,
        &format!("/containers/{id}/resize?h=40&w=120"),
        Body::empty(),
    )
    .await;
    assert_eq!(resize.status, StatusCode::OK);

    let removed = send(
        &h.app,
        Method::DELETE,
        &format!("/containers/{id}?force=1"),
        Body::empty(),
    )
    .await;
    assert_eq!(removed.status, StatusCode::NO_CONTENT);
    assert!(!h.policy.registry().contains(ResourceKind::Container, &id));
}

#[tokio::test]
async fn foreign_containers_are_invisible_and_untouchable() {
    let h = harness();
    h.engine.add_container("f00d", "theirs");

    let list = send(&h.app, Method::GET, "/containers/json?all=1", Body::empty()).await;
    assert_eq!(list.json(), json!([]));

    for (method, uri) in [
        (Method::GET, "/containers/f00d/json"),
        (Method::POST, "/containers/f00d/stop"),
        (Method::DELETE, "/containers/theirs"),
    ] {
        let reply = send(&h.app, method, uri, Body::empty()).await;
        assert_eq!(reply.status, StatusCode::FORBIDDEN, "{uri}");
        assert!(reply.json()["message"].is_string());
    }
    assert_eq!(h.engine.call_count("container_inspect"), 0);
    assert_eq!(h.engine.call_count("container_stop"), 0);
    assert_eq!(h.engine.call_count("container_remove"), 0);
}

#[tokio::test]
async fn host_bind_is_rejected_before_the_engine() {
    let h = harness();
    let body = json!({"Image": "alpine", "HostConfig": {"Binds": ["/etc:/host-etc"]}});
    for _ in 0..2 {
        let reply = create(&h.app, "/containers/create", body.clone()).await;
        assert_eq!(reply.status, StatusCode::FORBIDDEN);
    }
    assert_eq!(h.engine.call_count("container_create"), 0);
    assert_eq!(h.engine.call_count("image_pull"), 0);
}

#[tokio::test]
async fn malformed_bodies_and_queries_are_client_errors() {
    let h = harness();
    let bad_json = send(&h.app, Method::POST, "/containers/create", "{not json").await;
    assert_eq!(bad_json.status, StatusCode::BAD_REQUEST);
    assert!(bad_json.json()["message"].is_string());

    let empty = send(&h.app, Method::POST, "/containers/create", Body::empty()).await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    let id = create(&h.app, "/containers/create", json!({"Image": "alpine"}))
        .await
        .json()["Id"]
        .as_str()
        .unwrap()
        .to_string();
    let bad_size = send(
        &h.app,
        Method::POST,
        &format!("/containers/{id}/resize?h=tall&w=80"),
        Body::empty(),
    )
    .await;
    assert_eq!(bad_size.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn exec_lifecycle() {
    let h = harness();
    let id = create(&h.app, "/containers/create", json!({"Image": "alpine"}))
        .await
        .json()["Id"]
        .as_str()
        .unwrap()
        .to_string();

    let empty_cmd = create(&h.app, &format!("/containers/{id}/exec"), json!({"Cmd": []})).await;
    assert_eq!(empty_cmd.status, StatusCode::BAD_REQUEST);
    assert_eq!(empty_cmd.json()["message"], "No exec command specified");

    let exec = create(
        &h.app,
        &format!("/containers/{id}/exec"),
        json!({"Cmd": ["ls"], "AttachStdout": true}),
    )
    .await;
    assert_eq!(exec.status, StatusCode::CREATED);
    let exec_id = exec.json()["Id"].as_str().unwrap().to_string();

    let started = create(
        &h.app,
        &format!("/exec/{exec_id}/start"),
        json!({"Detach": true}),
    )
    .await;
    assert_eq!(started.status, StatusCode::OK);
    assert_eq!(h.engine.call_count("exec_start_detached"), 1);

    let inspect = send(
        &h.app,
        Method::GET,
        &format!("/exec/{exec_id}/json"),
        Body::empty(),
    )
    .await;
    assert_eq!(inspect.status, StatusCode::OK);

    let foreign = create(&h.app, "/exec/deadbeef/start", json!({"Detach": true})).await;
    assert_eq!(foreign.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn oversized_exec_start_body_is_refused() {
    let h = harness();
    let id = create(&h.app, "/containers/create", json!({"Image": "alpine"}))
        .await
        .json()["Id"]
        .as_str()
        .unwrap()
        .to_string();
    let exec = create(&h.app, &format!("/containers/{id}/exec"), json!({"Cmd": ["ls"]})).await;
    let exec_id = exec.json()["Id"].as_str().unwrap().to_string();

    let padding = "x".repeat(3 * 1024 * 1024);
    let body = format!(r#"{{"Detach": true, "Padding": "{padding}"}}"#);
    let reply = send(&h.app, Method::POST, &format!("/exec/{exec_id}/start"), body).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(h.engine.call_count("exec_start_detached"), 0);
    assert_eq!(h.engine.call_count("exec_attach"), 0);
}

#[tokio::test]
async fn pull_tag_push_through_wildcard_routes() {
    let h = harness();
    let pull = send(
        &h.app,
        Method::POST,
        "/images/create?fromImage=alpine&tag=latest",
        Body::empty(),
    )
    .await;
    assert_eq!(pull.status, StatusCode::OK);
    assert_eq!(pull.headers["content-type"], "application/json");
    assert!(String::from_utf8_lossy(&pull.body).contains("Downloaded newer image"));

    let tag = send(
        &h.app,
        Method::POST,
        "/images/alpine/tag?repo=registry.local:5000/team/app&tag=v1",
        Body::empty(),
    )
    .await;
    assert_eq!(tag.status, StatusCode::CREATED);

    let inspect = send(
        &h.app,
        Method::GET,
        "/images/registry.local:5000/team/app:v1/json",
        Body::empty(),
    )
    .await;
    assert_eq!(inspect.status, StatusCode::OK);

    let push = send(
        &h.app,
        Method::POST,
        "/images/registry.local:5000/team/app:v1/push",
        Body::empty(),
    )
    .await;
    assert_eq!(push.status, StatusCode::OK);
    assert!(
        h.engine
            .calls()
            .contains(&"image_push registry.local:5000/team/app v1 auth=-".to_string())
    );

    let unowned = send(
        &h.app,
        Method::POST,
        "/images/someone/else/push?tag=latest",
        Body::empty(),
    )
    .await;
    assert_eq!(unowned.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn pull_forwards_registry_auth() {
    let h = harness();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/images/create?fromImage=private/app&tag=1.0")
        .header("X-Registry-Auth", "c2VjcmV0")
        .body(Body::empty())
        .unwrap();
    let resp = h.app.clone().oneshot(req).await.unwrap();
    resp.into_body().collect().await.unwrap();
    assert!(
        h.engine
            .calls()
            .contains(&"image_pull private/app:1.0 auth=c2VjcmV0".to_string())
    );
    assert!(h.policy.registry().contains(ResourceKind::Image, "private/app:1.0"));
}

#[tokio::test]
async fn imports_are_not_supported() {
    let h = harness();
    let reply = send(
        &h.app,
        Method::POST,
        "/images/create?fromSrc=-&repo=x",
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn build_with_host_network_is_forbidden() {
    let h = harness();
    let reply = send(
        &h.app,
        Method::POST,
        "/build?t=app&networkmode=host",
        Body::from("tar"),
    )
    .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(h.engine.call_count("image_build"), 0);

    let ok = send(&h.app, Method::POST, "/build?t=app:1", Body::from("tar")).await;
    assert_eq!(ok.status, StatusCode::OK);
    let cgroup: Vec<_> = h.engine.builds()[0]
        .values("cgroupparent")
        .map(str::to_owned)
        .collect();
    assert_eq!(cgroup, vec!["/docker/gateway"]);
    assert!(h.policy.registry().contains(ResourceKind::Image, "app:1"));
}

#[tokio::test]
async fn volumes_are_filtered_and_guarded() {
    let h = harness();
    h.engine.add_volume("theirs");

    let created = create(&h.app, "/volumes/create", json!({"Name": "data"})).await;
    assert_eq!(created.status, StatusCode::CREATED);
    let anonymous = send(&h.app, Method::POST, "/volumes/create", Body::empty()).await;
    assert_eq!(anonymous.status, StatusCode::CREATED);

    let list = send(&h.app, Method::GET, "/volumes", Body::empty()).await.json();
    let names: Vec<&str> = list["Volumes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v["Name"].as_str())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"data"));
    assert!(!names.contains(&"theirs"));
    assert_eq!(list["Warnings"], json!([]));

    let taken = create(&h.app, "/volumes/create", json!({"Name": "theirs"})).await;
    assert_eq!(taken.status, StatusCode::FORBIDDEN);
    let foreign = send(&h.app, Method::DELETE, "/volumes/theirs", Body::empty()).await;
    assert_eq!(foreign.status, StatusCode::FORBIDDEN);
    let mine = send(&h.app, Method::DELETE, "/volumes/data", Body::empty()).await;
    assert_eq!(mine.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn events_stream_only_owned_resources() {
    let h = harness();
    h.policy.registry().record(ResourceKind::Container, "mine");
    h.engine
        .push_event(json!({"Type": "container", "Action": "die", "Actor": {"ID": "mine"}}));
    h.engine
        .push_event(json!({"Type": "container", "Action": "die", "Actor": {"ID": "theirs"}}));

    let reply = send(&h.app, Method::GET, "/events", Body::empty()).await;
    assert_eq!(reply.status, StatusCode::OK);
    let lines: Vec<Value> = String::from_utf8_lossy(&reply.body)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["Actor"]["ID"], "mine");
}

#[tokio::test]
async fn attach_without_upgrade_relays_over_bodies() {
    let h = harness();
    let id = create(&h.app, "/containers/create", json!({"Image": "alpine"}))
        .await
        .json()["Id"]
        .as_str()
        .unwrap()
        .to_string();

    let req = Request::builder()
        .method(Method::POST)
        .uri(format!("/containers/{id}/attach?stream=1&stdin=1&stdout=1"))
        .body(Body::from("echo hi\n"))
        .unwrap();
    let resp = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], RAW_STREAM);

    let mut peer = h.engine.take_peer().unwrap();
    let mut stdin = Vec::new();
    peer.read_to_end(&mut stdin).await.unwrap();
    assert_eq!(stdin, b"echo hi\n");
    peer.write_all(b"hi\n").await.unwrap();
    drop(peer);

    let output = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(output, "hi\n");
}

#[tokio::test]
async fn attach_to_foreign_container_never_hijacks() {
    let h = harness();
    h.engine.add_container("f00d", "theirs");
    let reply = send(
        &h.app,
        Method::POST,
        "/containers/f00d/attach?stream=1",
        Body::empty(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert!(h.engine.take_peer().is_none());
}
