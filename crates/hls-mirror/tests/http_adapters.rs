//! Exercises the reqwest adapters and the full service against in-process HTTP servers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use hls_mirror_engine::{
    HttpConfig, HttpDiscovery, HttpOrigin, HttpSink, MirrorConfig, MirrorError, MirrorService,
    OriginEndpoint, OriginFetcher, SinkForwarder, StreamDiscovery, build_http_client,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test server infrastructure
// ============================================================================

struct TestServer {
    addr: String,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    async fn new(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });
        tokio::spawn(async move {
            server.await.unwrap();
        });

        Self {
            addr: addr.to_string(),
            shutdown_tx: Some(shutdown_tx),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

/// Source media server: muxer listing plus HLS resources.
#[derive(Default)]
struct OriginState {
    listing: Mutex<(StatusCode, String)>,
    resources: Mutex<HashMap<String, Vec<u8>>>,
    auth_headers: Mutex<Vec<String>>,
}

impl OriginState {
    fn set_listing(&self, paths: &[&str]) {
        let items: Vec<_> = paths
            .iter()
            .map(|p| serde_json::json!({ "path": p }))
            .collect();
        *self.listing.lock() = (
            StatusCode::OK,
            serde_json::json!({ "itemCount": items.len(), "items": items }).to_string(),
        );
    }

    fn set(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.resources.lock().insert(path.to_string(), body.into());
    }
}

async fn list_muxers(State(state): State<Arc<OriginState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(auth) = headers.get(header::AUTHORIZATION) {
        state
            .auth_headers
            .lock()
            .push(auth.to_str().unwrap_or_default().to_string());
    }
    let (status, body) = state.listing.lock().clone();
    (status, body)
}

async fn serve_hls(
    State(state): State<Arc<OriginState>>,
    Path(rest): Path<String>,
) -> impl IntoResponse {
    match state.resources.lock().get(&rest) {
        Some(body) => (StatusCode::OK, body.clone()),
        None => (StatusCode::NOT_FOUND, b"no such resource".to_vec()),
    }
}

async fn origin_server(state: Arc<OriginState>) -> TestServer {
    let router = Router::new()
        .route("/mediamtx/v3/hlsmuxers/list", get(list_muxers))
        .route("/hls/{*rest}", get(serve_hls))
        .with_state(state);
    TestServer::new(router).await
}

/// Downstream cache service recording every store.
#[derive(Default)]
struct SinkState {
    stored: Mutex<Vec<(String, Vec<u8>, String)>>,
    status: Mutex<Option<StatusCode>>,
}

impl SinkState {
    fn paths(&self) -> Vec<String> {
        self.stored.lock().iter().map(|(p, _, _)| p.clone()).collect()
    }
}

async fn store(
    State(state): State<Arc<SinkState>>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(status) = *state.status.lock() {
        return (status, "rejected");
    }
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.stored.lock().push((rest, body.to_vec(), auth));
    (StatusCode::OK, "ok")
}

async fn sink_server(state: Arc<SinkState>) -> TestServer {
    let router = Router::new()
        .route("/{*rest}", post(store))
        .with_state(state);
    TestServer::new(router).await
}

fn client() -> reqwest::Client {
    build_http_client(&HttpConfig::default()).unwrap()
}

fn media_playlist(segments: &[&str]) -> String {
    let mut out = String::from(
        "#EXTM3U\n#EXT-X-VERSION:9\n#EXT-X-TARGETDURATION:2\n#EXT-X-MAP:URI=\"init.mp4\"\n",
    );
    for seg in segments {
        out.push_str("#EXTINF:2.0,\n");
        out.push_str(seg);
        out.push('\n');
    }
    out
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ============================================================================
// Adapter tests
// ============================================================================

#[tokio::test]
async fn discovery_lists_streams_with_basic_auth() {
    let state = Arc::new(OriginState::default());
    state.set_listing(&["live/cam1", "live/cam2"]);
    let server = origin_server(state.clone()).await;

    let discovery =
        HttpDiscovery::new(client(), "http", &server.addr, "user", "secret").unwrap();
    let streams = discovery.discover().await.unwrap();

    let paths: Vec<_> = streams.iter().map(|s| s.path.as_str()).collect();
    assert_eq!(paths, vec!["live/cam1", "live/cam2"]);
    // base64("user:secret")
    assert_eq!(state.auth_headers.lock()[0], "Basic dXNlcjpzZWNyZXQ=");
}

#[tokio::test]
async fn discovery_fails_on_error_status_and_bad_body() {
    let state = Arc::new(OriginState::default());
    *state.listing.lock() = (StatusCode::UNAUTHORIZED, "denied".into());
    let server = origin_server(state.clone()).await;
    let discovery = HttpDiscovery::new(client(), "http", &server.addr, "u", "p").unwrap();

    let err = discovery.discover().await.unwrap_err();
    assert!(matches!(
        err,
        MirrorError::HttpStatus { status: StatusCode::UNAUTHORIZED, .. }
    ));

    *state.listing.lock() = (StatusCode::OK, "{ not json".into());
    let err = discovery.discover().await.unwrap_err();
    assert!(matches!(err, MirrorError::Discovery { .. }));
}

#[tokio::test]
async fn origin_fetch_returns_bytes_or_status_error() {
    let state = Arc::new(OriginState::default());
    state.set("cam1/stream.m3u8", "#EXTM3U\n");
    let server = origin_server(state).await;

    let endpoint = OriginEndpoint::new("http", &server.addr, "", "").unwrap();
    let origin = HttpOrigin::new(client());

    let url = endpoint.resource_url("cam1", "stream.m3u8").unwrap();
    assert_eq!(origin.fetch(&url).await.unwrap().as_ref(), b"#EXTM3U\n");

    let missing = endpoint.resource_url("cam1", "nope.mp4").unwrap();
    match origin.fetch(&missing).await.unwrap_err() {
        MirrorError::HttpStatus { status, body, .. } => {
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body, "no such resource");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn sink_push_sends_bearer_and_requires_200() {
    let state = Arc::new(SinkState::default());
    let server = sink_server(state.clone()).await;
    let sink = HttpSink::new(client(), &server.addr, "tok").unwrap();

    sink.push("hls/cam1/index.m3u8", bytes::Bytes::from_static(b"#EXTM3U\n"))
        .await
        .unwrap();
    {
        let stored = state.stored.lock();
        assert_eq!(stored[0].0, "hls/cam1/index.m3u8");
        assert_eq!(stored[0].1, b"#EXTM3U\n");
        assert_eq!(stored[0].2, "Bearer tok");
    }

    *state.status.lock() = Some(StatusCode::CREATED);
    let err = sink
        .push("hls/cam1/s1.mp4", bytes::Bytes::from_static(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MirrorError::HttpStatus { status: StatusCode::CREATED, .. }
    ));
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn service_mirrors_discovered_stream_incrementally() {
    let origin_state = Arc::new(OriginState::default());
    let sink_state = Arc::new(SinkState::default());
    let origin = origin_server(origin_state.clone()).await;
    let sink = sink_server(sink_state.clone()).await;

    origin_state.set_listing(&["live/cam1"]);
    origin_state.set("live/cam1/init.mp4", "INIT");
    for seg in ["s1.mp4", "s2.mp4", "s3.mp4", "s4.mp4"] {
        origin_state.set(&format!("live/cam1/{seg}"), format!("DATA-{seg}"));
    }
    origin_state.set(
        "live/cam1/stream.m3u8",
        media_playlist(&["s1.mp4", "s2.mp4", "s3.mp4"]),
    );

    let config: MirrorConfig = serde_json::from_value(serde_json::json!({
        "redis": { "hostname": sink.addr, "authKey": "sink-token" },
        "ingest": { "hostname": origin.addr, "username": "u", "password": "p" },
        "sync": { "discoveryIntervalMs": 50, "pollIntervalMs": 50 }
    }))
    .unwrap();
    config.validate().unwrap();

    let token = CancellationToken::new();
    let service = MirrorService::from_config(&config, token.clone()).unwrap();
    let registry = service.registry();
    let task = tokio::spawn(service.run());

    // First sync: init + 3 segments + playlist.
    wait_until(|| sink_state.paths().len() >= 5).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut seeded = sink_state.paths();
    seeded.sort();
    assert_eq!(
        seeded,
        vec![
            "hls/cam1/index.m3u8",
            "hls/cam1/init.mp4",
            "hls/cam1/s1.mp4",
            "hls/cam1/s2.mp4",
            "hls/cam1/s3.mp4",
        ]
    );
    assert!(
        sink_state
            .stored
            .lock()
            .iter()
            .all(|(_, _, auth)| auth == "Bearer sink-token")
    );

    // Appended segment: only the new segment and the playlist.
    origin_state.set(
        "live/cam1/stream.m3u8",
        media_playlist(&["s1.mp4", "s2.mp4", "s3.mp4", "s4.mp4"]),
    );
    wait_until(|| sink_state.paths().len() >= 7).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let paths = sink_state.paths();
    assert_eq!(paths.len(), 7);
    let mut tail = paths[5..].to_vec();
    tail.sort();
    assert_eq!(tail, vec!["hls/cam1/index.m3u8", "hls/cam1/s4.mp4"]);

    // Stream ends.
    origin_state.set_listing(&[]);
    wait_until(|| registry.is_empty()).await;

    token.cancel();
    task.await.unwrap();
}
