#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use approx::assert_relative_eq;
use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, Request, StatusCode},
    routing::get as route_get,
    Router,
};
use camino::{Utf8Path, Utf8PathBuf};
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tower::ServiceExt;
use vision_localize_server::{
    engine::{EngineOutcome, EngineRequest, LocalizeEngine, RawEstimate},
    localize_errors::LocalizeError,
    localizer::Localizer,
    params::ServerParams,
    registry::Registry,
    server,
};

/// Translation (1, 2, 3) and identity rotation, in engine order.
pub const ENGINE_POSE: [f64; 12] = [1.0, 2.0, 3.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

pub const MULTIPART_BOUNDARY: &str = "vls-test-boundary";

/// Engine answering with a fixed outcome and recording every request it receives.
pub struct RecordingEngine {
    outcome: Result<EngineOutcome, String>,
    delay: Duration,
    requests: Mutex<Vec<EngineRequest>>,
}

impl RecordingEngine {
    pub fn new(outcome: EngineOutcome) -> Arc<Self> {
        Arc::new(RecordingEngine {
            outcome: Ok(outcome),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Engine failing every call with `EngineFailure(message)`.
    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(RecordingEngine {
            outcome: Err(message.to_string()),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Estimating engine that blocks for `delay` before answering.
    pub fn slow(delay: Duration) -> Arc<Self> {
        let engine = Arc::into_inner(Self::estimating()).unwrap();
        Arc::new(RecordingEngine { delay, ..engine })
    }

    pub fn estimating() -> Arc<Self> {
        Self::new(EngineOutcome::Estimate(RawEstimate {
            pose: ENGINE_POSE.to_vec(),
            keypoints_2d: Some(vec![vec![10.0, 20.0], vec![30.0, 40.0]]),
            keypoints_3d: Some(vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]),
            inliers: Some(vec![1]),
            times: Some(vec![0.0; 6]),
        }))
    }

    pub fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LocalizeEngine for RecordingEngine {
    fn localize(&self, request: &EngineRequest) -> Result<EngineOutcome, LocalizeError> {
        self.requests.lock().unwrap().push(request.clone());
        std::thread::sleep(self.delay);
        self.outcome
            .clone()
            .map_err(LocalizeError::EngineFailure)
    }
}

pub fn data_dir() -> Utf8PathBuf {
    Utf8Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data")
}

pub fn registry() -> Registry {
    Registry::load(&data_dir()).unwrap()
}

/// Parameters with a per-test upload directory.
pub fn params(test_name: &str) -> ServerParams {
    let upload_dir = Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap()
        .join(format!("vls-it-{test_name}-{}", std::process::id()));
    ServerParams::builder().upload_dir(upload_dir).build().unwrap()
}

pub fn app(test_name: &str, engine: Arc<RecordingEngine>) -> (Localizer, Router) {
    app_with_params(engine, params(test_name))
}

pub fn app_with_params(engine: Arc<RecordingEngine>, params: ServerParams) -> (Localizer, Router) {
    let localizer = Localizer::new(registry(), engine, params).unwrap();
    let router = server::router(localizer.clone());
    (localizer, router)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn get(router: &Router, uri: &str) -> TestResponse {
    let request = Request::get(uri)
        .header(header::ORIGIN, "http://viewer.example")
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

pub async fn post_form(router: &Router, uri: &str, body: &str) -> TestResponse {
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

/// A `multipart/form-data` request with text fields and an optional `image` file part.
pub fn multipart_request(uri: &str, fields: &[(&str, &str)], image: Option<&[u8]>) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(image) = image {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"query.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(image);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

    Request::post(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Serve a fixed image at `/query.jpg` on a local port; anything else is a 404.
pub async fn image_host(image: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/query.jpg", route_get(move || async move { image }));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Percent-encode a value for use in a query string.
pub fn encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

/// Compare a serialized `{"t": [..], "R": [[..]..]}` estimate with an expected pose.
pub fn assert_estimate_close(
    estimate: &serde_json::Value,
    t: [f64; 3],
    r: [[f64; 3]; 3],
    epsilon: f64,
) {
    for (i, expected) in t.iter().enumerate() {
        assert_relative_eq!(estimate["t"][i].as_f64().unwrap(), *expected, epsilon = epsilon);
    }
    for (i, row) in r.iter().enumerate() {
        for (j, expected) in row.iter().enumerate() {
            assert_relative_eq!(
                estimate["R"][i][j].as_f64().unwrap(),
                *expected,
                epsilon = epsilon
            );
        }
    }
}
