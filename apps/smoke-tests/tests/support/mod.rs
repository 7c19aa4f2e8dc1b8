#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use mosaic_client::{BACKDROP_PATH, MOSAIC_PATH, START_OVERLAY_PATH};

/// One multipart part as axum's extractor decoded it.
#[derive(Debug, Clone)]
pub struct CapturedPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl CapturedPart {
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub path: String,
    pub content_type: Option<String>,
    pub parts: Vec<CapturedPart>,
    pub json: Option<serde_json::Value>,
}

impl CapturedRequest {
    pub fn part(&self, name: &str) -> Option<&CapturedPart> {
        self.parts.iter().find(|part| part.name == name)
    }

    /// Text value of a form part; file parts are included.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.part(name).and_then(CapturedPart::text)
    }
}

#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl CannedResponse {
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "image/png",
            body: bytes,
        }
    }
}

impl IntoResponse for CannedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, [(header::CONTENT_TYPE, self.content_type)], self.body).into_response()
    }
}

#[derive(Clone, Default)]
struct FakeState {
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    responses: Arc<Mutex<VecDeque<CannedResponse>>>,
}

impl FakeState {
    fn record(&self, request: CapturedRequest) -> Response {
        if let Ok(mut captured) = self.captured.lock() {
            captured.push(request);
        }
        let next = self.responses.lock().ok().and_then(|mut queue| queue.pop_front());
        match next {
            Some(response) => response.into_response(),
            None => (StatusCode::SERVICE_UNAVAILABLE, "no canned response left").into_response(),
        }
    }
}

fn content_type_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn multipart_endpoint(
    State(state): State<FakeState>,
    uri: Uri,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let mut parts = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        };
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = match field.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        };
        parts.push(CapturedPart {
            name,
            file_name,
            content_type,
            data,
        });
    }
    state.record(CapturedRequest {
        path: uri.path().to_string(),
        content_type: content_type_of(&headers),
        parts,
        json: None,
    })
}

async fn json_endpoint(
    State(state): State<FakeState>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    state.record(CapturedRequest {
        path: uri.path().to_string(),
        content_type: content_type_of(&headers),
        parts: Vec::new(),
        json: Some(body),
    })
}

/// Axum stand-in for the mosaic backend on an ephemeral loopback port.
/// Answers requests with the canned responses in order.
pub struct FakeBackend {
    pub base_url: String,
    state: FakeState,
}

impl FakeBackend {
    pub fn spawn(responses: Vec<CannedResponse>) -> Result<Self> {
        let state = FakeState {
            captured: Arc::default(),
            responses: Arc::new(Mutex::new(responses.into())),
        };
        let app = Router::new()
            .route(MOSAIC_PATH, post(multipart_endpoint))
            .route(START_OVERLAY_PATH, post(multipart_endpoint))
            .route(BACKDROP_PATH, post(json_endpoint))
            .with_state(state.clone());

        let (ready_tx, ready_rx) = mpsc::channel();
        thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = ready_tx.send(Err(anyhow!(err)));
                    return;
                }
            };
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
                    Ok(listener) => listener,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow!(err)));
                        return;
                    }
                };
                let _ = ready_tx.send(listener.local_addr().map_err(anyhow::Error::from));
                if let Err(err) = axum::serve(listener, app).await {
                    eprintln!("fake backend stopped: {}", err);
                }
            });
        });

        let addr = ready_rx
            .recv_timeout(Duration::from_secs(10))
            .context("fake backend did not start")??;
        Ok(Self {
            base_url: format!("http://{}", addr),
            state,
        })
    }

    /// Requests seen so far. Each is recorded before its response is sent.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.state.captured.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

pub fn sample_png(width: u32, height: u32) -> Result<Vec<u8>> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        if (x + y) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([10, 10, 10])
        }
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img).write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}
