//! Test helper utilities shared by the integration and E2E tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use crop_advisor::{
    app_state::AppState,
    models::job::DiagnosisJob,
    routes,
    services::{
        gemini::GeminiClient,
        queue::{JobDispatcher, QueueError},
        status::{MemoryStatusStore, StatusCache},
        storage::{BlobStore, LocalDisk},
    },
};
use image::{ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::MockServer;

pub const API_KEY: &str = "test-key";
pub const GENERATE_PATH: &str = "/generate";
pub const PUBLIC_BASE: &str = "http://localhost:3000/storage";
pub const BOUNDARY: &str = "crop-advisor-test-boundary";

/// A small, valid PNG of a green square.
pub fn sample_png() -> Vec<u8> {
    let image = RgbImage::from_pixel(8, 8, Rgb([34, 139, 34]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode PNG");
    out.into_inner()
}

/// Successful `generateContent` body carrying `text`.
pub fn gemini_reply(text: &str) -> serde_json::Value {
    serde_json::json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
    })
}

/// Dispatcher that records jobs instead of running them.
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<DiagnosisJob>>,
    fail: bool,
}

impl RecordingQueue {
    pub fn failing() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn jobs(&self) -> Vec<DiagnosisJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobDispatcher for RecordingQueue {
    async fn dispatch(&self, job: &DiagnosisJob) -> Result<(), QueueError> {
        if self.fail {
            return Err(QueueError::Closed);
        }
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        if self.fail {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

/// Router wired to a mock AI provider, a temporary disk and in-memory status.
pub struct TestApp {
    pub router: Router,
    pub server: MockServer,
    pub store: Arc<MemoryStatusStore>,
    pub status: StatusCache,
    pub disk: Arc<LocalDisk>,
    pub queue: Arc<RecordingQueue>,
    pub dir: TempDir,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::with_queue(RecordingQueue::default()).await
    }

    pub async fn with_queue(queue: RecordingQueue) -> Self {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("create temp dir");
        let disk = Arc::new(LocalDisk::new(dir.path(), PUBLIC_BASE));
        let store = Arc::new(MemoryStatusStore::new());
        let status = StatusCache::new(store.clone());
        let queue = Arc::new(queue);

        let state = AppState::new(
            Arc::new(gateway_for(&server)),
            disk.clone() as Arc<dyn BlobStore>,
            status.clone(),
            queue.clone() as Arc<dyn JobDispatcher>,
            "Bangla",
        )
        .with_limits(64 * 1024, 1024 * 1024);

        Self {
            router: routes::router(state),
            server,
            store,
            status,
            disk,
            queue,
            dir,
        }
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn get_json(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        let (status, body) = self.get(uri).await;
        (status, serde_json::from_str(&body).expect("JSON body"))
    }

    pub async fn post_json(&self, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_str(&body).expect("JSON body"))
    }

    pub async fn upload(&self, files: &[(&str, &str, &[u8])]) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/disease")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(files)))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_str(&body).expect("JSON body"))
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }
}

pub fn gateway_for(server: &MockServer) -> GeminiClient {
    GeminiClient::new(&format!("{}{}", server.uri(), GENERATE_PATH), API_KEY)
        .expect("build gateway client")
}

/// Multipart body with one `images[]` part per `(file_name, content_type, data)`.
pub fn multipart_body(files: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (file_name, content_type, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"images[]\"; \
                 filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Response from POST /disease
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReply {
    pub uploaded_images: Vec<String>,
    pub job_id: Uuid,
}

/// Response from GET /diagnosis-status[/{job_id}]
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: String,
    pub diagnosis: Option<String>,
}

/// Upload leaf images to a running server
pub async fn upload_leaf_images(
    client: &reqwest::Client,
    base_url: &str,
    images: Vec<(String, Vec<u8>)>,
) -> Result<UploadReply, Box<dyn std::error::Error>> {
    let mut form = reqwest::multipart::Form::new();
    for (file_name, bytes) in images {
        form = form.part(
            "images[]",
            reqwest::multipart::Part::bytes(bytes)
                .file_name(file_name)
                .mime_str("image/png")?,
        );
    }

    let response = client
        .post(format!("{}/disease", base_url))
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<UploadReply>().await?)
}

/// Poll a job's status until completed or failed (with timeout)
pub async fn poll_diagnosis(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<StatusReply, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs / 3 + 1; // Poll every 3s, like the scanner page

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/diagnosis-status/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let reply = response.json::<StatusReply>().await?;
        match reply.status.as_str() {
            "completed" | "failed" => return Ok(reply),
            "processing" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_secs(3)).await;
            }
            other => return Err(format!("Unknown job status: {}", other).into()),
        }
    }

    Err(format!("Job did not complete within {} seconds", timeout_secs).into())
}
