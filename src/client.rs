use rand::Rng;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::ClientConfig;
use crate::error::{ComfyError, Result};
use crate::resolve::is_supported_image;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::types::ImageRef;
use crate::workflow::Workflow;

/// The four server operations a variation run needs.
///
/// [`ComfyClient`] is the real implementation; the seam exists so the runner
/// can be driven by anything that speaks the same protocol.
pub trait GenerationBackend: Send + Sync {
    /// Upload a local image and return the name the server stored it under.
    fn upload_image(&self, path: &Path) -> impl Future<Output = Result<String>> + Send;

    /// Queue a workflow and return its `prompt_id`.
    fn submit(&self, workflow: &Workflow) -> impl Future<Output = Result<String>> + Send;

    /// Wait for the first output image of `prompt_id`.
    fn poll_for_result<F>(
        &self,
        prompt_id: &str,
        timeout: Duration,
        poll_interval: Duration,
        is_cancelled: F,
    ) -> impl Future<Output = Result<ImageRef>> + Send
    where
        F: Fn() -> bool + Send + Sync;

    /// Download an output image to `dest`.
    fn download(&self, image: &ImageRef, dest: &Path) -> impl Future<Output = Result<PathBuf>> + Send;
}

impl<T: GenerationBackend> GenerationBackend for &T {
    fn upload_image(&self, path: &Path) -> impl Future<Output = Result<String>> + Send {
        (**self).upload_image(path)
    }

    fn submit(&self, workflow: &Workflow) -> impl Future<Output = Result<String>> + Send {
        (**self).submit(workflow)
    }

    fn poll_for_result<F>(
        &self,
        prompt_id: &str,
        timeout: Duration,
        poll_interval: Duration,
        is_cancelled: F,
    ) -> impl Future<Output = Result<ImageRef>> + Send
    where
        F: Fn() -> bool + Send + Sync,
    {
        (**self).poll_for_result(prompt_id, timeout, poll_interval, is_cancelled)
    }

    fn download(&self, image: &ImageRef, dest: &Path) -> impl Future<Output = Result<PathBuf>> + Send {
        (**self).download(image, dest)
    }
}

/// Client for a ComfyUI server speaking HTTP/1.1 over raw sockets.
///
/// Every call opens a fresh connection; see [`HttpTransport`].
///
/// # Example
/// ```no_run
/// use comfy_i2i::{ClientConfig, ComfyClient};
///
/// # async fn example() -> comfy_i2i::Result<()> {
/// let client = ComfyClient::new(ClientConfig::default());
/// let online = client.health().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ComfyClient {
    transport: HttpTransport,
    config: ClientConfig,
    client_id: String,
}

impl ComfyClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            transport: HttpTransport::new(config.host.clone(), config.port),
            config,
            client_id: "comfy-i2i".to_string(),
        }
    }

    /// Set the client ID sent alongside queued prompts.
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let limit = self.config.request_timeout;
        tokio::time::timeout(limit, self.transport.exchange(&request))
            .await
            .map_err(|_| ComfyError::Timeout(limit))?
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Check whether ComfyUI answers `/system_stats` with a 2xx.
    pub async fn health(&self) -> Result<bool> {
        let resp = self
            .send(HttpRequest::get("/system_stats").allow_errors())
            .await?;
        Ok(resp.is_success())
    }

    // ── Upload ──────────────────────────────────────────────────────

    /// Upload a source image through `/upload/image`.
    ///
    /// Returns the server-side name to put into the workflow's `LoadImage`
    /// node (prefixed with the subfolder when the server reports one).
    #[tracing::instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn upload_image(&self, path: &Path) -> Result<String> {
        if !path.is_file() {
            return Err(ComfyError::io(
                format!("Source image does not exist: {}", path.display()),
                std::io::ErrorKind::NotFound.into(),
            ));
        }
        if !is_supported_image(path) {
            return Err(ComfyError::Config(
                "Unsupported source image type (use PNG/JPG/WEBP/BMP).".into(),
            ));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ComfyError::io(format!("Cannot read source file {}", path.display()), e))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source.png".to_string());

        let boundary = format!("----ComfyI2IBoundary{:016x}", rand::rng().random::<u64>());
        let body = multipart_body(&boundary, &filename, &bytes);
        tracing::info!(bytes = body.len(), "Uploading source image");

        let resp = self
            .send(
                HttpRequest::post("/upload/image")
                    .header(
                        "Content-Type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .binary(body),
            )
            .await?;

        let json = parse_json(&resp, "/upload/image")?;
        let name = json
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ComfyError::Protocol(format!("Upload failed - no filename returned: {}", resp.text()))
            })?;
        let stored = match json.get("subfolder").and_then(Value::as_str) {
            Some(sub) if !sub.is_empty() => format!("{sub}/{name}"),
            _ => name.to_string(),
        };
        tracing::info!(stored = %stored, "Upload successful");
        Ok(stored)
    }

    // ── Prompt ──────────────────────────────────────────────────────

    /// Queue a workflow for execution. Returns the `prompt_id`.
    pub async fn submit(&self, workflow: &Workflow) -> Result<String> {
        let body = serde_json::json!({
            "prompt": workflow.to_value(),
            "client_id": self.client_id,
        });
        let resp = self
            .send(
                HttpRequest::post("/prompt")
                    .header("Content-Type", "application/json")
                    .text(serde_json::to_string(&body)?),
            )
            .await?;

        let json = parse_json(&resp, "/prompt")?;

        if let Some(errors) = json.get("node_errors").and_then(Value::as_object) {
            if !errors.is_empty() {
                return Err(ComfyError::NodeErrors(
                    serde_json::to_string_pretty(errors).unwrap_or_default(),
                ));
            }
        }

        json.get("prompt_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ComfyError::Protocol(format!("Unexpected /prompt response: {}", resp.text()))
            })
    }

    // ── History ─────────────────────────────────────────────────────

    /// Fetch the first output image for a prompt. `None` while not ready.
    ///
    /// Non-2xx statuses and empty bodies mean "not ready yet".
    pub async fn history(&self, prompt_id: &str) -> Result<Option<ImageRef>> {
        let path = format!("/history/{prompt_id}");
        let resp = self
            .send(
                HttpRequest::get(path.as_str())
                    .header("Accept", "application/json")
                    .allow_errors(),
            )
            .await?;

        if resp.status != 200 || resp.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let json = parse_json(&resp, &path)?;
        first_output_image(&json, prompt_id)
    }

    /// Poll `/history/{id}` until an output image appears.
    ///
    /// `is_cancelled` is checked before every query; once it returns true no
    /// further request is made and [`ComfyError::Cancelled`] is returned.
    #[tracing::instrument(skip(self, is_cancelled))]
    pub async fn poll_for_result<F>(
        &self,
        prompt_id: &str,
        timeout: Duration,
        poll_interval: Duration,
        is_cancelled: F,
    ) -> Result<ImageRef>
    where
        F: Fn() -> bool + Send + Sync,
    {
        let start = Instant::now();
        loop {
            if is_cancelled() {
                return Err(ComfyError::Cancelled);
            }
            if start.elapsed() > timeout {
                return Err(ComfyError::Timeout(timeout));
            }
            if let Some(image) = self.history(prompt_id).await? {
                tracing::debug!(filename = %image.filename, "Output ready");
                return Ok(image);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    // ── Image download ──────────────────────────────────────────────

    /// Download an output image to `dest`, overwriting any existing file.
    pub async fn download(&self, image: &ImageRef, dest: &Path) -> Result<PathBuf> {
        let resp = self.send(HttpRequest::get(image.view_path())).await?;
        tokio::fs::write(dest, &resp.body)
            .await
            .map_err(|e| ComfyError::io(format!("Cannot write file {}", dest.display()), e))?;
        if !dest.is_file() {
            return Err(ComfyError::io(
                format!("Download failed: {}", dest.display()),
                std::io::ErrorKind::NotFound.into(),
            ));
        }
        tracing::debug!(path = %dest.display(), bytes = resp.body.len(), "Downloaded output");
        Ok(dest.to_path_buf())
    }
}

impl GenerationBackend for ComfyClient {
    async fn upload_image(&self, path: &Path) -> Result<String> {
        ComfyClient::upload_image(self, path).await
    }

    async fn submit(&self, workflow: &Workflow) -> Result<String> {
        ComfyClient::submit(self, workflow).await
    }

    async fn poll_for_result<F>(
        &self,
        prompt_id: &str,
        timeout: Duration,
        poll_interval: Duration,
        is_cancelled: F,
    ) -> Result<ImageRef>
    where
        F: Fn() -> bool + Send + Sync,
    {
        ComfyClient::poll_for_result(self, prompt_id, timeout, poll_interval, is_cancelled).await
    }

    async fn download(&self, image: &ImageRef, dest: &Path) -> Result<PathBuf> {
        ComfyClient::download(self, image, dest).await
    }
}

fn parse_json(resp: &HttpResponse, path: &str) -> Result<Value> {
    serde_json::from_slice(&resp.body).map_err(|e| {
        ComfyError::Protocol(format!("JSON parse error from {path}: {e}: {}", resp.text()))
    })
}

/// First image across all output groups of a `/history` payload.
fn first_output_image(history: &Value, prompt_id: &str) -> Result<Option<ImageRef>> {
    let Some(outputs) = history
        .get(prompt_id)
        .and_then(|entry| entry.get("outputs"))
        .and_then(Value::as_object)
    else {
        return Ok(None);
    };

    let first = outputs.values().find_map(|group| {
        group
            .get("images")
            .and_then(Value::as_array)
            .and_then(|imgs| imgs.first())
    });
    match first {
        Some(img) => serde_json::from_value(img.clone())
            .map(Some)
            .map_err(|e| ComfyError::Protocol(format!("Bad image descriptor in history: {e}"))),
        None => Ok(None),
    }
}

/// Single-part `multipart/form-data` body carrying the file as field `image`.
pub(crate) fn multipart_body(boundary: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let filename = filename.replace('"', "_");
    let prefix = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    );
    let suffix = format!("\r\n--{boundary}--\r\n");

    let mut body = Vec::with_capacity(prefix.len() + bytes.len() + suffix.len());
    body.extend_from_slice(prefix.as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(suffix.as_bytes());
    body
}
