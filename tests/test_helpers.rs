#![allow(dead_code)]

use comfy_i2i::*;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ── Fake ComfyUI server ─────────────────────────────────────────────

/// A request as the fake server saw it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub head: String,
    pub body: Vec<u8>,
}

impl SeenRequest {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct FakeServer {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<SeenRequest>>>,
}

impl FakeServer {
    pub fn config(&self) -> ClientConfig {
        ClientConfig::builder()
            .with_host("127.0.0.1")
            .with_port(self.port)
            .with_poll_interval(Duration::from_millis(5))
            .with_timeout(Duration::from_secs(5))
            .with_request_timeout(Duration::from_secs(5))
            .build()
    }

    pub fn client(&self) -> ComfyClient {
        ComfyClient::new(self.config())
    }

    pub fn count(&self, path_prefix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path.starts_with(path_prefix))
            .count()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a server answering every request with whatever `handler` returns
/// as raw response bytes.
pub async fn spawn_server<H>(handler: H) -> FakeServer
where
    H: Fn(&SeenRequest) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let log = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let handler = handler.clone();
            let log = log.clone();
            tokio::spawn(async move {
                serve_one(stream, handler.as_ref(), &log).await;
            });
        }
    });

    FakeServer { port, requests }
}

async fn serve_one<H>(mut stream: TcpStream, handler: &H, log: &Mutex<Vec<SeenRequest>>)
where
    H: Fn(&SeenRequest) -> Vec<u8>,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
        }
    }

    let mut request_line = head.lines().next().unwrap_or("").split_whitespace();
    let request = SeenRequest {
        method: request_line.next().unwrap_or("").to_string(),
        path: request_line.next().unwrap_or("").to_string(),
        head: head.clone(),
        body,
    };
    log.lock().unwrap().push(request.clone());

    let response = handler(&request);
    let _ = stream.write_all(&response).await;
    let _ = stream.shutdown().await;
}

/// Raw HTTP/1.1 response with a body.
pub fn respond(status: u16, body: impl AsRef<[u8]>) -> Vec<u8> {
    let body = body.as_ref();
    let mut out = format!(
        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

pub fn history_with_image(prompt_id: &str, filename: &str) -> String {
    let mut root = serde_json::Map::new();
    root.insert(
        prompt_id.to_string(),
        json!({
            "outputs": {
                "9": {"images": [{"filename": filename, "subfolder": "", "type": "output"}]}
            }
        }),
    );
    serde_json::Value::Object(root).to_string()
}

/// Port nothing is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

// ── Workflows and files ─────────────────────────────────────────────

pub fn img2img_json() -> serde_json::Value {
    json!({
        "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "sdxl.safetensors"}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
        "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
        "10": {"class_type": "LoadImage", "inputs": {"image": "example.png"}},
        "12": {"class_type": "ImageScale", "inputs": {"width": 512, "height": 512, "image": ["10", 0]}},
        "3": {"class_type": "KSampler", "inputs": {
            "seed": 0, "steps": 20, "cfg": 8.0, "sampler_name": "euler",
            "scheduler": "normal", "denoise": 1.0, "model": ["4", 0]
        }},
        "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "ComfyUI", "images": ["8", 0]}}
    })
}

pub fn img2img() -> Workflow {
    Workflow::from_value(img2img_json()).unwrap()
}

pub fn write_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"\x89PNG\r\n\x1a\nfake").unwrap();
    path
}

pub fn fast_config() -> ClientConfig {
    ClientConfig::builder()
        .with_poll_interval(Duration::from_millis(1))
        .with_timeout(Duration::from_millis(200))
        .build()
}

// ── Mock backend ────────────────────────────────────────────────────

/// In-memory backend recording everything the runner asks of it.
#[derive(Default)]
pub struct MockBackend {
    pub uploads: Mutex<Vec<PathBuf>>,
    pub submitted: Mutex<Vec<Workflow>>,
    pub polls: AtomicUsize,
    pub fail_upload: bool,
    /// 0-based submission whose poll times out.
    pub fail_poll_at: Option<usize>,
    /// Cancel this token while polling the given submission.
    pub cancel_on_poll: Option<(usize, CancelToken)>,
}

impl MockBackend {
    pub fn submitted(&self) -> Vec<Workflow> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

impl GenerationBackend for MockBackend {
    async fn upload_image(&self, path: &Path) -> Result<String> {
        self.uploads.lock().unwrap().push(path.to_path_buf());
        if self.fail_upload {
            return Err(ComfyError::Http {
                status: 500,
                path: "/upload/image".into(),
                body: "disk full".into(),
            });
        }
        Ok("uploaded.png".to_string())
    }

    async fn submit(&self, workflow: &Workflow) -> Result<String> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(workflow.clone());
        Ok(format!("p{}", submitted.len() - 1))
    }

    async fn poll_for_result<F>(
        &self,
        prompt_id: &str,
        timeout: Duration,
        _poll_interval: Duration,
        is_cancelled: F,
    ) -> Result<ImageRef>
    where
        F: Fn() -> bool + Send + Sync,
    {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let n: usize = prompt_id.trim_start_matches('p').parse().unwrap();
        if let Some((at, token)) = &self.cancel_on_poll {
            if *at == n {
                token.cancel();
            }
        }
        if is_cancelled() {
            return Err(ComfyError::Cancelled);
        }
        if self.fail_poll_at == Some(n) {
            return Err(ComfyError::Timeout(timeout));
        }
        Ok(ImageRef::new(format!("out_{n}.png")))
    }

    async fn download(&self, image: &ImageRef, dest: &Path) -> Result<PathBuf> {
        tokio::fs::write(dest, image.filename.as_bytes()).await.unwrap();
        Ok(dest.to_path_buf())
    }
}

// ── Fake host ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeHost {
    pub composition: Option<Dimensions>,
    pub source: Option<PathBuf>,
    /// Where renders actually land; `None` honours the requested path.
    pub render_to: Option<PathBuf>,
    pub project: Option<PathBuf>,
    pub rendered: Mutex<Vec<PathBuf>>,
    pub imported: Mutex<Vec<PathBuf>>,
}

impl HostBridge for FakeHost {
    fn composition_size(&self) -> Option<Dimensions> {
        self.composition
    }

    fn source_image_path(&self) -> Option<PathBuf> {
        self.source.clone()
    }

    fn render_source_to_file(&self, requested: &Path) -> Result<PathBuf> {
        let path = self.render_to.clone().unwrap_or_else(|| requested.to_path_buf());
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nrendered").unwrap();
        self.rendered.lock().unwrap().push(path.clone());
        Ok(path)
    }

    fn import_still(&self, path: &Path) -> Result<()> {
        self.imported.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    fn project_dir(&self) -> Option<PathBuf> {
        self.project.clone()
    }
}
