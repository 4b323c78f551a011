//! # comfy-i2i
//!
//! Async image-to-image orchestration for [ComfyUI](https://github.com/comfyanonymous/ComfyUI).
//!
//! Takes an API-format workflow and a source image, then for each variation
//! rewrites a fresh copy of the workflow (prompts, sampler settings, size,
//! input image), queues it, polls `/history` until an output appears and
//! downloads it. HTTP is spoken directly over TCP, one connection per call.
//!
//! ## Quick Start
//!
//! ```no_run
//! use comfy_i2i::{
//!     ClientConfig, ComfyClient, GenerationParams, SeedMode, VariationRunner, Workflow,
//! };
//! use std::path::Path;
//!
//! # async fn example() -> comfy_i2i::Result<()> {
//! let config = ClientConfig::default();
//! let runner = VariationRunner::new(ComfyClient::new(config.clone())).with_timing(&config);
//!
//! let workflow = Workflow::from_file(Path::new("i2i_api.json"))?;
//! let params = GenerationParams::new("ink drawing, cross hatching")
//!     .denoise(0.6)
//!     .denoise_increment(-0.1)
//!     .seed(SeedMode::Fixed(42))
//!     .variations(3);
//!
//! let ledger = runner
//!     .run(&workflow, &params, Path::new("frame.png"), Path::new("out"))
//!     .await?;
//! println!("{}", ledger.summary());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod orchestrator;
pub mod params;
pub mod resolve;
pub mod session;
pub mod transport;
pub mod types;
pub mod workflow;

pub use client::{ComfyClient, GenerationBackend};
pub use config::{ClientConfig, ClientConfigBuilder, Settings};
pub use error::{ComfyError, Result};
pub use host::HostBridge;
pub use orchestrator::{
    CancelToken, RunLedger, RunProgress, RunStage, VariationFailure, VariationPlan, VariationRunner,
};
pub use params::{GenerationParams, SeedMode};
pub use resolve::{resolve_dimensions, resolve_output_dir, snap_and_clamp, DimensionSpec};
pub use session::{GenerationSession, SessionOptions, SessionReport, SourceMode};
pub use transport::{HttpRequest, HttpResponse, HttpTransport};
pub use types::{Dimensions, ImageRef};
pub use workflow::{NodeRole, SamplerParams, Workflow};
