//! One user-initiated generation from start to cleanup.
//!
//! Setup problems (no composition, no workflow, bad source image, empty
//! prompt) fail before anything is sent to the server. Once variations are
//! running, per-variation errors land in the [`RunLedger`].

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::client::{ComfyClient, GenerationBackend};
use crate::config::Settings;
use crate::error::{ComfyError, Result};
use crate::host::HostBridge;
use crate::orchestrator::{CancelToken, RunLedger, RunProgress, VariationRunner};
use crate::params::GenerationParams;
use crate::resolve::{is_supported_image, resolve_dimensions, resolve_output_dir, DimensionSpec};
use crate::workflow::Workflow;

/// Where the source image comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceMode {
    /// The file behind the selected layer, as-is.
    #[default]
    RawFile,
    /// Ask the host to render the layer with effects and transforms.
    Rendered,
}

/// Per-run choices that are not generation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub source: SourceMode,
    /// Import outputs into the composition; otherwise they are deleted.
    pub add_to_composition: bool,
    pub dimensions: DimensionSpec,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            source: SourceMode::RawFile,
            add_to_composition: true,
            dimensions: DimensionSpec::default(),
        }
    }
}

/// Outcome of [`GenerationSession::generate`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub ledger: RunLedger,
    /// Number of outputs the host imported.
    pub imported: usize,
    /// Text suitable for a status line or dialog.
    pub message: String,
}

/// Ties settings, a host and a backend together for one generation.
pub struct GenerationSession<B, H> {
    runner: VariationRunner<B>,
    host: H,
    settings: Settings,
    settings_path: PathBuf,
    options: SessionOptions,
}

impl<H: HostBridge> GenerationSession<ComfyClient, H> {
    /// Validate host/port from `settings` and build a session talking to a
    /// real ComfyUI server.
    pub fn from_settings(settings: Settings, settings_path: impl Into<PathBuf>, host: H) -> Result<Self> {
        let config = settings.client_config()?;
        let runner = VariationRunner::new(ComfyClient::new(config.clone())).with_timing(&config);
        Ok(Self {
            runner,
            host,
            settings,
            settings_path: settings_path.into(),
            options: SessionOptions::default(),
        })
    }
}

impl<B: GenerationBackend, H: HostBridge> GenerationSession<B, H> {
    pub fn new(runner: VariationRunner<B>, host: H, settings: Settings, settings_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            host,
            settings,
            settings_path: settings_path.into(),
            options: SessionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Token that stops the run between requests.
    pub fn cancel_token(&self) -> &CancelToken {
        self.runner.cancel_token()
    }

    pub async fn generate(&self, params: GenerationParams) -> Result<SessionReport> {
        self.generate_with_progress(params, |_| {}).await
    }

    /// Run every variation and then import or discard the outputs.
    #[tracing::instrument(skip_all)]
    pub async fn generate_with_progress<F>(
        &self,
        params: GenerationParams,
        on_progress: F,
    ) -> Result<SessionReport>
    where
        F: FnMut(RunProgress),
    {
        let composition = self
            .host
            .composition_size()
            .ok_or_else(|| ComfyError::Config("No active comp.".into()))?;
        let workflow = Workflow::from_file(&self.settings.workflow_path()?)?;
        tracing::info!(nodes = workflow.len(), "Workflow loaded");

        let size = resolve_dimensions(&self.options.dimensions, composition)?;
        let params = params.size(size).normalized()?;
        tracing::info!(composition = %composition, size = %size, "Resolved output size");

        let project_dir = self.host.project_dir();
        let custom = self.settings.output_folder();
        let output_dir = resolve_output_dir(custom.as_deref(), project_dir.as_deref());

        let (source, rendered) = self.resolve_source(project_dir.as_deref())?;

        // a new generation starts uncancelled
        self.runner.cancel_token().reset();

        let result = self
            .runner
            .run_with_progress(&workflow, &params, &source, &output_dir, on_progress)
            .await;

        let ledger = match result {
            Ok(ledger) => ledger,
            Err(e) => {
                if let Some(path) = rendered.as_deref() {
                    remove_quietly(path).await;
                }
                return Err(e);
            }
        };

        let imported = if self.options.add_to_composition {
            self.import_outputs(&ledger.outputs)
        } else {
            for path in &ledger.outputs {
                remove_quietly(path).await;
            }
            0
        };

        if let Err(e) = self.settings.save(&self.settings_path) {
            tracing::warn!(error = %e, "Could not save settings");
        }
        if let Some(path) = rendered.as_deref() {
            remove_quietly(path).await;
        }

        let mut message = ledger.summary();
        if self.options.add_to_composition && imported > 0 {
            message.push_str("\nAdded to composition");
        }
        tracing::info!(%message, "Generation finished");
        Ok(SessionReport {
            ledger,
            imported,
            message,
        })
    }

    /// Pick the image to upload. The second element is a rendered temp file
    /// that must be removed afterwards.
    fn resolve_source(&self, project_dir: Option<&Path>) -> Result<(PathBuf, Option<PathBuf>)> {
        match self.options.source {
            SourceMode::Rendered => {
                let folder = match project_dir {
                    Some(dir) if dir.is_dir() => dir.to_path_buf(),
                    _ => std::env::temp_dir(),
                };
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or_default();
                let requested = folder.join(format!("comfy_source_{millis}.png"));
                let actual = self.host.render_source_to_file(&requested).map_err(|e| {
                    ComfyError::Config(format!("Failed to render layer: {e}"))
                })?;
                if !actual.is_file() {
                    return Err(ComfyError::Config(format!(
                        "Rendered source not found at {}",
                        actual.display()
                    )));
                }
                tracing::info!(path = %actual.display(), "Using rendered source");
                Ok((actual.clone(), Some(actual)))
            }
            SourceMode::RawFile => {
                let path = self.host.source_image_path().ok_or_else(|| {
                    ComfyError::Config(
                        "Selected layer isn't a still image footage. Use a rendered source for other layer types."
                            .into(),
                    )
                })?;
                if !is_supported_image(&path) {
                    return Err(ComfyError::Config(format!(
                        "Unsupported source type: {}. Use png, jpg, jpeg, webp or bmp.",
                        path.display()
                    )));
                }
                Ok((path, None))
            }
        }
    }

    fn import_outputs(&self, outputs: &[PathBuf]) -> usize {
        let mut imported = 0;
        for path in outputs {
            match self.host.import_still(path) {
                Ok(()) => imported += 1,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Import failed");
                }
            }
        }
        imported
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Could not remove file");
        }
    }
}
