//! Sequential variation runs: upload once, then prepare, submit, poll and
//! download each variation from its own copy of the base workflow.

use rand::Rng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crate::client::GenerationBackend;
use crate::config::ClientConfig;
use crate::error::{ComfyError, Result};
use crate::params::{GenerationParams, SeedMode};
use crate::workflow::Workflow;

/// Shared stop flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. In-flight requests finish; nothing new is sent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear the flag before starting a new run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStage {
    Uploading,
    Preparing,
    Submitting,
    Polling,
    Downloading,
    Done,
    Cancelled,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStage::Uploading => "uploading",
            RunStage::Preparing => "preparing",
            RunStage::Submitting => "submitting",
            RunStage::Polling => "polling",
            RunStage::Downloading => "downloading",
            RunStage::Done => "done",
            RunStage::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Progress notification passed to [`VariationRunner::run_with_progress`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunProgress {
    /// 1-based variation number, `None` outside the variation loop.
    pub variation: Option<u32>,
    pub total: u32,
    pub stage: RunStage,
}

/// Seed and denoise chosen for one variation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariationPlan {
    /// 0-based.
    pub index: u32,
    pub seed: u32,
    pub denoise: f64,
}

impl VariationPlan {
    /// Same seed for every index in fixed mode, a fresh draw otherwise.
    pub fn new<R: Rng>(params: &GenerationParams, index: u32, rng: &mut R) -> Self {
        let seed = match params.seed_mode {
            SeedMode::Fixed(seed) => seed,
            SeedMode::Random => rng.random::<u32>(),
        };
        Self {
            index,
            seed,
            denoise: params.denoise_for(index),
        }
    }
}

/// Why one variation did not produce an output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationFailure {
    /// 0-based.
    pub index: u32,
    pub stage: RunStage,
    pub message: String,
}

/// Outcome of a run: counts, produced files in order, and failure records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLedger {
    pub success_count: u32,
    pub fail_count: u32,
    pub outputs: Vec<PathBuf>,
    pub failures: Vec<VariationFailure>,
    pub cancelled: bool,
}

impl RunLedger {
    /// One-line summary for the user.
    pub fn summary(&self) -> String {
        let mut msg = format!("Generated {} variation(s)", self.success_count);
        if self.fail_count > 0 {
            msg.push_str(&format!(" ({} failed)", self.fail_count));
        }
        if self.cancelled {
            msg.push_str(" (cancelled)");
        }
        msg
    }
}

/// Local file name for a downloaded output: `comfy_<prompt_id>_<name>`.
pub fn output_file_name(prompt_id: &str, server_filename: &str) -> String {
    let base = Path::new(server_filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| server_filename.to_string());
    format!("comfy_{prompt_id}_{base}")
}

/// Copy `base` and apply everything one variation needs.
pub fn prepare_workflow(
    base: &Workflow,
    params: &GenerationParams,
    plan: &VariationPlan,
    uploaded_image: &str,
) -> Result<Workflow> {
    let mut wf = base.clone();

    let positive_id = wf.inject_positive_prompt(&params.prompt)?;
    if params.negative_enabled {
        if let Some(negative_id) = wf.find_second_text_node(&positive_id) {
            wf.inject_negative_prompt(&params.negative_prompt, &negative_id);
        }
    }

    let touched = wf.apply_dimensions(params.size.width, params.size.height);
    if touched.is_empty() {
        tracing::debug!(size = %params.size, "No node with width/height inputs");
    }

    if wf
        .set_sampler_params(&params.sampler_params(plan.seed, plan.denoise))
        .is_none()
    {
        tracing::warn!("No sampler node found; sampler settings not applied");
    }
    wf.set_load_image(uploaded_image)?;
    Ok(wf)
}

/// Drives N sequential generations from one base workflow.
///
/// Failures are recorded per variation and the loop moves on; only
/// cancellation or a failed upload ends a run early.
pub struct VariationRunner<B> {
    backend: B,
    cancel: CancelToken,
    timeout: Duration,
    poll_interval: Duration,
}

impl<B: GenerationBackend> VariationRunner<B> {
    /// Create a runner using the default polling budget (1 s interval, 180 s timeout).
    pub fn new(backend: B) -> Self {
        let defaults = ClientConfig::default();
        Self {
            backend,
            cancel: CancelToken::new(),
            timeout: defaults.timeout,
            poll_interval: defaults.poll_interval,
        }
    }

    /// Share a cancellation token with the caller.
    pub fn with_cancellation(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Take the timeout and poll interval from a client config.
    pub fn with_timing(mut self, config: &ClientConfig) -> Self {
        self.timeout = config.timeout;
        self.poll_interval = config.poll_interval;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run every variation without progress reporting.
    pub async fn run(
        &self,
        base: &Workflow,
        params: &GenerationParams,
        source_image: &Path,
        output_dir: &Path,
    ) -> Result<RunLedger> {
        self.run_with_progress(base, params, source_image, output_dir, |_| {})
            .await
    }

    /// Run every variation, calling `on_progress` at each stage change.
    ///
    /// Returns `Err` only for setup problems (invalid parameters, failed
    /// upload). Per-variation errors end up in the ledger.
    #[tracing::instrument(skip_all, fields(variations = params.variations))]
    pub async fn run_with_progress<F>(
        &self,
        base: &Workflow,
        params: &GenerationParams,
        source_image: &Path,
        output_dir: &Path,
        mut on_progress: F,
    ) -> Result<RunLedger>
    where
        F: FnMut(RunProgress),
    {
        let params = params.normalized()?;
        let total = params.variations;
        let mut ledger = RunLedger::default();

        tracing::info!(
            seed_mode = ?params.seed_mode,
            denoise = params.denoise,
            increment = params.denoise_increment,
            size = %params.size,
            "Starting generation run"
        );

        if self.cancel.is_cancelled() {
            ledger.cancelled = true;
            on_progress(RunProgress { variation: None, total, stage: RunStage::Cancelled });
            return Ok(ledger);
        }

        on_progress(RunProgress { variation: None, total, stage: RunStage::Uploading });
        let uploaded = self.backend.upload_image(source_image).await?;

        for index in 0..total {
            if self.cancel.is_cancelled() {
                tracing::info!(variation = index + 1, "Cancelled by user");
                ledger.cancelled = true;
                break;
            }

            let plan = VariationPlan::new(&params, index, &mut rand::rng());
            tracing::info!(
                variation = index + 1,
                total,
                seed = plan.seed,
                denoise = plan.denoise,
                "Starting variation"
            );

            let mut stage = RunStage::Preparing;
            let result = self
                .run_variation(
                    base,
                    &params,
                    &plan,
                    &uploaded,
                    output_dir,
                    total,
                    &mut stage,
                    &mut on_progress,
                )
                .await;

            match result {
                Ok(path) => {
                    tracing::info!(variation = index + 1, path = %path.display(), "Variation complete");
                    ledger.success_count += 1;
                    ledger.outputs.push(path);
                }
                Err(ComfyError::Cancelled) => {
                    tracing::info!(variation = index + 1, stage = %stage, "Cancelled by user");
                    ledger.cancelled = true;
                    break;
                }
                Err(e) => {
                    tracing::error!(variation = index + 1, stage = %stage, error = %e, "Variation failed");
                    ledger.fail_count += 1;
                    ledger.failures.push(VariationFailure {
                        index,
                        stage,
                        message: e.to_string(),
                    });
                }
            }
        }

        let stage = if ledger.cancelled { RunStage::Cancelled } else { RunStage::Done };
        on_progress(RunProgress { variation: None, total, stage });
        tracing::info!(summary = %ledger.summary(), "Generation run finished");
        Ok(ledger)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_variation<F>(
        &self,
        base: &Workflow,
        params: &GenerationParams,
        plan: &VariationPlan,
        uploaded: &str,
        output_dir: &Path,
        total: u32,
        stage: &mut RunStage,
        on_progress: &mut F,
    ) -> Result<PathBuf>
    where
        F: FnMut(RunProgress),
    {
        let variation = Some(plan.index + 1);
        let mut enter = |next: RunStage, stage: &mut RunStage| {
            *stage = next;
            on_progress(RunProgress { variation, total, stage: next });
        };

        enter(RunStage::Preparing, stage);
        let workflow = prepare_workflow(base, params, plan, uploaded)?;

        enter(RunStage::Submitting, stage);
        let prompt_id = self.backend.submit(&workflow).await?;
        tracing::info!(variation = plan.index + 1, prompt_id = %prompt_id, "Prompt queued");

        enter(RunStage::Polling, stage);
        let cancel = &self.cancel;
        let image = self
            .backend
            .poll_for_result(&prompt_id, self.timeout, self.poll_interval, || {
                cancel.is_cancelled()
            })
            .await?;

        enter(RunStage::Downloading, stage);
        let dest = output_dir.join(output_file_name(&prompt_id, &image.filename));
        self.backend.download(&image, &dest).await
    }
}
