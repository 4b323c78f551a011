use crate::error::{ComfyError, Result};
use crate::resolve::sanitize_text;
use crate::types::Dimensions;
use crate::workflow::SamplerParams;

/// Sampler choices offered to users.
pub const SAMPLERS: &[&str] = &["euler", "euler_a", "dpmpp_2m", "dpmpp_sde", "lcm"];

/// Scheduler choices offered to users. `"none"` keeps the workflow's own value.
pub const SCHEDULERS: &[&str] = &["none", "karras", "exponential", "sgm_uniform"];

pub const MAX_STEPS: u32 = 80;
pub const MAX_CFG: f64 = 20.0;
pub const MAX_VARIATIONS: u32 = 10;

/// How each variation picks its seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedMode {
    /// Every variation uses this seed.
    Fixed(u32),
    /// Every variation draws a fresh random 32-bit seed.
    Random,
}

/// User-facing parameters for one generation run.
///
/// # Example
/// ```
/// use comfy_i2i::{GenerationParams, SeedMode};
///
/// let params = GenerationParams::new("oil painting, thick brush strokes")
///     .negative("blurry, lowres")
///     .denoise(0.55)
///     .steps(28)
///     .seed(SeedMode::Fixed(1234))
///     .variations(3)
///     .denoise_increment(-0.1)
///     .normalized()
///     .unwrap();
///
/// assert_eq!(params.variations, 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    /// Inject the negative prompt when the workflow has a second text encoder.
    pub negative_enabled: bool,
    pub denoise: f64,
    pub steps: u32,
    pub cfg_scale: f64,
    pub sampler: String,
    /// `None` leaves the workflow's scheduler as-is.
    pub scheduler: Option<String>,
    pub size: Dimensions,
    pub seed_mode: SeedMode,
    pub variations: u32,
    /// Added to `denoise` once per variation index.
    pub denoise_increment: f64,
}

impl GenerationParams {
    /// Create parameters with defaults: denoise 0.5, 30 steps, cfg 7.0,
    /// `euler`, workflow scheduler, 1024x1024, random seed, one variation.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            negative_enabled: false,
            denoise: 0.5,
            steps: 30,
            cfg_scale: 7.0,
            sampler: "euler".to_string(),
            scheduler: None,
            size: Dimensions::new(1024, 1024),
            seed_mode: SeedMode::Random,
            variations: 1,
            denoise_increment: 0.0,
        }
    }

    /// Set and enable the negative prompt.
    pub fn negative(mut self, prompt: impl Into<String>) -> Self {
        self.negative_prompt = prompt.into();
        self.negative_enabled = true;
        self
    }

    pub fn denoise(mut self, denoise: f64) -> Self {
        self.denoise = denoise;
        self
    }

    pub fn steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn cfg_scale(mut self, cfg: f64) -> Self {
        self.cfg_scale = cfg;
        self
    }

    pub fn sampler(mut self, sampler: impl Into<String>) -> Self {
        self.sampler = sampler.into();
        self
    }

    /// Set the scheduler. `"none"` or an empty string means "do not set".
    pub fn scheduler(mut self, scheduler: impl Into<String>) -> Self {
        let scheduler = scheduler.into();
        self.scheduler = match scheduler.as_str() {
            "" | "none" => None,
            _ => Some(scheduler),
        };
        self
    }

    pub fn size(mut self, size: Dimensions) -> Self {
        self.size = size;
        self
    }

    pub fn seed(mut self, mode: SeedMode) -> Self {
        self.seed_mode = mode;
        self
    }

    pub fn variations(mut self, count: u32) -> Self {
        self.variations = count;
        self
    }

    pub fn denoise_increment(mut self, increment: f64) -> Self {
        self.denoise_increment = increment;
        self
    }

    /// Sanitize prompts and clamp numeric fields into their accepted ranges.
    ///
    /// Fails when the sanitized positive prompt is empty or the size has a
    /// zero side.
    pub fn normalized(&self) -> Result<Self> {
        let prompt = sanitize_text(&self.prompt);
        if prompt.is_empty() {
            return Err(ComfyError::Config("Prompt cannot be empty.".into()));
        }
        if self.size.width == 0 || self.size.height == 0 {
            return Err(ComfyError::Config(format!(
                "Invalid output size {}",
                self.size
            )));
        }
        let finite_or = |v: f64, fallback: f64| if v.is_finite() { v } else { fallback };

        Ok(Self {
            prompt,
            negative_prompt: sanitize_text(&self.negative_prompt),
            denoise: finite_or(self.denoise, 0.5).clamp(0.0, 1.0),
            steps: self.steps.clamp(1, MAX_STEPS),
            cfg_scale: finite_or(self.cfg_scale, 7.0).clamp(1.0, MAX_CFG),
            variations: self.variations.clamp(1, MAX_VARIATIONS),
            denoise_increment: finite_or(self.denoise_increment, 0.0),
            scheduler: self
                .scheduler
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty() && *s != "none")
                .map(str::to_string),
            ..self.clone()
        })
    }

    /// Denoise for variation `index`: `denoise + denoise_increment * index`,
    /// kept inside [0, 1]. The increment applies in both seed modes.
    pub fn denoise_for(&self, index: u32) -> f64 {
        (self.denoise + self.denoise_increment * index as f64).clamp(0.0, 1.0)
    }

    /// Whether the increment is meaningful to show to a user: fixed seed and
    /// more than one variation.
    pub fn increment_is_visible(&self) -> bool {
        matches!(self.seed_mode, SeedMode::Fixed(_)) && self.variations > 1
    }

    /// Sampler inputs for one variation.
    pub fn sampler_params(&self, seed: u32, denoise: f64) -> SamplerParams {
        SamplerParams {
            seed: Some(seed),
            steps: Some(self.steps),
            cfg: Some(self.cfg_scale),
            sampler: Some(self.sampler.clone()),
            scheduler: self.scheduler.clone(),
            denoise: Some(denoise),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = GenerationParams::new("a cat");
        assert_eq!(p.denoise, 0.5);
        assert_eq!(p.steps, 30);
        assert_eq!(p.cfg_scale, 7.0);
        assert_eq!(p.sampler, "euler");
        assert_eq!(p.scheduler, None);
        assert_eq!(p.seed_mode, SeedMode::Random);
        assert_eq!(p.variations, 1);
        assert!(!p.negative_enabled);
    }

    #[test]
    fn test_scheduler_none_means_unset() {
        assert_eq!(GenerationParams::new("x").scheduler("none").scheduler, None);
        assert_eq!(
            GenerationParams::new("x").scheduler("karras").scheduler.as_deref(),
            Some("karras")
        );
    }

    #[test]
    fn test_normalized_drops_none_scheduler_set_directly() {
        let mut p = GenerationParams::new("x");
        p.scheduler = Some("none".into());
        assert_eq!(p.normalized().unwrap().scheduler, None);

        p.scheduler = Some(" ".into());
        assert_eq!(p.normalized().unwrap().scheduler, None);

        p.scheduler = Some("karras".into());
        assert_eq!(p.normalized().unwrap().scheduler.as_deref(), Some("karras"));
    }

    #[test]
    fn test_normalized_clamps() {
        let p = GenerationParams::new("  a\x07 cat \n")
            .negative("\x00ugly ")
            .denoise(1.7)
            .steps(500)
            .cfg_scale(0.2)
            .variations(0)
            .normalized()
            .unwrap();
        assert_eq!(p.prompt, "a cat");
        assert_eq!(p.negative_prompt, "ugly");
        assert_eq!(p.denoise, 1.0);
        assert_eq!(p.steps, 80);
        assert_eq!(p.cfg_scale, 1.0);
        assert_eq!(p.variations, 1);

        let many = GenerationParams::new("x").variations(99).normalized().unwrap();
        assert_eq!(many.variations, 10);
    }

    #[test]
    fn test_normalized_rejects_empty_prompt() {
        let err = GenerationParams::new(" \x01\t ").normalized().unwrap_err();
        assert!(matches!(err, ComfyError::Config(_)));
    }

    #[test]
    fn test_normalized_rejects_zero_size() {
        let p = GenerationParams::new("x").size(Dimensions::new(0, 512));
        assert!(p.normalized().is_err());
    }

    #[test]
    fn test_denoise_drift() {
        let p = GenerationParams::new("x")
            .denoise(0.5)
            .denoise_increment(-0.1)
            .seed(SeedMode::Fixed(9))
            .variations(3);
        let values: Vec<f64> = (0..3).map(|i| p.denoise_for(i)).collect();
        for (got, want) in values.iter().zip([0.5, 0.4, 0.3]) {
            assert!((got - want).abs() < 1e-9, "{got} != {want}");
        }
        assert!(p.increment_is_visible());
    }

    #[test]
    fn test_denoise_drift_applies_with_random_seed() {
        let p = GenerationParams::new("x").denoise(0.2).denoise_increment(0.3);
        assert!((p.denoise_for(1) - 0.5).abs() < 1e-9);
        assert_eq!(p.denoise_for(5), 1.0);
        assert!(!p.increment_is_visible());
    }

    #[test]
    fn test_sampler_params() {
        let sp = GenerationParams::new("x")
            .steps(12)
            .scheduler("karras")
            .sampler_params(77, 0.35);
        assert_eq!(sp.seed, Some(77));
        assert_eq!(sp.steps, Some(12));
        assert_eq!(sp.scheduler.as_deref(), Some("karras"));
        assert_eq!(sp.denoise, Some(0.35));
    }
}
