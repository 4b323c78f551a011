//! Input resolution: dimension snapping, prompt sanitizing, host/port checks
//! and output folder selection.

use std::path::{Path, PathBuf};

use crate::error::{ComfyError, Result};
use crate::types::Dimensions;

/// Default snap unit; SDXL-class models want multiples of 64.
pub const DEFAULT_SNAP: u32 = 64;
/// Default cap applied to each axis when sizing from the composition.
pub const DEFAULT_MAX_SIDE: u32 = 2048;

/// Image extensions ComfyUI's `LoadImage` accepts.
pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

/// How the target size of a generation is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionSpec {
    /// Take the composition size, snap each axis to `snap` and cap it.
    FromComposition {
        snap: u32,
        max_width: Option<u32>,
        max_height: Option<u32>,
    },
    /// Use the given size verbatim.
    Explicit(Dimensions),
}

impl Default for DimensionSpec {
    fn default() -> Self {
        DimensionSpec::FromComposition {
            snap: DEFAULT_SNAP,
            max_width: Some(DEFAULT_MAX_SIDE),
            max_height: Some(DEFAULT_MAX_SIDE),
        }
    }
}

/// Round `value` to the nearest multiple of `snap`, cap at `max`, then realign
/// downward to `snap`.
///
/// The result is never below `snap` (or 1 when `snap <= 1`). A `max` of `None`
/// or `Some(0)` disables the cap.
pub fn snap_and_clamp(value: u32, snap: u32, max: Option<u32>) -> u32 {
    let unit = snap.max(1) as u64;
    let mut v = value as u64;

    if unit > 1 {
        // round half up
        let rounded = (v * 2 + unit) / (2 * unit) * unit;
        v = rounded.max(unit);
    }
    if let Some(cap) = max.filter(|m| *m > 0) {
        v = v.min(cap as u64);
    }
    if unit > 1 {
        v = v / unit * unit;
    }
    v.max(unit) as u32
}

/// Resolve the generation size against the composition size.
pub fn resolve_dimensions(spec: &DimensionSpec, composition: Dimensions) -> Result<Dimensions> {
    match *spec {
        DimensionSpec::FromComposition {
            snap,
            max_width,
            max_height,
        } => Ok(Dimensions::new(
            snap_and_clamp(composition.width, snap, max_width),
            snap_and_clamp(composition.height, snap, max_height),
        )),
        DimensionSpec::Explicit(dims) => {
            if dims.width == 0 || dims.height == 0 {
                return Err(ComfyError::Config(format!(
                    "Invalid output size {dims}: width and height must be positive"
                )));
            }
            Ok(dims)
        }
    }
}

/// Strip ASCII control characters (keeping `\t`, `\n` and `\r`) and trim.
pub fn sanitize_text(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{00}'..='\u{08}' | '\u{0B}'..='\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Validate a ComfyUI host. Accepts `localhost` or a dotted IPv4 address;
/// whitespace anywhere is ignored. Returns the normalized host.
pub fn validate_host(host: &str) -> Result<String> {
    let host: String = host.chars().filter(|c| !c.is_whitespace()).collect();
    if host.is_empty() {
        return Err(ComfyError::Config("Host cannot be empty".into()));
    }
    let dotted = {
        let groups: Vec<&str> = host.split('.').collect();
        groups.len() == 4
            && groups
                .iter()
                .all(|g| (1..=3).contains(&g.len()) && g.bytes().all(|b| b.is_ascii_digit()))
    };
    if !(host.eq_ignore_ascii_case("localhost") || dotted) {
        return Err(ComfyError::Config(
            "Invalid host format (use 'localhost' or IP address like '127.0.0.1')".into(),
        ));
    }
    Ok(host)
}

/// Validate a ComfyUI port given as text.
pub fn validate_port(port: &str) -> Result<u16> {
    let port: String = port.chars().filter(|c| !c.is_whitespace()).collect();
    if port.is_empty() {
        return Err(ComfyError::Config("Port cannot be empty".into()));
    }
    match port.parse::<u32>() {
        Ok(n) if (1..=65535).contains(&n) => Ok(n as u16),
        _ => Err(ComfyError::Config(
            "Port must be a number between 1 and 65535".into(),
        )),
    }
}

/// True when the path has an image extension ComfyUI can load.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            SUPPORTED_IMAGE_EXTENSIONS
                .iter()
                .any(|ok| ext.eq_ignore_ascii_case(ok))
        })
        .unwrap_or(false)
}

/// Pick where downloaded results go: an existing custom folder, else the
/// project folder, else the system temp directory.
pub fn resolve_output_dir(custom: Option<&Path>, project_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = custom {
        if dir.is_dir() {
            return dir.to_path_buf();
        }
        tracing::warn!(path = %dir.display(), "Custom output folder does not exist, falling back");
    }
    match project_dir {
        Some(dir) if dir.is_dir() => dir.to_path_buf(),
        _ => std::env::temp_dir(),
    }
}
