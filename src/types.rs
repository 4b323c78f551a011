use serde::{Deserialize, Serialize};

fn default_output_type() -> String {
    "output".to_string()
}

/// Reference to an image stored in ComfyUI's output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_output_type")]
    pub img_type: String,
}

impl ImageRef {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            subfolder: String::new(),
            img_type: default_output_type(),
        }
    }

    /// Query path for ComfyUI's `/view` endpoint.
    pub fn view_path(&self) -> String {
        format!(
            "/view?filename={}&subfolder={}&type={}",
            urlencoding::encode(&self.filename),
            urlencoding::encode(&self.subfolder),
            urlencoding::encode(&self.img_type)
        )
    }
}

/// Target pixel size of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_from_history_entry() {
        let img: ImageRef = serde_json::from_str(
            r#"{"filename": "ComfyUI_00001_.png", "subfolder": "", "type": "output"}"#,
        )
        .unwrap();
        assert_eq!(img, ImageRef::new("ComfyUI_00001_.png"));
    }

    #[test]
    fn test_image_ref_missing_fields_default() {
        let img: ImageRef = serde_json::from_str(r#"{"filename": "a.png"}"#).unwrap();
        assert_eq!(img.subfolder, "");
        assert_eq!(img.img_type, "output");
    }

    #[test]
    fn test_view_path_encodes_components() {
        let img = ImageRef {
            filename: "my image&1.png".into(),
            subfolder: "runs/a b".into(),
            img_type: "temp".into(),
        };
        assert_eq!(
            img.view_path(),
            "/view?filename=my%20image%261.png&subfolder=runs%2Fa%20b&type=temp"
        );
    }

    #[test]
    fn test_dimensions_display() {
        assert_eq!(Dimensions::new(1024, 576).to_string(), "1024x576");
    }
}
