use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse file category derived from an uploaded file's name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Document,
    Image,
    Video,
    Unknown,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Document => "document",
            Classification::Image => "image",
            Classification::Video => "video",
            Classification::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "document" => Ok(Classification::Document),
            "image" => Ok(Classification::Image),
            "video" => Ok(Classification::Video),
            "unknown" => Ok(Classification::Unknown),
            other => Err(format!("unknown classification: {other}")),
        }
    }
}

/// Classify a file by its extension (case-insensitive).
///
/// Never fails: unrecognized or missing extensions are `Unknown`.
pub fn classify(file_name: &str) -> Classification {
    let Some(extension) = extension_of(file_name) else {
        return Classification::Unknown;
    };

    match extension.as_str() {
        "pdf" => Classification::Document,
        "jpg" | "jpeg" | "png" | "gif" | "bmp" => Classification::Image,
        "mp4" | "avi" | "mov" | "wmv" | "mkv" => Classification::Video,
        _ => Classification::Unknown,
    }
}

/// Content type used when streaming a stored file back
pub fn content_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn extension_of(file_name: &str) -> Option<String> {
    // Only the final path segment counts; "archive.d/readme" has no extension.
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let (_, extension) = base.rsplit_once('.')?;
    if extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}
