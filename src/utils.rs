//! Utility functions and helpers for the ImageMatch application

use serde::{Deserialize, Deserializer};

/// Similarity score as a percentage rounded to two decimals.
pub fn to_percentage(score: f32) -> f64 {
    (f64::from(score) * 10_000.0).round() / 100.0
}

/// Accept either a JSON string or a JSON number and keep it as a string.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// Best-effort file name for an upload, falling back to `image` plus an
/// extension derived from the content type.
#[cfg(feature = "web")]
pub(crate) fn upload_file_name(file_name: Option<&str>, content_type: Option<&str>) -> String {
    if let Some(name) = file_name.filter(|n| !n.trim().is_empty()) {
        return name.to_string();
    }
    let extension = content_type
        .and_then(|ct| mime_guess::get_mime_extensions_str(ct))
        .and_then(|exts| exts.first())
        .copied()
        .unwrap_or("bin");
    format!("image.{}", extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_percentage() {
        assert_eq!(to_percentage(1.0), 100.0);
        assert_eq!(to_percentage(0.0), 0.0);
        assert_eq!(to_percentage(0.123456), 12.35);
    }

    #[test]
    fn test_string_or_number() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(deserialize_with = "string_or_number")]
            id: String,
        }

        let row: Row = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(row.id, "42");
        let row: Row = serde_json::from_str(r#"{"id": "abc"}"#).unwrap();
        assert_eq!(row.id, "abc");
        assert!(serde_json::from_str::<Row>(r#"{"id": true}"#).is_err());
    }

    #[cfg(feature = "web")]
    #[test]
    fn test_upload_file_name() {
        assert_eq!(upload_file_name(Some("cat.png"), None), "cat.png");
        assert_eq!(upload_file_name(Some("  "), Some("image/png")), "image.png");
        assert_eq!(upload_file_name(None, None), "image.bin");
    }
}
