//! Wire types of the remote corpus search and grouping service.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::string_or_number;

/// Default cutoff for similarity search.
pub const DEFAULT_SEARCH_THRESHOLD: f64 = 0.8;
/// Default cutoff for similarity grouping.
pub const DEFAULT_GROUP_THRESHOLD: f64 = 0.9;

/// A similarity cutoff in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Threshold(f64);

impl Threshold {
    /// Validate `value`.
    pub fn new(value: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&value) {
            return Err(AppError::InvalidInput(format!(
                "threshold must be between 0 and 1, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// The raw fraction.
    pub fn value(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope every service response is wrapped in.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceResponse<T> {
    /// Whether the call succeeded.
    pub success: bool,
    /// Error or status message.
    pub message: Option<String>,
    /// Payload, present on success.
    pub data: Option<T>,
}

impl<T> ServiceResponse<T> {
    /// Unwrap the payload, turning a reported failure into an error.
    pub fn into_data(self, fallback: &str) -> Result<T> {
        if !self.success {
            return Err(AppError::Service(
                self.message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| fallback.to_string()),
            ));
        }
        self.data
            .ok_or_else(|| AppError::Service(format!("{}: response carried no data", fallback)))
    }
}

/// One hit of a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarImage {
    /// Identifier in the corpus.
    #[serde(deserialize_with = "string_or_number")]
    pub image_id: String,
    /// Where the image can be fetched.
    pub url: String,
    /// MD5 of the stored file.
    #[serde(default)]
    pub md5: String,
    /// Similarity as a percentage, 0 to 100.
    pub similarity: f64,
}

/// Payload of a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Hits, best first.
    pub images: Vec<SimilarImage>,
}

/// Stored file format codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Code 1.
    Png,
    /// Code 2.
    Jpg,
    /// Code 3.
    Gif,
    /// Code 4.
    WebP,
    /// Any other code.
    Unknown(i64),
}

impl FileType {
    /// Display label.
    pub fn label(self) -> &'static str {
        match self {
            FileType::Png => "PNG",
            FileType::Jpg => "JPG",
            FileType::Gif => "GIF",
            FileType::WebP => "WebP",
            FileType::Unknown(_) => "Unknown",
        }
    }

    /// Wire code.
    pub fn code(self) -> i64 {
        match self {
            FileType::Png => 1,
            FileType::Jpg => 2,
            FileType::Gif => 3,
            FileType::WebP => 4,
            FileType::Unknown(code) => code,
        }
    }
}

impl From<i64> for FileType {
    fn from(code: i64) -> Self {
        match code {
            1 => FileType::Png,
            2 => FileType::Jpg,
            3 => FileType::Gif,
            4 => FileType::WebP,
            other => FileType::Unknown(other),
        }
    }
}

impl Serialize for FileType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for FileType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        i64::deserialize(deserializer).map(FileType::from)
    }
}

/// An image stored in the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Identifier in the corpus.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Where the image can be fetched.
    pub url: String,
    /// Stored format.
    pub file_type: FileType,
    /// MD5 of the stored file.
    #[serde(default)]
    pub md5: String,
    /// Creation time as reported by the service.
    #[serde(default)]
    pub create_time: String,
}

impl ImageRecord {
    /// Creation time, if the service sent an RFC 3339 timestamp.
    pub fn created_at(&self) -> Option<chrono::DateTime<chrono::FixedOffset>> {
        chrono::DateTime::parse_from_rfc3339(&self.create_time).ok()
    }
}

/// A connected group of mutually similar images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarGroup {
    /// Group number.
    pub group_id: i64,
    /// Number of images in the group.
    pub image_count: usize,
    /// Members.
    pub images: Vec<ImageRecord>,
}

/// Payload of a grouping request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarGroups {
    /// Groups found.
    pub groups: Vec<SimilarGroup>,
    /// Number of groups.
    pub group_count: usize,
    /// Images covered by all groups.
    pub total_images: usize,
    /// Cutoff the service applied.
    pub threshold: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_bounds() {
        assert!(Threshold::new(0.0).is_ok());
        assert!(Threshold::new(1.0).is_ok());
        assert!(Threshold::new(1.01).is_err());
        assert!(Threshold::new(-0.1).is_err());
        assert!(Threshold::new(f64::NAN).is_err());
        assert_eq!(Threshold::new(0.85).unwrap().to_string(), "0.85");
    }

    #[test]
    fn file_type_labels() {
        assert_eq!(FileType::from(1).label(), "PNG");
        assert_eq!(FileType::from(4).label(), "WebP");
        assert_eq!(FileType::from(9).label(), "Unknown");
        assert_eq!(FileType::from(9).code(), 9);
    }

    #[test]
    fn parses_group_payload() {
        let body = r#"{
            "success": true,
            "message": "ok",
            "data": {
                "groups": [{
                    "groupId": 1,
                    "imageCount": 2,
                    "images": [
                        {"id": 17, "url": "http://x/a.png", "fileType": 1, "md5": "aa", "createTime": "2024-05-01T10:00:00Z"},
                        {"id": "18", "url": "http://x/b.gif", "fileType": 7, "md5": "bb", "createTime": "yesterday"}
                    ]
                }],
                "groupCount": 1,
                "totalImages": 2,
                "threshold": 0.9
            }
        }"#;

        let response: ServiceResponse<SimilarGroups> = serde_json::from_str(body).unwrap();
        let groups = response.into_data("grouping failed").unwrap();
        let images = &groups.groups[0].images;
        assert_eq!(images[0].id, "17");
        assert_eq!(images[0].file_type, FileType::Png);
        assert!(images[0].created_at().is_some());
        assert_eq!(images[1].file_type.label(), "Unknown");
        assert!(images[1].created_at().is_none());
    }

    #[test]
    fn reported_failure_becomes_service_error() {
        let response: ServiceResponse<SearchResults> =
            serde_json::from_str(r#"{"success": false, "message": "index offline"}"#).unwrap();
        match response.into_data("search failed") {
            Err(AppError::Service(message)) => assert_eq!(message, "index offline"),
            other => panic!("unexpected: {:?}", other),
        }

        let response: ServiceResponse<SearchResults> =
            serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert_eq!(
            response.into_data("search failed").unwrap_err().to_string(),
            "Search service error: search failed"
        );
    }
}
