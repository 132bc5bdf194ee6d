use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::models::search::{ImageRecord, SimilarGroups};

/// Envelope for every API response.
#[derive(Debug, Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    pub(crate) success: bool,
    pub(crate) data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Result of comparing two images.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompareResponse {
    /// Cosine similarity in `[0, 1]`.
    pub(crate) similarity: f32,
    /// The same score as a percentage.
    pub(crate) percentage: f64,
}

/// An extracted embedding.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExtractResponse {
    pub(crate) dimension: usize,
    pub(crate) values: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) fingerprint: Option<String>,
}

/// Service health.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) version: &'static str,
    pub(crate) backend: String,
    pub(crate) model_loaded: bool,
}

/// A corpus image with its file type spelled out.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroupImageView {
    #[serde(flatten)]
    pub(crate) record: ImageRecord,
    pub(crate) file_type_label: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroupView {
    pub(crate) group_id: i64,
    pub(crate) image_count: usize,
    pub(crate) images: Vec<GroupImageView>,
}

/// Grouping result as served to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroupsView {
    pub(crate) groups: Vec<GroupView>,
    pub(crate) group_count: usize,
    pub(crate) total_images: usize,
    pub(crate) threshold: f64,
}

impl From<SimilarGroups> for GroupsView {
    fn from(groups: SimilarGroups) -> Self {
        Self {
            groups: groups
                .groups
                .into_iter()
                .map(|group| GroupView {
                    group_id: group.group_id,
                    image_count: group.image_count,
                    images: group
                        .images
                        .into_iter()
                        .map(|record| GroupImageView {
                            file_type_label: record.file_type.label(),
                            record,
                        })
                        .collect(),
                })
                .collect(),
            group_count: groups.group_count,
            total_images: groups.total_images,
            threshold: groups.threshold,
        }
    }
}
