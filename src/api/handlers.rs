use axum::{
    extract::{Multipart, Query, State},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    core::{backend::NegotiatorState, loader::ImageSource},
    error::{AppError, Result},
    models::search::{Threshold, DEFAULT_GROUP_THRESHOLD, DEFAULT_SEARCH_THRESHOLD},
    utils::{to_percentage, upload_file_name},
    AppState,
};

use super::responses::{
    ApiResponse, CompareResponse, ExtractResponse, GroupsView, HealthResponse,
};

/// Body of `POST /api/compare`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompareRequest {
    /// Data URI, URL or path of the first image.
    image_a: String,
    /// Data URI, URL or path of the second image.
    image_b: String,
}

/// Body of `POST /api/extract`.
#[derive(Debug, Deserialize)]
pub(crate) struct ExtractRequest {
    /// Data URI, URL or path of the image.
    image: String,
}

/// `?threshold=` query parameter.
#[derive(Debug, Deserialize)]
pub(crate) struct ThresholdQuery {
    threshold: Option<f64>,
}

impl ThresholdQuery {
    fn resolve(&self, default: f64) -> Result<Threshold> {
        Threshold::new(self.threshold.unwrap_or(default))
    }
}

/// An image received as a multipart field.
struct Upload {
    file_name: String,
    content_type: Option<String>,
    bytes: Bytes,
}

impl Upload {
    fn into_source(self) -> ImageSource {
        ImageSource::Inline {
            bytes: self.bytes,
            media_type: self.content_type,
        }
    }
}

async fn read_upload(field: axum::extract::multipart::Field<'_>) -> Result<Upload> {
    let content_type = field.content_type().map(str::to_string);
    if let Some(ct) = content_type.as_deref() {
        if !ct.starts_with("image/") {
            return Err(AppError::InvalidInput(format!(
                "please select an image file (got {})",
                ct
            )));
        }
    }
    let file_name = upload_file_name(field.file_name(), content_type.as_deref());
    let bytes = field.bytes().await?;
    if bytes.is_empty() {
        return Err(AppError::UploadError(format!("{} is empty", file_name)));
    }

    Ok(Upload {
        file_name,
        content_type,
        bytes,
    })
}

pub(crate) async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let backend = match state.engine.backend_state() {
        NegotiatorState::Uninitialized => "uninitialized".to_string(),
        NegotiatorState::Initializing => "initializing".to_string(),
        NegotiatorState::Ready(active) => active.name,
        NegotiatorState::Failed => "failed".to_string(),
    };

    Json(ApiResponse::success(HealthResponse {
        status: "ok",
        version: crate::built_info::PKG_VERSION,
        backend,
        model_loaded: state.engine.model_loaded(),
    }))
}

pub(crate) async fn compare_images(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompareRequest>,
) -> Result<impl IntoResponse> {
    let a = ImageSource::from_request_str(&request.image_a)?;
    let b = ImageSource::from_request_str(&request.image_b)?;

    let similarity = state.engine.compare_images(&a, &b).await?;

    Ok(ApiResponse::success(CompareResponse {
        similarity,
        percentage: to_percentage(similarity),
    }))
}

pub(crate) async fn compare_uploads(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut first = None;
    let mut second = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "imageA" | "image1" => first = Some(read_upload(field).await?),
            "imageB" | "image2" => second = Some(read_upload(field).await?),
            other => log::debug!("Ignoring multipart field '{}'", other),
        }
    }

    let (first, second) = match (first, second) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(AppError::UploadError(
                "two images are required (fields imageA and imageB)".to_string(),
            ))
        }
    };
    log::info!("Comparing uploads {} and {}", first.file_name, second.file_name);

    let similarity = state
        .engine
        .compare_images(&first.into_source(), &second.into_source())
        .await?;

    Ok(ApiResponse::success(CompareResponse {
        similarity,
        percentage: to_percentage(similarity),
    }))
}

pub(crate) async fn extract_features(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExtractRequest>,
) -> Result<impl IntoResponse> {
    let source = ImageSource::from_request_str(&request.image)?;
    let embedding = state.engine.extract_features(&source).await?;

    let fingerprint = embedding.source_fingerprint().map(String::from);
    let values = embedding.into_vec();

    Ok(ApiResponse::success(ExtractResponse {
        dimension: values.len(),
        values,
        fingerprint,
    }))
}

pub(crate) async fn search_similar(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ThresholdQuery>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let threshold = query.resolve(DEFAULT_SEARCH_THRESHOLD)?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            upload = Some(read_upload(field).await?);
        }
    }
    let upload = upload.ok_or_else(|| AppError::UploadError("No file provided".to_string()))?;

    let results = state
        .search
        .search_similar(upload.bytes, &upload.file_name, threshold)
        .await?;
    log::info!("Search at {} returned {} images", threshold, results.images.len());

    Ok(ApiResponse::success(results))
}

pub(crate) async fn similar_groups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ThresholdQuery>,
) -> Result<impl IntoResponse> {
    let threshold = query.resolve(DEFAULT_GROUP_THRESHOLD)?;
    let groups = state.search.similar_groups(threshold).await?;

    Ok(ApiResponse::success(GroupsView::from(groups)))
}
