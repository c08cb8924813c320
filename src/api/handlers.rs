use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::params::QueryParams;
use super::{blocking, AppState};
use crate::db::{DetectionFilter, DetectionView, ImageRef};
use crate::error::{Error, Result};
use crate::filter::{parse_ranges, DEFAULT_LIMIT};
use crate::histogram::BinCount;
use crate::labels::{label_color_hex, LABELS};

type RawQuery = Query<Vec<(String, String)>>;

#[derive(Serialize)]
pub struct LabelFraction {
    pub fraction: f64,
}

#[derive(Serialize)]
pub struct ThresholdSummaryBody {
    pub updated_at: i64,
    pub total_images: u64,
    pub images_at_or_above: u64,
    pub min_conf: String,
    pub labels: BTreeMap<&'static str, LabelFraction>,
}

/// GET /threshold-summary
pub async fn threshold_summary(
    State(state): State<Arc<AppState>>,
    Query(pairs): RawQuery,
) -> Result<Json<ThresholdSummaryBody>> {
    let params = QueryParams::new(pairs);
    let min_conf = params.float("min_conf", state.default_min_conf)?;

    let service = state.service.clone();
    let summary = blocking(move || Ok(service.threshold_summary(min_conf))).await?;

    let labels = summary
        .label_counts
        .counts
        .iter()
        .map(|c| {
            (
                c.label,
                LabelFraction { fraction: summary.label_counts.fraction(c.label) },
            )
        })
        .collect();

    Ok(Json(ThresholdSummaryBody {
        updated_at: summary.label_counts.updated_at,
        total_images: summary.total_images,
        images_at_or_above: summary.images_at_or_above,
        min_conf: format!("{:.2}", summary.min_conf),
        labels,
    }))
}

/// POST /rebuild
pub async fn rebuild(State(state): State<Arc<AppState>>) -> Response {
    let service = state.service.clone();
    match blocking(move || service.rebuild()).await {
        Ok(_) => (StatusCode::OK, "ok (hist rebuilt)").into_response(),
        Err(Error::RebuildFailed(e)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, format!("rebuild failed: {e:#}")).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("rebuild failed: {e}")).into_response(),
    }
}

#[derive(Serialize)]
pub struct ImagesBody {
    pub labels: Vec<String>,
    pub limit: i64,
    pub offset: i64,
    pub conf: String,
    pub images: Vec<ImageRef>,
}

/// GET /images
pub async fn images(
    State(state): State<Arc<AppState>>,
    Query(pairs): RawQuery,
) -> Result<Json<ImagesBody>> {
    let params = QueryParams::new(pairs);
    let limit = params.int("limit", DEFAULT_LIMIT)?;
    let offset = params.int("offset", 0)?;
    let conf = params.first("conf").unwrap_or_default().to_string();
    let ranges = parse_ranges(&conf)?;

    let query = state.service.image_query(params.labels(), ranges, limit, offset);
    let service = state.service.clone();
    let lookup = query.clone();
    let images = blocking(move || Ok(service.filter_images(&lookup))).await?;

    Ok(Json(ImagesBody {
        labels: query.labels,
        limit: query.limit,
        offset: query.offset,
        conf,
        images,
    }))
}

fn detection_filter(state: &AppState, params: &QueryParams) -> Result<DetectionFilter> {
    let min_conf = params.float("min_conf", state.default_min_conf)?;
    Ok(DetectionFilter::new(min_conf, params.label_filter()))
}

#[derive(Serialize)]
pub struct DetectionsBody<'a> {
    pub id: &'a str,
    pub path: &'a str,
    pub indexed_at: DateTime<Utc>,
    pub detections: Vec<DetectionView<'a>>,
}

/// GET /images/:id/detections
pub async fn detections(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(pairs): RawQuery,
) -> Result<Response> {
    let params = QueryParams::new(pairs);
    let filter = detection_filter(&state, &params)?;

    let service = state.service.clone();
    let image = blocking(move || service.image_detections(&id)).await?;

    let body = DetectionsBody {
        id: &image.id,
        path: &image.path,
        indexed_at: image.indexed_at,
        detections: image.filtered(&filter).map(DetectionView::from).collect(),
    };
    Ok(Json(body).into_response())
}

/// GET /images/:id/overlay.png
pub async fn overlay(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(pairs): RawQuery,
) -> Result<Response> {
    let params = QueryParams::new(pairs);
    let filter = detection_filter(&state, &params)?;

    let service = state.service.clone();
    let png = blocking(move || service.render_overlay(&id, &filter)).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

#[derive(Serialize)]
pub struct ConfHistBody {
    pub labels: Vec<String>,
    pub bins: Vec<BinCount>,
}

/// GET /conf-hist
pub async fn conf_hist(
    State(state): State<Arc<AppState>>,
    Query(pairs): RawQuery,
) -> Result<Json<ConfHistBody>> {
    let labels = QueryParams::new(pairs).labels();
    if labels.is_empty() {
        return Err(Error::MissingLabels);
    }

    let service = state.service.clone();
    let lookup = labels.clone();
    let bins = blocking(move || service.label_set_histogram(&lookup)).await?;
    Ok(Json(ConfHistBody { labels, bins }))
}

#[derive(Serialize)]
pub struct LabelInfo {
    pub label: &'static str,
    pub color: String,
}

/// GET /labels
pub async fn labels() -> Json<Vec<LabelInfo>> {
    Json(
        LABELS
            .iter()
            .map(|&label| LabelInfo { label, color: label_color_hex(label) })
            .collect(),
    )
}
