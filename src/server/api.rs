use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum_auth::AuthBearer;
use axum_typed_multipart::TypedMultipart;
use log::info;
use rayon::prelude::*;
use tokio::task::block_in_place;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::matcher::QueryResult;
use crate::metrics;

impl From<QueryResult> for MatchItem {
    fn from(r: QueryResult) -> Self {
        Self { identifier: r.identifier, position: r.position, distance: r.distance }
    }
}

fn check_token(state: &AppState, token: &str) -> Result<()> {
    if token != state.token {
        return Err(AppError::new(StatusCode::UNAUTHORIZED, anyhow::anyhow!("invalid token")));
    }
    Ok(())
}

/// 匹配上传的查询图片
#[utoipa::path(
    post,
    path = "/match",
    request_body(content = MatchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = MatchResponse),
    )
)]
pub async fn match_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    data: TypedMultipart<MatchRequest>,
) -> Result<Json<MatchResponse>> {
    check_token(&state, &token)?;
    let count = data.count.unwrap_or(state.count);

    let start = Instant::now();

    info!("正在匹配 {} 张上传图片", data.file.len());

    let result = block_in_place(|| {
        data.file
            .par_iter()
            .map(|file| -> Result<Vec<MatchItem>> {
                let instant = Instant::now();
                let result = state.session.rank(file, count);
                match &result {
                    Ok(r) => metrics::observe_query(
                        instant.elapsed().as_secs_f32(),
                        r.first().map(|r| r.distance),
                    ),
                    Err(_) => metrics::inc_query_error(),
                }
                Ok(result?.into_iter().map(MatchItem::from).collect::<Vec<_>>())
            })
            .collect::<Result<Vec<_>>>()
    })?;

    Ok(Json(MatchResponse { time: start.elapsed().as_millis() as u64, result }))
}

/// 获取图库信息
#[utoipa::path(
    get,
    path = "/gallery",
    responses(
        (status = 200, body = GalleryResponse),
    )
)]
pub async fn gallery_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
) -> Result<Json<GalleryResponse>> {
    check_token(&state, &token)?;
    let gallery = state.session.gallery();
    Ok(Json(GalleryResponse {
        fingerprint: gallery.fingerprint().to_string(),
        dim: gallery.dim(),
        identifiers: gallery.identifiers().to_vec(),
    }))
}
