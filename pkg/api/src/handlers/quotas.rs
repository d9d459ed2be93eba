use axum::{
    Json,
    extract::{Path, State},
};

use crate::AppState;
use crate::error::ApiResult;
use pkg_types::quota::ResourceQuota;

/// GET /api/v1/namespaces/{ns}/resourcequotas
pub async fn list_quotas(
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> ApiResult<Json<Vec<ResourceQuota>>> {
    Ok(Json(state.store.list_objects(Some(&ns)).await?))
}
