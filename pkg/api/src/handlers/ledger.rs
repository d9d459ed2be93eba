use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use pkg_state::client::StateStore;
use pkg_state::{StoreError, retry_on_conflict};
use pkg_types::Object;
use pkg_types::ledger::{EntryKind, LedgerEntry, TenantResourceQuota};
use pkg_types::validate::validate_name;

/// GET /api/v1/tenants/{tenant}/ledger
pub async fn get_ledger(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> ApiResult<Json<TenantResourceQuota>> {
    state
        .store
        .get_object::<TenantResourceQuota>(None, &tenant)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("ledger for tenant {} not found", tenant)))
}

/// POST /api/v1/tenants/{tenant}/ledger/claims
pub async fn put_claim(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(entry): Json<LedgerEntry>,
) -> ApiResult<(StatusCode, Json<TenantResourceQuota>)> {
    upsert(&state.store, &tenant, EntryKind::Claim, entry).await
}

/// POST /api/v1/tenants/{tenant}/ledger/drops
pub async fn put_drop(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(entry): Json<LedgerEntry>,
) -> ApiResult<(StatusCode, Json<TenantResourceQuota>)> {
    upsert(&state.store, &tenant, EntryKind::Drop, entry).await
}

/// DELETE /api/v1/tenants/{tenant}/ledger/claims/{name}
pub async fn delete_claim(
    State(state): State<AppState>,
    Path((tenant, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    remove(&state.store, &tenant, EntryKind::Claim, &name).await
}

/// DELETE /api/v1/tenants/{tenant}/ledger/drops/{name}
pub async fn delete_drop(
    State(state): State<AppState>,
    Path((tenant, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    remove(&state.store, &tenant, EntryKind::Drop, &name).await
}

async fn upsert(
    store: &StateStore,
    tenant: &str,
    kind: EntryKind,
    entry: LedgerEntry,
) -> ApiResult<(StatusCode, Json<TenantResourceQuota>)> {
    validate_name(&entry.name).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let entry = &entry;
    let (ledger, changed) = retry_on_conflict(|| async move {
        let mut ledger = load(store, tenant).await?;
        if !ledger.upsert(kind, entry.clone()) {
            return Ok((ledger, false));
        }
        Ok((store.update(ledger).await?, true))
    })
    .await?;

    if changed {
        info!("Ledger {}: set {:?} {} to {}", tenant, kind, entry.name, entry.resources);
    }
    let status = if changed { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(ledger)))
}

async fn remove(store: &StateStore, tenant: &str, kind: EntryKind, name: &str) -> ApiResult<StatusCode> {
    let removed = retry_on_conflict(|| async move {
        let mut ledger = load(store, tenant).await?;
        if !ledger.remove(kind, name) {
            return Ok(false);
        }
        store.update(ledger).await?;
        Ok(true)
    })
    .await?;

    if !removed {
        return Err(ApiError::NotFound(format!(
            "{:?} {} not found in ledger {}",
            kind, name, tenant
        )));
    }
    info!("Ledger {}: removed {:?} {}", tenant, kind, name);
    Ok(StatusCode::NO_CONTENT)
}

async fn load(store: &StateStore, tenant: &str) -> Result<TenantResourceQuota, StoreError> {
    store
        .get_object::<TenantResourceQuota>(None, tenant)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            key: TenantResourceQuota::key_for(None, tenant),
        })
}
