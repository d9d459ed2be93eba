use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use pkg_controllers::TuneOutcome;
use pkg_state::{StoreError, retry_on_conflict};
use pkg_types::{Object, ResourceList};
use pkg_types::ledger::{LedgerEntry, TenantResourceQuota};
use pkg_types::namespace::Namespace;
use pkg_types::tenant::Tenant;
use pkg_types::validate::validate_name;

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub full_name: Option<String>,
    /// Initial claims of the tenant's ledger.
    #[serde(default)]
    pub claims: Vec<LedgerEntry>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

/// Outcome of a synchronous tune, as returned to the caller.
#[derive(Debug, Serialize)]
pub struct TuneResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlement: Option<ResourceList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_hard: Option<ResourceList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortage: Option<ResourceList>,
    pub evicted: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<TuneOutcome> for TuneResponse {
    fn from(outcome: TuneOutcome) -> Self {
        match outcome {
            TuneOutcome::Converged {
                entitlement,
                root_hard,
                evicted,
            } => Self {
                outcome: "converged",
                entitlement: Some(entitlement),
                root_hard: Some(root_hard),
                shortage: None,
                evicted,
                reason: None,
            },
            TuneOutcome::UnderProvisioned {
                entitlement,
                root_hard,
                shortage,
                evicted,
            } => Self {
                outcome: "under-provisioned",
                entitlement: Some(entitlement),
                root_hard: Some(root_hard),
                shortage: Some(shortage),
                evicted,
                reason: None,
            },
            TuneOutcome::Skipped(reason) => Self {
                outcome: "skipped",
                entitlement: None,
                root_hard: None,
                shortage: None,
                evicted: Vec::new(),
                reason: Some(reason),
            },
        }
    }
}

/// POST /api/v1/tenants: register a tenant with its core namespace and ledger.
pub async fn create_tenant(
    State(state): State<AppState>,
    Json(req): Json<CreateTenantRequest>,
) -> ApiResult<(StatusCode, Json<Tenant>)> {
    validate_name(&req.name).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut tenant = Tenant::new(&req.name, req.enabled);
    tenant.spec.full_name = req.full_name;
    let tenant = state.store.create(tenant).await?;

    ignore_existing(state.store.create(Namespace::core(&req.name)).await)?;
    let mut ledger = TenantResourceQuota::new(&req.name);
    ledger.spec.claims = req.claims;
    ignore_existing(state.store.create(ledger).await)?;

    info!("Created tenant {}", req.name);
    Ok((StatusCode::CREATED, Json(tenant)))
}

fn ignore_existing<T>(result: Result<T, StoreError>) -> Result<(), StoreError> {
    match result {
        Ok(_) | Err(StoreError::AlreadyExists { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

/// GET /api/v1/tenants
pub async fn list_tenants(State(state): State<AppState>) -> ApiResult<Json<Vec<Tenant>>> {
    Ok(Json(state.store.list_objects(None).await?))
}

/// PUT /api/v1/tenants/{tenant}/enabled
pub async fn set_enabled(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<SetEnabledRequest>,
) -> ApiResult<Json<Tenant>> {
    let store = &state.store;
    let name = name.as_str();
    let enabled = req.enabled;
    let tenant = retry_on_conflict(|| async move {
        let mut tenant = store
            .get_object::<Tenant>(None, name)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                key: Tenant::key_for(None, name),
            })?;
        if tenant.spec.enabled == enabled {
            return Ok(tenant);
        }
        tenant.spec.enabled = enabled;
        store.update(tenant).await
    })
    .await?;
    info!("Tenant {} enabled={}", name, tenant.spec.enabled);
    Ok(Json(tenant))
}

/// POST /api/v1/tenants/{tenant}/tune: run the tuner now.
pub async fn tune_tenant(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TuneResponse>> {
    if state.store.get_object::<Tenant>(None, &name).await?.is_none() {
        return Err(ApiError::NotFound(format!("tenant {} not found", name)));
    }
    let outcome = state.tuner.reconcile(&name).await?;
    Ok(Json(outcome.into()))
}
