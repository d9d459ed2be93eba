use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use pkg_controllers::AdmissionOutcome;
use pkg_controllers::eviction::delete_subnamespace;
use pkg_state::{StoreError, retry_on_conflict};
use pkg_types::namespace::Namespace;
use pkg_types::subnamespace::{Inheritance, SubNamespace};
use pkg_types::validate::validate_subnamespace_name;
use pkg_types::{Object, ResourceList};

#[derive(Debug, Deserialize)]
pub struct CreateSubNamespaceRequest {
    pub name: String,
    pub resource_allocation: ResourceList,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub inheritance: Inheritance,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubNamespaceRequest {
    #[serde(default)]
    pub resource_allocation: Option<ResourceList>,
    /// Replaces the expiry when present; `null` clears it.
    #[serde(default, with = "double_option")]
    pub expiry: Option<Option<DateTime<Utc>>>,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[derive(Debug, Serialize)]
pub struct AdmitResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub evicted: Vec<String>,
}

impl From<AdmissionOutcome> for AdmitResponse {
    fn from(outcome: AdmissionOutcome) -> Self {
        let evicted = outcome.evicted().to_vec();
        let empty = |outcome: &'static str| Self {
            outcome,
            child_namespace: None,
            resources: None,
            reason: None,
            evicted: Vec::new(),
        };
        match outcome {
            AdmissionOutcome::Admitted {
                child_namespace,
                demand,
                ..
            } => Self {
                child_namespace: Some(child_namespace),
                resources: Some(demand),
                evicted,
                ..empty("admitted")
            },
            AdmissionOutcome::Rejected { reason, .. } => Self {
                reason: Some(reason),
                evicted,
                ..empty("rejected")
            },
            AdmissionOutcome::Expired { released } => Self {
                resources: Some(released),
                ..empty("expired")
            },
            AdmissionOutcome::Skipped(reason) => Self {
                reason: Some(reason),
                ..empty("skipped")
            },
        }
    }
}

/// POST /api/v1/namespaces/{ns}/subnamespaces
///
/// Only records the request; the engine admits it once the write is observed.
pub async fn create_subnamespace(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    Json(req): Json<CreateSubNamespaceRequest>,
) -> ApiResult<(StatusCode, Json<SubNamespace>)> {
    validate_subnamespace_name(&ns, &req.name).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if !req.resource_allocation.is_non_negative() {
        return Err(ApiError::BadRequest(format!(
            "resource allocation {} must not be negative",
            req.resource_allocation
        )));
    }
    if state.store.get_object::<Namespace>(None, &ns).await?.is_none() {
        return Err(ApiError::NotFound(format!("namespace {} not found", ns)));
    }

    let mut sn = SubNamespace::new(&ns, &req.name, req.resource_allocation);
    sn.spec.expiry = req.expiry;
    sn.spec.inheritance = req.inheritance;
    let sn = state.store.create(sn).await?;

    info!(
        "Requested sub-namespace {}/{} with {}",
        ns, req.name, req.resource_allocation
    );
    Ok((StatusCode::CREATED, Json(sn)))
}

/// GET /api/v1/namespaces/{ns}/subnamespaces
pub async fn list_subnamespaces(
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> ApiResult<Json<Vec<SubNamespace>>> {
    Ok(Json(state.store.list_objects(Some(&ns)).await?))
}

/// PUT /api/v1/namespaces/{ns}/subnamespaces/{name}: resize or change expiry.
pub async fn update_subnamespace(
    State(state): State<AppState>,
    Path((ns, name)): Path<(String, String)>,
    Json(req): Json<UpdateSubNamespaceRequest>,
) -> ApiResult<Json<SubNamespace>> {
    if req.resource_allocation.is_some_and(|demand| !demand.is_non_negative()) {
        return Err(ApiError::BadRequest("resource allocation must not be negative".into()));
    }

    let store = &state.store;
    let (ns_ref, name_ref, req) = (ns.as_str(), name.as_str(), &req);
    let sn = retry_on_conflict(|| async move {
        let mut sn = store
            .get_object::<SubNamespace>(Some(ns_ref), name_ref)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                key: SubNamespace::key_for(Some(ns_ref), name_ref),
            })?;
        let before = sn.spec.clone();
        if let Some(demand) = req.resource_allocation {
            sn.spec.resource_allocation = demand;
        }
        if let Some(expiry) = req.expiry {
            sn.spec.expiry = expiry;
        }
        if sn.spec == before {
            return Ok(sn);
        }
        store.update(sn).await
    })
    .await?;

    info!("Updated sub-namespace {}/{}", ns, name);
    Ok(Json(sn))
}

/// DELETE /api/v1/namespaces/{ns}/subnamespaces/{name}
pub async fn delete_subnamespace_handler(
    State(state): State<AppState>,
    Path((ns, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    match delete_subnamespace(&state.store, &ns, &name).await? {
        Some(released) => {
            info!("Deleted sub-namespace {}/{}, released {}", ns, name, released);
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::NotFound(format!(
            "sub-namespace {}/{} not found",
            ns, name
        ))),
    }
}

/// POST /api/v1/namespaces/{ns}/subnamespaces/{name}/admit: run admission now.
pub async fn admit_subnamespace(
    State(state): State<AppState>,
    Path((ns, name)): Path<(String, String)>,
) -> ApiResult<Json<AdmitResponse>> {
    let outcome = state.gate.reconcile(&ns, &name).await?;
    Ok(Json(outcome.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::{app_state, seed};
    use pkg_types::quota::ResourceQuota;

    fn request(name: &str, cpu: &str, memory: &str) -> CreateSubNamespaceRequest {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "resource_allocation": {"cpu": cpu, "memory": memory},
        }))
        .unwrap()
    }

    async fn hard(state: &AppState, ns: &str, name: &str) -> ResourceList {
        state
            .store
            .get_object::<ResourceQuota>(Some(ns), name)
            .await
            .unwrap()
            .map(|q| q.hard())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn create_admit_delete_round_trip() {
        let state = app_state();
        seed(&state, "acme", ResourceList::new(8000, 8 << 30)).await;

        let (status, Json(sn)) = create_subnamespace(
            State(state.clone()),
            Path("acme".into()),
            Json(request("lab", "2000m", "2Gi")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(!sn.is_live());

        let Json(resp) = admit_subnamespace(State(state.clone()), Path(("acme".into(), "lab".into())))
            .await
            .unwrap();
        assert_eq!(resp.outcome, "admitted");
        assert_eq!(resp.child_namespace.as_deref(), Some("acme-lab"));
        assert_eq!(hard(&state, "acme", "core-quota").await, ResourceList::new(6000, 6 << 30));
        assert_eq!(hard(&state, "acme-lab", "sub-quota").await, ResourceList::new(2000, 2 << 30));

        let Json(listed) = list_subnamespaces(State(state.clone()), Path("acme".into()))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_live());

        let status = delete_subnamespace_handler(State(state.clone()), Path(("acme".into(), "lab".into())))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(hard(&state, "acme", "core-quota").await, ResourceList::new(8000, 8 << 30));

        let gone = delete_subnamespace_handler(State(state), Path(("acme".into(), "lab".into())))
            .await
            .unwrap_err();
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_demand_is_rejected_on_admit() {
        let state = app_state();
        seed(&state, "acme", ResourceList::new(1000, 1 << 30)).await;
        create_subnamespace(
            State(state.clone()),
            Path("acme".into()),
            Json(request("big", "4000m", "1Gi")),
        )
        .await
        .unwrap();

        let Json(resp) = admit_subnamespace(State(state.clone()), Path(("acme".into(), "big".into())))
            .await
            .unwrap();
        assert_eq!(resp.outcome, "rejected");
        assert!(resp.reason.is_some());
        assert_eq!(hard(&state, "acme", "core-quota").await, ResourceList::new(1000, 1 << 30));
    }

    #[tokio::test]
    async fn invalid_requests() {
        let state = app_state();
        seed(&state, "acme", ResourceList::ZERO).await;

        let missing_parent = create_subnamespace(
            State(state.clone()),
            Path("ghost".into()),
            Json(request("lab", "1", "1Gi")),
        )
        .await
        .unwrap_err();
        assert_eq!(missing_parent.status(), StatusCode::NOT_FOUND);

        let bad_name = create_subnamespace(
            State(state.clone()),
            Path("acme".into()),
            Json(request("Lab!", "1", "1Gi")),
        )
        .await
        .unwrap_err();
        assert_eq!(bad_name.status(), StatusCode::BAD_REQUEST);

        let negative = create_subnamespace(
            State(state),
            Path("acme".into()),
            Json(request("lab", "-1", "1Gi")),
        )
        .await
        .unwrap_err();
        assert_eq!(negative.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn resize_updates_the_record() {
        let state = app_state();
        seed(&state, "acme", ResourceList::new(8000, 8 << 30)).await;
        create_subnamespace(
            State(state.clone()),
            Path("acme".into()),
            Json(request("lab", "2", "2Gi")),
        )
        .await
        .unwrap();

        let req: UpdateSubNamespaceRequest = serde_json::from_value(serde_json::json!({
            "resource_allocation": {"cpu": "3", "memory": "2Gi"},
            "expiry": null,
        }))
        .unwrap();
        assert_eq!(req.expiry, Some(None));
        let Json(sn) = update_subnamespace(
            State(state.clone()),
            Path(("acme".into(), "lab".into())),
            Json(req),
        )
        .await
        .unwrap();
        assert_eq!(sn.spec.resource_allocation, ResourceList::new(3000, 2 << 30));
        assert_eq!(sn.metadata.resource_version, 2);
    }
}
