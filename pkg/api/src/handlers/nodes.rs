use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use pkg_constants::quota::OWNER_KIND_TENANT;
use pkg_state::retry_on_conflict;
use pkg_types::node::{Node, NodeStatus};
use pkg_types::validate::validate_name;
use pkg_types::{ObjectMeta, OwnerReference, ResourceList};

#[derive(Debug, Deserialize)]
pub struct PutNodeRequest {
    #[serde(default)]
    pub capacity: ResourceList,
    pub status: NodeStatus,
    /// Tenant that contributed the node.
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// PUT /api/v1/nodes/{name}: create or replace a node's capacity, status and owner.
pub async fn put_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PutNodeRequest>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    validate_name(&name).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let owner_references: Vec<OwnerReference> = req
        .owner
        .iter()
        .map(|tenant| OwnerReference {
            kind: OWNER_KIND_TENANT.to_string(),
            name: tenant.clone(),
        })
        .collect();

    let store = &state.store;
    let (name, req, owner_references) = (name.as_str(), &req, &owner_references);
    let (node, created) = retry_on_conflict(|| async move {
        match store.get_object::<Node>(None, name).await? {
            Some(mut node) => {
                node.capacity = req.capacity;
                node.status = req.status.clone();
                node.metadata.labels = req.labels.clone();
                node.metadata.owner_references = owner_references.clone();
                Ok((store.update(node).await?, false))
            }
            None => {
                let mut metadata = ObjectMeta::named(name);
                metadata.labels = req.labels.clone();
                metadata.owner_references = owner_references.clone();
                let node = Node {
                    metadata,
                    capacity: req.capacity,
                    status: req.status.clone(),
                };
                Ok((store.create(node).await?, true))
            }
        }
    })
    .await?;

    info!("Node {} is {} with {}", name, node.status, node.capacity);
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(node)))
}

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<Json<Vec<Node>>> {
    Ok(Json(state.store.list_objects(None).await?))
}
