//! HTTP admin API
//!
//! RESTful access to the distribution engine. Every mutation runs on the
//! blocking pool and is persisted before the response is sent.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use dist_core::config::MAX_SHARD_COUNT;
use dist_core::{
    ColocationGroup, ColocationParam, DistError, DistributionMethod, Node, NodeId,
    NodeMetadata, Placement, Relation, RelationId, Shard, ShardId, TableType,
};

use crate::{Coordinator, CoordinatorError};

/// HTTP API service
pub struct HttpApi {
    coordinator: Arc<Coordinator>,
}

impl HttpApi {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn router(self) -> Router {
        Router::new()
            // Catalog
            .route("/api/v1/catalog", get(get_catalog))
            .route("/api/v1/colocations", get(list_colocations))
            // Nodes
            .route("/api/v1/nodes", get(list_nodes).post(add_node))
            .route("/api/v1/nodes/:node_id", get(get_node).delete(remove_node))
            .route("/api/v1/nodes/:node_id/activate", post(activate_node))
            .route("/api/v1/nodes/:node_id/disable", post(disable_node))
            .route("/api/v1/nodes/:node_id/sync", post(sync_node))
            .route("/api/v1/nodes/:node_id/should-have-shards", put(set_should_have_shards))
            .route("/api/v1/coordinator", post(set_coordinator))
            // Relations
            .route("/api/v1/relations", get(list_relations).post(register_relation))
            .route("/api/v1/relations/:relation_id", delete(drop_relation))
            .route("/api/v1/relations/:relation_id/row-count", put(set_row_count))
            // Distributed tables
            .route("/api/v1/tables", get(list_tables))
            .route("/api/v1/tables/:relation_id", get(get_table))
            .route("/api/v1/tables/:relation_id/distribute", post(distribute_table))
            .route("/api/v1/tables/:relation_id/reference", post(create_reference_table))
            .route("/api/v1/tables/:relation_id/single-shard", post(create_single_shard_table))
            .route("/api/v1/tables/:relation_id/local", post(add_local_table))
            .route("/api/v1/tables/:relation_id/undistribute", post(undistribute_table))
            .route("/api/v1/tables/:relation_id/shards", post(create_empty_shard))
            .route("/api/v1/reference-tables/replicate", post(replicate_reference_tables))
            .with_state(self.coordinator)
    }
}

// Response types

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    fn err(msg: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        })
    }
}

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, ApiResponse::ok(data)))
}

fn created<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, ApiResponse::ok(data)))
}

/// Failure reported to the client inside the response envelope
enum ApiError {
    Coordinator(CoordinatorError),
    NotFound(String),
}

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        ApiError::Coordinator(e)
    }
}

impl From<DistError> for ApiError {
    fn from(e: DistError) -> Self {
        ApiError::Coordinator(CoordinatorError::Dist(e))
    }
}

fn status_of(e: &DistError) -> StatusCode {
    match e {
        DistError::InvalidParams(_)
        | DistError::IneligibleRelation { .. }
        | DistError::UnsupportedConversion { .. }
        | DistError::ReplicationFactorConflict { .. } => StatusCode::BAD_REQUEST,
        DistError::NodeNotFound(_) => StatusCode::NOT_FOUND,
        DistError::DuplicateNode { .. }
        | DistError::InvalidGroupState(_)
        | DistError::LockConflict { .. } => StatusCode::CONFLICT,
        DistError::Remote(_) | DistError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Coordinator(CoordinatorError::Dist(e)) => (status_of(&e), e.to_string()),
            ApiError::Coordinator(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };
        if status.is_server_error() {
            warn!("Request failed: {}", message);
        }
        (status, ApiResponse::<()>::err(message)).into_response()
    }
}

// Request types

#[derive(Deserialize)]
struct AddNodeRequest {
    name: String,
    port: u16,
    #[serde(flatten)]
    metadata: NodeMetadata,
}

#[derive(Deserialize)]
struct CoordinatorRequest {
    name: String,
    port: u16,
}

#[derive(Deserialize)]
struct ShouldHaveShardsRequest {
    should_have_shards: bool,
}

#[derive(Deserialize)]
struct RowCountRequest {
    row_count: u64,
}

/// Arguments of a distribute call; a missing column asks for a single shard table
#[derive(Debug, Default, Deserialize)]
struct DistributeRequest {
    distribution_column: Option<String>,
    distribution_method: Option<String>,
    shard_count: Option<u32>,
    colocate_with: Option<String>,
}

#[derive(Debug, PartialEq)]
enum DistributeOp {
    Distributed {
        column: String,
        method: DistributionMethod,
        shard_count: u32,
        shard_count_is_strict: bool,
        colocate_with: String,
    },
    SingleShard {
        colocate_with: String,
    },
}

impl DistributeRequest {
    /// Check argument combinations before the engine is involved
    fn into_operation(self, default_shard_count: u32) -> Result<DistributeOp, DistError> {
        let method = match self.distribution_method.as_deref() {
            Some(name) => Some(DistributionMethod::parse(name).ok_or_else(|| {
                DistError::invalid_params(format!("unknown distribution method {}", name))
            })?),
            None => None,
        };
        let colocate_with = self
            .colocate_with
            .unwrap_or_else(|| "default".to_string());

        let Some(column) = self.distribution_column else {
            if self.shard_count.is_some() {
                return Err(DistError::invalid_params(
                    "shard_count cannot be set for single shard tables",
                ));
            }
            if method.is_some_and(|m| m != DistributionMethod::Hash) {
                return Err(DistError::invalid_params(
                    "single shard tables only accept the hash distribution method",
                ));
            }
            return Ok(DistributeOp::SingleShard { colocate_with });
        };

        if self.shard_count.is_some() && !ColocationParam::parse(&colocate_with).is_default_or_none() {
            return Err(DistError::invalid_params(
                "colocate_with cannot be combined with shard_count",
            ));
        }
        let shard_count = self.shard_count.unwrap_or(default_shard_count);
        if shard_count == 0 || shard_count > MAX_SHARD_COUNT {
            return Err(DistError::invalid_params(format!(
                "shard_count must be between 1 and {}",
                MAX_SHARD_COUNT
            )));
        }

        Ok(DistributeOp::Distributed {
            column,
            method: method.unwrap_or(DistributionMethod::Hash),
            shard_count,
            shard_count_is_strict: self.shard_count.is_some(),
            colocate_with,
        })
    }
}

#[derive(Default, Deserialize)]
struct SingleShardRequest {
    colocate_with: Option<String>,
}

#[derive(Default, Deserialize)]
struct EmptyShardRequest {
    min_value: Option<String>,
    max_value: Option<String>,
}

// Response payloads

#[derive(Serialize)]
struct CatalogOverview {
    name: String,
    created_at: String,
    updated_at: String,
    stats: dist_core::metadata::CatalogStats,
}

#[derive(Serialize)]
struct NodeIdResponse {
    node_id: NodeId,
}

#[derive(Serialize)]
struct RelationIdResponse {
    relation_id: RelationId,
}

#[derive(Serialize)]
struct ShardIdResponse {
    shard_id: ShardId,
}

#[derive(Serialize)]
struct ReplicateResponse {
    placements_added: usize,
}

#[derive(Serialize)]
struct TableSummary {
    relation_id: RelationId,
    name: String,
    table_type: TableType,
    distribution_column: Option<String>,
    colocation_id: u32,
    auto_converted: bool,
    shard_count: usize,
}

#[derive(Serialize)]
struct ShardDetail {
    #[serde(flatten)]
    shard: Shard,
    placements: Vec<Placement>,
}

#[derive(Serialize)]
struct TableDetail {
    #[serde(flatten)]
    summary: TableSummary,
    shards: Vec<ShardDetail>,
}

fn table_summary(catalog: &dist_core::Catalog, relation_id: RelationId) -> Option<TableSummary> {
    let table = catalog.table(relation_id)?;
    let relation = catalog.relation(relation_id)?;
    Some(TableSummary {
        relation_id,
        name: relation.qualified_name(),
        table_type: table.table_type(),
        distribution_column: table.distribution_column.as_ref().map(|c| c.name.clone()),
        colocation_id: table.colocation_id,
        auto_converted: table.auto_converted,
        shard_count: catalog.shards_of(relation_id).len(),
    })
}

// Catalog

async fn get_catalog(State(coordinator): State<Arc<Coordinator>>) -> ApiResult<CatalogOverview> {
    let catalog = coordinator.catalog();
    ok(CatalogOverview {
        name: catalog.name.clone(),
        created_at: catalog.created_at.to_rfc3339(),
        updated_at: catalog.updated_at.to_rfc3339(),
        stats: catalog.stats(),
    })
}

async fn list_colocations(
    State(coordinator): State<Arc<Coordinator>>,
) -> ApiResult<Vec<ColocationGroup>> {
    ok(coordinator.catalog().colocation_groups.into_values().collect())
}

// Nodes

async fn list_nodes(State(coordinator): State<Arc<Coordinator>>) -> ApiResult<Vec<Node>> {
    ok(coordinator.catalog().nodes.into_values().collect())
}

async fn get_node(
    State(coordinator): State<Arc<Coordinator>>,
    Path(node_id): Path<NodeId>,
) -> ApiResult<Node> {
    let node = coordinator
        .catalog()
        .node(node_id)
        .cloned()
        .ok_or(DistError::NodeNotFound(node_id))?;
    ok(node)
}

async fn add_node(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<AddNodeRequest>,
) -> ApiResult<NodeIdResponse> {
    let AddNodeRequest {
        name,
        port,
        metadata,
    } = req;
    let node_id = coordinator
        .execute(move |engine| engine.add_node(&name, port, metadata))
        .await?;
    info!("Node {} added via HTTP API", node_id);
    created(NodeIdResponse { node_id })
}

async fn remove_node(
    State(coordinator): State<Arc<Coordinator>>,
    Path(node_id): Path<NodeId>,
) -> ApiResult<()> {
    coordinator
        .execute(move |engine| engine.remove_node(node_id))
        .await?;
    ok(())
}

async fn activate_node(
    State(coordinator): State<Arc<Coordinator>>,
    Path(node_id): Path<NodeId>,
) -> ApiResult<()> {
    coordinator
        .execute(move |engine| engine.activate_node(node_id))
        .await?;
    ok(())
}

async fn disable_node(
    State(coordinator): State<Arc<Coordinator>>,
    Path(node_id): Path<NodeId>,
) -> ApiResult<()> {
    coordinator
        .execute(move |engine| engine.disable_node(node_id))
        .await?;
    ok(())
}

async fn sync_node(
    State(coordinator): State<Arc<Coordinator>>,
    Path(node_id): Path<NodeId>,
) -> ApiResult<()> {
    coordinator
        .execute(move |engine| engine.sync_metadata_to_node(node_id))
        .await?;
    ok(())
}

async fn set_should_have_shards(
    State(coordinator): State<Arc<Coordinator>>,
    Path(node_id): Path<NodeId>,
    Json(req): Json<ShouldHaveShardsRequest>,
) -> ApiResult<()> {
    coordinator
        .execute(move |engine| engine.set_node_should_have_shards(node_id, req.should_have_shards))
        .await?;
    ok(())
}

async fn set_coordinator(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<CoordinatorRequest>,
) -> ApiResult<NodeIdResponse> {
    let node_id = coordinator
        .execute(move |engine| engine.set_coordinator_host(&req.name, req.port))
        .await?;
    ok(NodeIdResponse { node_id })
}

// Relations

async fn list_relations(State(coordinator): State<Arc<Coordinator>>) -> ApiResult<Vec<Relation>> {
    ok(coordinator.catalog().relations.into_values().collect())
}

async fn register_relation(
    State(coordinator): State<Arc<Coordinator>>,
    Json(relation): Json<Relation>,
) -> ApiResult<RelationIdResponse> {
    let relation_id = relation.id;
    coordinator
        .execute(move |engine| engine.register_relation(relation))
        .await?;
    created(RelationIdResponse { relation_id })
}

async fn drop_relation(
    State(coordinator): State<Arc<Coordinator>>,
    Path(relation_id): Path<RelationId>,
) -> ApiResult<()> {
    coordinator
        .execute(move |engine| engine.drop_relation(relation_id))
        .await?;
    ok(())
}

async fn set_row_count(
    State(coordinator): State<Arc<Coordinator>>,
    Path(relation_id): Path<RelationId>,
    Json(req): Json<RowCountRequest>,
) -> ApiResult<()> {
    coordinator
        .execute(move |engine| engine.set_row_count(relation_id, req.row_count))
        .await?;
    ok(())
}

// Distributed tables

async fn list_tables(State(coordinator): State<Arc<Coordinator>>) -> ApiResult<Vec<TableSummary>> {
    let catalog = coordinator.catalog();
    let tables = catalog
        .tables
        .keys()
        .filter_map(|id| table_summary(&catalog, *id))
        .collect();
    ok(tables)
}

async fn get_table(
    State(coordinator): State<Arc<Coordinator>>,
    Path(relation_id): Path<RelationId>,
) -> ApiResult<TableDetail> {
    let catalog = coordinator.catalog();
    let summary = table_summary(&catalog, relation_id).ok_or_else(|| {
        ApiError::NotFound(format!("relation {} is not a distributed table", relation_id))
    })?;
    let shards = catalog
        .shards_of(relation_id)
        .into_iter()
        .map(|shard| ShardDetail {
            shard: shard.clone(),
            placements: catalog
                .placements_of(shard.shard_id)
                .into_iter()
                .cloned()
                .collect(),
        })
        .collect();
    ok(TableDetail { summary, shards })
}

async fn distribute_table(
    State(coordinator): State<Arc<Coordinator>>,
    Path(relation_id): Path<RelationId>,
    Json(req): Json<DistributeRequest>,
) -> ApiResult<()> {
    let op = req.into_operation(coordinator.config().engine.shard_count)?;
    coordinator
        .execute(move |engine| match op {
            DistributeOp::Distributed {
                column,
                method,
                shard_count,
                shard_count_is_strict,
                colocate_with,
            } => engine.create_distributed_table(
                relation_id,
                &column,
                method,
                shard_count,
                shard_count_is_strict,
                &colocate_with,
            ),
            DistributeOp::SingleShard { colocate_with } => engine
                .create_single_shard_table(relation_id, ColocationParam::parse(&colocate_with)),
        })
        .await?;
    ok(())
}

async fn create_reference_table(
    State(coordinator): State<Arc<Coordinator>>,
    Path(relation_id): Path<RelationId>,
) -> ApiResult<()> {
    coordinator
        .execute(move |engine| engine.create_reference_table(relation_id))
        .await?;
    ok(())
}

async fn create_single_shard_table(
    State(coordinator): State<Arc<Coordinator>>,
    Path(relation_id): Path<RelationId>,
    req: Option<Json<SingleShardRequest>>,
) -> ApiResult<()> {
    let colocate_with = req
        .and_then(|Json(r)| r.colocate_with)
        .unwrap_or_else(|| "default".to_string());
    coordinator
        .execute(move |engine| {
            engine.create_single_shard_table(relation_id, ColocationParam::parse(&colocate_with))
        })
        .await?;
    ok(())
}

async fn add_local_table(
    State(coordinator): State<Arc<Coordinator>>,
    Path(relation_id): Path<RelationId>,
) -> ApiResult<()> {
    coordinator
        .execute(move |engine| engine.add_local_table_to_metadata(relation_id))
        .await?;
    ok(())
}

async fn undistribute_table(
    State(coordinator): State<Arc<Coordinator>>,
    Path(relation_id): Path<RelationId>,
) -> ApiResult<()> {
    coordinator
        .execute(move |engine| engine.undistribute_table(relation_id))
        .await?;
    ok(())
}

async fn create_empty_shard(
    State(coordinator): State<Arc<Coordinator>>,
    Path(relation_id): Path<RelationId>,
    req: Option<Json<EmptyShardRequest>>,
) -> ApiResult<ShardIdResponse> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let shard_id = coordinator
        .execute(move |engine| {
            engine.create_empty_shard(
                relation_id,
                req.min_value.as_deref(),
                req.max_value.as_deref(),
            )
        })
        .await?;
    created(ShardIdResponse { shard_id })
}

async fn replicate_reference_tables(
    State(coordinator): State<Arc<Coordinator>>,
) -> ApiResult<ReplicateResponse> {
    let before = coordinator.catalog().placements.len();
    coordinator
        .execute(|engine| engine.ensure_reference_tables_exist_on_all_nodes())
        .await?;
    let placements_added = coordinator.catalog().placements.len().saturating_sub(before);
    ok(ReplicateResponse { placements_added })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(
        column: Option<&str>,
        method: Option<&str>,
        shard_count: Option<u32>,
        colocate_with: Option<&str>,
    ) -> DistributeRequest {
        DistributeRequest {
            distribution_column: column.map(String::from),
            distribution_method: method.map(String::from),
            shard_count,
            colocate_with: colocate_with.map(String::from),
        }
    }

    #[test]
    fn test_defaults() {
        let op = request(Some("id"), None, None, None).into_operation(32).unwrap();
        assert_eq!(
            op,
            DistributeOp::Distributed {
                column: "id".to_string(),
                method: DistributionMethod::Hash,
                shard_count: 32,
                shard_count_is_strict: false,
                colocate_with: "default".to_string(),
            }
        );
    }

    #[test]
    fn test_explicit_shard_count_is_strict() {
        let op = request(Some("id"), Some("hash"), Some(8), Some("none"))
            .into_operation(32)
            .unwrap();
        assert!(matches!(
            op,
            DistributeOp::Distributed {
                shard_count: 8,
                shard_count_is_strict: true,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_combinations() {
        let invalid = [
            request(Some("id"), None, Some(0), None),
            request(Some("id"), None, Some(MAX_SHARD_COUNT + 1), None),
            request(Some("id"), None, Some(4), Some("orders")),
            request(Some("id"), Some("modulo"), None, None),
            request(None, None, Some(4), None),
            request(None, Some("range"), None, None),
        ];
        for req in invalid {
            let debug = format!("{:?}", req);
            assert!(
                matches!(req.into_operation(32), Err(DistError::InvalidParams(_))),
                "{}",
                debug
            );
        }
    }

    #[test]
    fn test_missing_column_means_single_shard() {
        let op = request(None, Some("hash"), None, Some("events"))
            .into_operation(32)
            .unwrap();
        assert_eq!(
            op,
            DistributeOp::SingleShard {
                colocate_with: "events".to_string()
            }
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(&DistError::invalid_params("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(&DistError::NodeNotFound(4)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(&DistError::InvalidGroupState("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(&DistError::Catalog("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
