//! Dining table API handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::Serialize;
use serde_json::json;
use validator::Validate;

use crate::api::operator;
use crate::core::ServerState;
use crate::db::{DiningTable, TableCreate, TableUpdate};
use crate::lifecycle::TokenValidation;
use crate::utils::{AppError, AppResponse, AppResult, ok, ok_with_message};

/// Table row plus derived occupancy, as staff dashboards want it.
#[derive(Debug, Serialize)]
pub struct TableStatus {
    #[serde(flatten)]
    pub table: DiningTable,
    pub occupied: bool,
}

/// GET /api/tables - all tables with occupancy
pub async fn list(
    State(state): State<ServerState>,
) -> AppResult<Json<AppResponse<Vec<TableStatus>>>> {
    let registry = state.coordinator.registry();
    let mut statuses = Vec::new();
    for table in registry.list()? {
        let occupied = registry.is_occupied(table.number)?;
        statuses.push(TableStatus { table, occupied });
    }
    Ok(ok(statuses))
}

/// GET /api/tables/:number - one table with occupancy
pub async fn get_by_number(
    State(state): State<ServerState>,
    Path(number): Path<u32>,
) -> AppResult<Json<AppResponse<TableStatus>>> {
    let registry = state.coordinator.registry();
    let table = registry.get(number)?;
    let occupied = registry.is_occupied(number)?;
    Ok(ok(TableStatus { table, occupied }))
}

/// POST /api/tables - create a table
pub async fn create(
    State(state): State<ServerState>,
    Json(payload): Json<TableCreate>,
) -> AppResult<Json<AppResponse<DiningTable>>> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let table = state.coordinator.registry().create(payload)?;
    Ok(ok(table))
}

/// PUT /api/tables/:number - update seats or active flag
pub async fn update(
    State(state): State<ServerState>,
    Path(number): Path<u32>,
    Json(payload): Json<TableUpdate>,
) -> AppResult<Json<AppResponse<DiningTable>>> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let table = state.coordinator.registry().update(number, payload)?;
    Ok(ok(table))
}

/// DELETE /api/tables/:number - remove a table (refused while occupied)
pub async fn delete(
    State(state): State<ServerState>,
    Path(number): Path<u32>,
) -> AppResult<Json<AppResponse<bool>>> {
    let removed = state.coordinator.registry().delete(number)?;
    Ok(ok(removed))
}

/// POST /api/tables/:number/access - customer scanned the QR code
pub async fn access(
    State(state): State<ServerState>,
    Path(number): Path<u32>,
) -> AppResult<Json<AppResponse<TokenValidation>>> {
    let grant = state.coordinator.access_table(number).await?;
    Ok(ok_with_message(grant, "Welcome! Your table session is ready."))
}

/// POST /api/tables/:number/free - staff clears the table
pub async fn free(
    State(state): State<ServerState>,
    Path(number): Path<u32>,
    headers: HeaderMap,
) -> AppResult<Json<AppResponse<serde_json::Value>>> {
    let operator = operator(&headers);
    let cancelled = state
        .coordinator
        .free_table(number, operator.as_deref())
        .await?;
    Ok(ok(json!({ "table": number, "cancelled_orders": cancelled })))
}

/// POST /api/tables/free-all - end-of-day reset
pub async fn free_all(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> AppResult<Json<AppResponse<serde_json::Value>>> {
    let operator = operator(&headers);
    let freed = state
        .coordinator
        .free_all_tables(operator.as_deref())
        .await?;
    let report: Vec<_> = freed
        .into_iter()
        .map(|(table, cancelled)| json!({ "table": table, "cancelled_orders": cancelled }))
        .collect();
    Ok(ok(json!({ "freed": report })))
}
