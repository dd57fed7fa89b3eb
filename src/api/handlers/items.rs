//! Record listing, detail, search and CRUD handlers.

use super::{AppState, ApiError};
use crate::api::extractors::FormFields;
use crate::records::{self, Record};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A record together with its id
#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub id: String,
    pub data: Record,
}

/// GET /: sweep unreferenced images, then list `{id: {name, first_value}}`
pub async fn index(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    state.sweep_quietly().await;

    let name_field = state.name_field();
    let listing: Map<String, Value> = state
        .records
        .list()
        .await?
        .iter()
        .map(|(id, record)| {
            let summary = records::summarize(record, name_field);
            (id.clone(), json!(summary))
        })
        .collect();
    Ok(Json(Value::Object(listing)))
}

/// GET /data/{id}
pub async fn data_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ItemResponse>, ApiError> {
    state.sweep_quietly().await;

    let data = state
        .records
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Record {id} not found")))?;
    Ok(Json(ItemResponse { id, data }))
}

#[derive(Debug, Deserialize, Default)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// GET /search?q=: an id array for an empty query, else `{id: record}` of matches
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    if query.q.is_empty() {
        return Ok(Json(state.records.ids().await?).into_response());
    }

    let matches: Map<String, Value> = state
        .records
        .list()
        .await?
        .into_iter()
        .filter(|(_, record)| records::matches(record, &query.q))
        .map(|(id, record)| (id, Value::Object(record)))
        .collect();
    debug!("search {:?}: {} matches", query.q, matches.len());
    Ok(Json(Value::Object(matches)).into_response())
}

/// POST /api/item: form fields `data` and `fieldsOrder`, both JSON strings
#[instrument(skip(state, form))]
pub async fn create_item(
    State(state): State<Arc<AppState>>,
    form: FormFields,
) -> Result<Json<ItemResponse>, ApiError> {
    let (Some(data), Some(order)) = (form.get("data"), form.get("fieldsOrder")) else {
        warn!("create request without data/fieldsOrder");
        return Err(ApiError::BadRequest("Invalid request data".into()));
    };

    let data: Value = serde_json::from_str(data)
        .map_err(|_| ApiError::BadRequest("Invalid JSON data".into()))?;
    let fields_order: Vec<String> = serde_json::from_str(order)
        .map_err(|_| ApiError::BadRequest("Invalid JSON data".into()))?;
    let data = records::into_record(data)?;
    let record = records::order_for_create(data, &fields_order, state.name_field())?;

    let _guard = state.record_writes.lock().await;
    let ids = state.records.ids().await?;
    let id = records::next_id(ids.iter().map(String::as_str));
    state.records.put(&id, record.clone()).await?;
    info!("Created record {}", id);

    Ok(Json(ItemResponse { id, data: record }))
}

/// PUT /api/item/{id}: JSON body replaces the record
#[instrument(skip(state, body))]
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ItemResponse>, ApiError> {
    let _guard = state.record_writes.lock().await;
    let previous = state
        .records
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Record {id} not found")))?;

    let incoming: Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid JSON data".into()))?;
    let incoming = records::into_record(incoming)?;
    let record = records::order_for_update(&previous, incoming, state.name_field())?;

    state.records.put(&id, record.clone()).await?;
    info!("Updated record {}", id);
    Ok(Json(ItemResponse { id, data: record }))
}

/// DELETE /api/item/{id}: removes the record and the images it references
#[instrument(skip(state))]
pub async fn delete_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let _guard = state.record_writes.lock().await;
    let record = state
        .records
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Record {id} not found")))?;

    let removed = state
        .images
        .delete_many(records::image_references(&record))
        .await?;
    state.records.delete(&id).await?;
    info!("Deleted record {} and {} images", id, removed);

    Ok(Json(json!({ "success": true })))
}
