//! Storage endpoints over the authenticated payer's shard.
//!
//! Every handler here resolves the shard from the payment context bound by
//! the gate; the shard is the identity. Paste creation and memory writes
//! schedule fire-and-forget safety scans.

use axum::Extension;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::gateway::Gateway;
use crate::handlers::{api_error, parse_body, request_id_of, require_shard, shard_error, token_of};
use crate::payment::PayerContext;
use crate::safety::ScanJob;
use crate::shard::memory::MemoryUpsert;
use crate::shard::scans::ScanContentType;
use crate::trace_id::TraceId;

type Ctx = Option<Extension<PayerContext>>;
type Trace = Option<Extension<TraceId>>;

// ============================================================================
// KV
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvSetRequest {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub ttl: Option<u64>,
}

pub async fn kv_set(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<KvSetRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, context) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard
        .kv_set(&request.key, request.value, request.metadata, request.ttl)
        .await
    {
        Ok(outcome) => axum::Json(json!({
            "ok": true,
            "key": request.key,
            "created": outcome.created,
            "expiresAt": outcome.expires_at,
            "tokenType": context.token.wire_name(),
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

pub async fn kv_get(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    Path(key): Path<String>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.kv_get(&key).await {
        Ok(Some(row)) => axum::Json(json!({
            "ok": true,
            "entry": row,
            "tokenType": token,
        }))
        .into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, token, "key not found", &request_id),
        Err(err) => shard_error(err, token, &request_id),
    }
}

pub async fn kv_delete(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    Path(key): Path<String>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.kv_delete(&key).await {
        Ok(deleted) => axum::Json(json!({
            "ok": true,
            "deleted": deleted,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct KvListQuery {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn kv_list(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    Query(query): Query<KvListQuery>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.kv_list(query.prefix, query.limit.unwrap_or(100)).await {
        Ok(entries) => axum::Json(json!({
            "ok": true,
            "count": entries.len(),
            "entries": entries,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

// ============================================================================
// Paste
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteCreateRequest {
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub ttl: Option<u64>,
}

pub async fn paste_create(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<PasteCreateRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, context) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let content_for_scan = request.content.clone();
    match shard
        .paste_create(request.content, request.title, request.language, request.ttl)
        .await
    {
        Ok(created) => {
            gateway.safety.schedule(ScanJob {
                payer: context.payer.clone(),
                content_id: created.id.clone(),
                content_type: ScanContentType::Paste,
                content: content_for_scan,
            });
            axum::Json(json!({
                "ok": true,
                "id": created.id,
                "expiresAt": created.expires_at,
                "tokenType": context.token.wire_name(),
            }))
            .into_response()
        }
        Err(err) => shard_error(err, token, &request_id),
    }
}

pub async fn paste_get(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    Path(id): Path<String>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.paste_get(&id).await {
        Ok(Some(paste)) => axum::Json(json!({
            "ok": true,
            "paste": paste,
            "tokenType": token,
        }))
        .into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, token, "paste not found", &request_id),
        Err(err) => shard_error(err, token, &request_id),
    }
}

pub async fn paste_delete(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    Path(id): Path<String>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.paste_delete(&id).await {
        Ok(deleted) => axum::Json(json!({
            "ok": true,
            "deleted": deleted,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

// ============================================================================
// SQL sandbox
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

pub async fn db_query(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<SqlRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.sql_query(request.sql, request.params).await {
        Ok(output) => axum::Json(json!({
            "ok": true,
            "rows": output.rows,
            "rowCount": output.row_count,
            "columns": output.columns,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

pub async fn db_execute(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<SqlRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.sql_execute(request.sql, request.params).await {
        Ok(output) => axum::Json(json!({
            "ok": true,
            "rowsAffected": output.rows_affected,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

pub async fn db_schema(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.sql_schema().await {
        Ok(schema) => axum::Json(json!({
            "ok": true,
            "tables": schema.tables,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

// ============================================================================
// Sync (locks)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRequest {
    pub name: String,
    #[serde(default)]
    pub ttl: Option<u64>,
}

pub async fn sync_lock(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<LockRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.lock_acquire(&request.name, request.ttl).await {
        Ok(result) => with_ok(serde_json::to_value(result), token, &request_id),
        Err(err) => shard_error(err, token, &request_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRequest {
    pub name: String,
    pub token: String,
}

pub async fn sync_unlock(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<UnlockRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.lock_release(&request.name, &request.token).await {
        Ok(result) => with_ok(serde_json::to_value(result), token, &request_id),
        Err(err) => shard_error(err, token, &request_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendRequest {
    pub name: String,
    pub token: String,
    #[serde(default)]
    pub ttl: Option<u64>,
}

pub async fn sync_extend(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<ExtendRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard
        .lock_extend(&request.name, &request.token, request.ttl)
        .await
    {
        Ok(result) => with_ok(serde_json::to_value(result), token, &request_id),
        Err(err) => shard_error(err, token, &request_id),
    }
}

pub async fn sync_status(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    Path(name): Path<String>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.lock_status(&name).await {
        Ok(status) => axum::Json(json!({
            "ok": true,
            "name": name,
            "held": status.is_some(),
            "lock": status,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

pub async fn sync_list(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.lock_list().await {
        Ok(locks) => axum::Json(json!({
            "ok": true,
            "locks": locks,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePushRequest {
    pub queue: String,
    pub items: Vec<serde_json::Value>,
    #[serde(default)]
    pub priority: i64,
}

pub async fn queue_push(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<QueuePushRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard
        .queue_push(&request.queue, request.items, request.priority)
        .await
    {
        Ok(result) => with_ok(serde_json::to_value(result), token, &request_id),
        Err(err) => shard_error(err, token, &request_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTakeRequest {
    pub queue: String,
    #[serde(default)]
    pub count: Option<usize>,
    /// Visibility window for checked-out jobs, seconds.
    #[serde(default)]
    pub visibility: Option<u64>,
}

pub async fn queue_pop(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<QueueTakeRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard
        .queue_pop(&request.queue, request.count.unwrap_or(1), request.visibility)
        .await
    {
        Ok(jobs) => axum::Json(json!({
            "ok": true,
            "count": jobs.len(),
            "jobs": jobs,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCompleteRequest {
    pub queue: String,
    pub job_ids: Vec<String>,
}

pub async fn queue_complete(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<QueueCompleteRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.queue_complete(&request.queue, request.job_ids).await {
        Ok(result) => with_ok(serde_json::to_value(result), token, &request_id),
        Err(err) => shard_error(err, token, &request_id),
    }
}

pub async fn queue_peek(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<QueueTakeRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.queue_peek(&request.queue, request.count.unwrap_or(1)).await {
        Ok(jobs) => axum::Json(json!({
            "ok": true,
            "count": jobs.len(),
            "jobs": jobs,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusRequest {
    pub queue: String,
}

pub async fn queue_status(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<QueueStatusRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.queue_status(&request.queue).await {
        Ok(status) => with_ok(serde_json::to_value(status), token, &request_id),
        Err(err) => shard_error(err, token, &request_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueClearRequest {
    pub queue: String,
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn queue_clear(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<QueueClearRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.queue_clear(&request.queue, request.status).await {
        Ok(result) => with_ok(serde_json::to_value(result), token, &request_id),
        Err(err) => shard_error(err, token, &request_id),
    }
}

// ============================================================================
// Vector memory
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStoreItem {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStoreRequest {
    pub items: Vec<MemoryStoreItem>,
}

pub async fn memory_store(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<MemoryStoreRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, context) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let scan_jobs: Vec<(String, String)> = request
        .items
        .iter()
        .map(|item| (item.id.clone(), item.text.clone()))
        .collect();
    let items: Vec<MemoryUpsert> = request
        .items
        .into_iter()
        .map(|item| MemoryUpsert {
            id: item.id,
            text: item.text,
            embedding: item.embedding,
            metadata: item.metadata,
        })
        .collect();
    match shard.memory_store(items).await {
        Ok(stored) => {
            for (id, text) in scan_jobs {
                gateway.safety.schedule(ScanJob {
                    payer: context.payer.clone(),
                    content_id: id,
                    content_type: ScanContentType::Memory,
                    content: text,
                });
            }
            with_ok(serde_json::to_value(stored), token, &request_id)
        }
        Err(err) => shard_error(err, token, &request_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchRequest {
    #[serde(default)]
    pub query_embedding: Option<Vec<f64>>,
    /// Alternative to `queryEmbedding`: embed this text first. Requires a
    /// configured embedding service.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

pub async fn memory_search(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<MemorySearchRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let query = match (request.query_embedding, request.text) {
        (Some(embedding), _) => embedding,
        (None, Some(text)) => match &gateway.embeddings {
            Some(embeddings) => match embeddings.embed(&text).await {
                Ok(embedding) => embedding,
                Err(err) => {
                    return api_error(err.surface_status(), token, err.to_string(), &request_id);
                }
            },
            None => {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    token,
                    "text search requires a configured embedding service; pass queryEmbedding",
                    &request_id,
                );
            }
        },
        (None, None) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                token,
                "queryEmbedding or text is required",
                &request_id,
            );
        }
    };
    match shard
        .memory_search(
            query,
            request.limit.unwrap_or(10),
            request.threshold.unwrap_or(0.0),
        )
        .await
    {
        Ok(results) => axum::Json(json!({
            "ok": true,
            "count": results.len(),
            "results": results,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDeleteRequest {
    pub ids: Vec<String>,
}

pub async fn memory_delete(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<MemoryDeleteRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.memory_delete(request.ids).await {
        Ok(deleted) => with_ok(serde_json::to_value(deleted), token, &request_id),
        Err(err) => shard_error(err, token, &request_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryListRequest {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

pub async fn memory_list(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
    body: Result<axum::Json<MemoryListRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard
        .memory_list(request.limit.unwrap_or(100), request.offset.unwrap_or(0))
        .await
    {
        Ok(items) => axum::Json(json!({
            "ok": true,
            "count": items.len(),
            "items": items,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

pub async fn memory_clear(
    State(gateway): State<Arc<Gateway>>,
    ctx: Ctx,
    trace: Trace,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let (shard, _) = match require_shard(&gateway, &ctx, &request_id) {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    match shard.memory_clear().await {
        Ok(cleared) => axum::Json(json!({
            "ok": true,
            "cleared": cleared,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => shard_error(err, token, &request_id),
    }
}

/// Merges a subsystem result object with the `ok`/`tokenType` envelope.
fn with_ok(
    value: Result<serde_json::Value, serde_json::Error>,
    token: &str,
    request_id: &str,
) -> Response {
    match value {
        Ok(serde_json::Value::Object(mut object)) => {
            object.insert("ok".to_string(), serde_json::Value::Bool(true));
            object.insert("tokenType".to_string(), serde_json::Value::from(token));
            axum::Json(serde_json::Value::Object(object)).into_response()
        }
        Ok(other) => axum::Json(json!({
            "ok": true,
            "result": other,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            token,
            format!("serialization failure: {err}"),
            request_id,
        ),
    }
}
