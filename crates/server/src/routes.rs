//! HTTP routes over the ledger's query surface.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tally_core::Block;
use tally_ledger::{UsageTable, VerificationReport};
use tracing::info;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::ApiError;
use crate::state::AppState;

/// Highest usage still reported as [`Standing::Good`].
pub const GOOD_USAGE_LIMIT: u64 = 40;

/// Stale-tip rebuilds allowed for a server-side update.
const UPDATE_ATTEMPTS: usize = 3;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/get_pubkey", get(get_pubkey))
        .route("/api/get_chain", get(get_chain))
        .route("/api/tip", get(get_tip))
        .route("/api/add_block", post(add_block))
        .route("/api/verify_chain", get(verify_chain))
        .route("/api/usage", get(get_usage))
        .route("/api/get_usage", post(lookup_usage))
        .route("/api/update_usage", post(update_usage))
        .route("/api/get_logs", get(get_logs))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /api/get_pubkey
pub async fn get_pubkey(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let pem = state.public_key_pem()?;
    Ok(([(header::CONTENT_TYPE, "application/x-pem-file")], pem))
}

/// GET /api/get_chain
pub async fn get_chain(State(state): State<AppState>) -> Json<Vec<Block>> {
    Json(state.ledger.chain())
}

/// GET /api/tip
pub async fn get_tip(State(state): State<AppState>) -> Json<Option<Block>> {
    Json(state.ledger.tip())
}

#[derive(Serialize)]
pub struct AddBlockResp {
    pub success: bool,
    pub tip: String,
}

/// POST /api/add_block
pub async fn add_block(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AddBlockResp>, ApiError> {
    let block: Block =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadBlock(e.to_string()))?;

    let tip = tokio::task::spawn_blocking(move || -> Result<String, ApiError> {
        let authorized = state.authorized()?;
        Ok(state
            .ledger
            .append(block, &authorized, state.required_signatures())?)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(AddBlockResp { success: true, tip }))
}

/// GET /api/verify_chain
pub async fn verify_chain(
    State(state): State<AppState>,
) -> Result<Json<VerificationReport>, ApiError> {
    let report = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let authorized = state.authorized()?;
        let result = state
            .ledger
            .verify_all(&authorized, state.required_signatures());
        Ok(result.report())
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(report))
}

/// GET /api/usage
pub async fn get_usage(State(state): State<AppState>) -> Json<UsageTable> {
    Json(state.ledger.usage())
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

#[derive(Deserialize)]
pub struct UsageLookupReq {
    #[serde(alias = "can_id")]
    pub subject_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Standing {
    Good,
    Bad,
    #[serde(rename = "not_found")]
    NotFound,
}

impl Standing {
    pub fn of(count: u64) -> Self {
        if count <= GOOD_USAGE_LIMIT {
            Self::Good
        } else {
            Self::Bad
        }
    }
}

#[derive(Serialize)]
pub struct UsageLookupResp {
    pub status: Standing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// POST /api/get_usage
pub async fn lookup_usage(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<UsageLookupResp>), ApiError> {
    let req: UsageLookupReq = parse_body(&body)?;
    let (status, resp) = match state.ledger.usage().get(&req.subject_id) {
        Some(count) => (
            StatusCode::OK,
            UsageLookupResp {
                status: Standing::of(count),
                count: Some(count),
            },
        ),
        None => (
            StatusCode::NOT_FOUND,
            UsageLookupResp {
                status: Standing::NotFound,
                count: None,
            },
        ),
    };
    Ok((status, Json(resp)))
}

#[derive(Deserialize)]
pub struct UpdateUsageReq {
    #[serde(alias = "can_id")]
    pub subject_id: String,
    #[serde(alias = "new_value")]
    pub count: u64,
}

#[derive(Serialize)]
pub struct UpdateUsageResp {
    pub success: bool,
    pub tip: String,
    pub old_value: u64,
    pub new_value: u64,
}

/// POST /api/update_usage
///
/// Proposes the new value against the current table, signs the block with
/// every local identity and appends it, re-proposing if another writer wins.
pub async fn update_usage(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UpdateUsageResp>, ApiError> {
    let req: UpdateUsageReq = parse_body(&body)?;
    if req.subject_id.trim().is_empty() {
        return Err(ApiError::BadRequest("subject_id must not be empty".into()));
    }

    let resp = tokio::task::spawn_blocking(move || -> Result<UpdateUsageResp, ApiError> {
        let identities = state.identities()?;
        let authorized = state.authorized()?;
        let author = state.config.author.as_str();

        let mut values = (0, 0);
        let tip = state.ledger.append_with_retry(
            |prev_hash, usage| {
                let update = usage.propose(&req.subject_id, req.count, author)?;
                values = (update.old_value, update.new_value);
                Ok(Block::build(update, prev_hash, &identities)?)
            },
            &authorized,
            state.required_signatures(),
            UPDATE_ATTEMPTS,
        )?;

        info!(subject = %req.subject_id, old = values.0, new = values.1, "usage updated");
        Ok(UpdateUsageResp {
            success: true,
            tip,
            old_value: values.0,
            new_value: values.1,
        })
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(resp))
}

/// A block as shown to users: no hashes, no signatures.
#[derive(Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub subject_id: String,
    pub old_value: u64,
    pub new_value: u64,
    pub author: String,
}

impl From<Block> for LogEntry {
    fn from(block: Block) -> Self {
        Self {
            timestamp: block.timestamp,
            subject_id: block.subject_id,
            old_value: block.old_value,
            new_value: block.new_value,
            author: block.author,
        }
    }
}

/// GET /api/get_logs
pub async fn get_logs(State(state): State<AppState>) -> Json<Vec<LogEntry>> {
    Json(state.ledger.chain().into_iter().map(LogEntry::from).collect())
}
