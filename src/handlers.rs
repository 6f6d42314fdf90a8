use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use wordstats_types::{ChannelName, UserId};

use crate::fetch::Fetcher;
use crate::ingest::{InboundMessage, Ingestor, Outcome, UserRegistry};
use crate::persist::PersistentStore;
use crate::query::{WordStatsQuery, WordStatsReport, run_query};
use crate::store::{SharedStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub persistent: Arc<PersistentStore>,
    pub registry: Arc<UserRegistry>,
    pub ingestor: Ingestor,
    pub fetcher: Fetcher,
    pub nextbus: NextbusUrls,
    pub ranking_display: usize,
}

#[derive(Debug, Clone)]
pub struct NextbusUrls {
    pub north: String,
    pub south: String,
}

impl AppState {
    pub fn new(
        persistent: Arc<PersistentStore>,
        registry: Arc<UserRegistry>,
        fetcher: Fetcher,
        nextbus: NextbusUrls,
        ranking_display: usize,
        ignore_queries: bool,
    ) -> Self {
        let ingestor = Ingestor::new(
            persistent.store().clone(),
            Arc::clone(&registry) as _,
            ignore_queries,
        );
        Self {
            persistent,
            registry,
            ingestor,
            fetcher,
            nextbus,
            ranking_display,
        }
    }

    fn store(&self) -> &SharedStore {
        self.persistent.store()
    }
}

#[derive(Deserialize)]
pub struct AddWordBody {
    pub word: String,
}

#[derive(Deserialize)]
pub struct WordStatsParams {
    pub user: Option<u64>,
    pub word: Option<String>,
    pub requester: Option<u64>,
    /// Ranking length; `0` returns every ranked user.
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct RegisterUserBody {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub hostmasks: Vec<String>,
}

#[derive(Serialize)]
struct IngestResponse {
    recorded: bool,
    count: u64,
}

#[derive(Serialize)]
struct WordsResponse {
    channel: String,
    words: Vec<String>,
}

#[derive(Serialize)]
struct WordStatsResponse {
    #[serde(flatten)]
    report: WordStatsReport,
    reply: String,
}

#[derive(Serialize)]
struct NextbusResponse {
    northbound: Vec<String>,
    southbound: Vec<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/messages", post(ingest_message))
        .route("/v1/channels/{channel}/words", get(list_words).post(add_word))
        .route("/v1/channels/{channel}/words/{word}", delete(remove_word))
        .route("/v1/channels/{channel}/wordstats", get(wordstats))
        .route("/v1/users", post(register_user))
        .route("/v1/flush", post(flush))
        .route("/v1/nextbus", get(nextbus))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

async fn ingest_message(
    State(state): State<AppState>,
    Json(msg): Json<InboundMessage>,
) -> Result<Response, ApiError> {
    let outcome = state.ingestor.ingest(&msg)?;
    let (recorded, count) = match outcome {
        Outcome::Recorded(count) => (true, count),
        _ => (false, 0),
    };
    Ok((StatusCode::ACCEPTED, Json(IngestResponse { recorded, count })).into_response())
}

async fn list_words(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Json<WordsResponse> {
    let words = state
        .store()
        .read()
        .words(&ChannelName::new(&channel))
        .iter()
        .map(ToString::to_string)
        .collect();
    Json(WordsResponse { channel, words })
}

async fn add_word(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(body): Json<AddWordBody>,
) -> Result<Response, ApiError> {
    state
        .store()
        .write()
        .add_word(&ChannelName::new(&channel), &body.word)?;
    info!("now tracking {:?} in {channel}", body.word.trim());
    Ok(StatusCode::CREATED.into_response())
}

async fn remove_word(
    State(state): State<AppState>,
    Path((channel, word)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let channel = ChannelName::new(&channel);
    {
        let mut db = state.store().write();
        if db.words(&channel).is_empty() {
            return Err(ApiError::NotFound(
                "I am not currently keeping any word stats.".to_string(),
            ));
        }
        db.remove_word(&channel, &word)?;
    }
    info!("stopped tracking {word:?} in {channel}");
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn wordstats(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Query(params): Query<WordStatsParams>,
) -> Result<Json<WordStatsResponse>, ApiError> {
    let query = WordStatsQuery {
        user: params.user.map(UserId),
        word: params.word.filter(|w| !w.trim().is_empty()),
        requester: params.requester.map(UserId),
        limit: params.limit,
    };
    let report = run_query(
        &state.store().read(),
        state.registry.as_ref(),
        &ChannelName::new(&channel),
        &query,
        state.ranking_display,
    )?;
    let reply = report.to_string();
    Ok(Json(WordStatsResponse { report, reply }))
}

async fn register_user(
    State(state): State<AppState>,
    Json(body): Json<RegisterUserBody>,
) -> Result<Response, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    state
        .registry
        .register(UserId(body.id), body.name.trim(), &body.hostmasks);
    Ok(StatusCode::CREATED.into_response())
}

async fn flush(State(state): State<AppState>) -> Result<Response, ApiError> {
    let persistent = Arc::clone(&state.persistent);
    tokio::task::spawn_blocking(move || persistent.flush())
        .await
        .map_err(|_| ApiError::Internal)?
        .map_err(|e| {
            warn!("flush failed: {e}");
            ApiError::Internal
        })?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn nextbus(State(state): State<AppState>) -> Result<Json<NextbusResponse>, ApiError> {
    let (northbound, southbound) = state
        .fetcher
        .nextbus(&state.nextbus.north, &state.nextbus.south)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;
    Ok(Json(NextbusResponse {
        northbound,
        southbound,
    }))
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Upstream(String),
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        ApiError::BadRequest(msg.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidWord(_) | StoreError::InvalidChannel(_) => {
                ApiError::BadRequest(err.to_string())
            }
            StoreError::UnknownWord { .. }
            | StoreError::NotFound(_)
            | StoreError::NotRanked { .. } => ApiError::NotFound(err.to_string()),
            StoreError::Overflow { .. } => {
                warn!("{err}");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                let body = Json(ErrorResponse { error: msg });
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            ApiError::NotFound(msg) => {
                let body = Json(ErrorResponse { error: msg });
                (StatusCode::NOT_FOUND, body).into_response()
            }
            ApiError::Upstream(msg) => {
                let body = Json(ErrorResponse { error: msg });
                (StatusCode::BAD_GATEWAY, body).into_response()
            }
            ApiError::Internal => {
                let body = Json(json!({ "error": "internal server error" }));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}
