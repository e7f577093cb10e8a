use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;

use tracing::{error, info};

use crate::listening::{
    AggregateMaintainer, ListeningError, Minutes, PlayEvent, SubjectKind,
};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{log_requests, metrics::metrics_handler, state::*, RequestsLoggingLevel, ServerConfig};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: &'static str,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Deserialize, Debug)]
struct NewListenerBody {
    pub name: String,
    pub city: String,
}

#[derive(Deserialize, Debug)]
struct NewTrackBody {
    pub artist: String,
    pub title: String,
    pub genre: String,
    pub duration: Minutes,
}

#[derive(Serialize)]
struct CreatedResponse {
    id: Uuid,
}

#[derive(Deserialize, Debug)]
struct ListenersQuery {
    pub city: Option<String>,
}

#[derive(Deserialize, Debug)]
struct TracksQuery {
    pub artist: Option<String>,
}

#[derive(Deserialize, Debug)]
struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps domain errors onto HTTP statuses with a JSON body.
struct ApiError(ListeningError);

impl From<ListeningError> for ApiError {
    fn from(err: ListeningError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ListeningError::NotFound { .. } => StatusCode::NOT_FOUND,
            ListeningError::Validation { .. } => StatusCode::BAD_REQUEST,
            ListeningError::Storage(e) => {
                error!("Storage failure while serving request: {}", e);
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Malformed bodies answer 400 with the same JSON error shape as domain
/// validation failures.
fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => Err(ListeningError::validation("body", rejection.body_text()).into()),
    }
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: env!("CARGO_PKG_VERSION"),
    };
    Json(stats)
}

async fn post_listener(
    State(maintainer): State<AggregateMaintainer>,
    payload: std::result::Result<Json<NewListenerBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = json_body(payload)?;
    let id = maintainer
        .registry()
        .register_listener(&body.name, &body.city)
        .await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn get_listener(
    State(maintainer): State<AggregateMaintainer>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    match maintainer.registry().find_listener(id).await? {
        Some(listener) => Ok(Json(listener).into_response()),
        None => Err(ListeningError::not_found("listener", id).into()),
    }
}

async fn get_listeners(
    State(maintainer): State<AggregateMaintainer>,
    Query(query): Query<ListenersQuery>,
) -> ApiResult<Response> {
    let registry = maintainer.registry();
    let listeners = match query.city {
        Some(city) => registry.listeners_in_city(&city).await?,
        None => registry.list_listeners().await?,
    };
    Ok(Json(listeners).into_response())
}

async fn post_track(
    State(maintainer): State<AggregateMaintainer>,
    payload: std::result::Result<Json<NewTrackBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = json_body(payload)?;
    let id = maintainer
        .registry()
        .register_track(&body.artist, &body.title, &body.genre, body.duration)
        .await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn get_track(
    State(maintainer): State<AggregateMaintainer>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    match maintainer.registry().find_track(id).await? {
        Some(track) => Ok(Json(track).into_response()),
        None => Err(ListeningError::not_found("track", id).into()),
    }
}

async fn get_tracks(
    State(maintainer): State<AggregateMaintainer>,
    Query(query): Query<TracksQuery>,
) -> ApiResult<Response> {
    let registry = maintainer.registry();
    let tracks = match query.artist {
        Some(artist) => registry.tracks_by_artist(&artist).await?,
        None => registry.list_tracks().await?,
    };
    Ok(Json(tracks).into_response())
}

async fn post_play(
    State(maintainer): State<AggregateMaintainer>,
    payload: std::result::Result<Json<PlayEvent>, JsonRejection>,
) -> ApiResult<Response> {
    let event = json_body(payload)?;
    let outcome = maintainer.apply_play_event(event).await?;
    Ok(Json(outcome).into_response())
}

async fn get_top_tracks(
    State(maintainer): State<AggregateMaintainer>,
    Path((kind, value)): Path<(String, String)>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Response> {
    let kind: SubjectKind = kind.parse()?;
    let top = maintainer.top_tracks_for(kind, &value, query.limit).await?;
    Ok(Json(top).into_response())
}

async fn get_daily_listens(
    State(maintainer): State<AggregateMaintainer>,
    Path((kind, value)): Path<(String, String)>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Response> {
    let kind: SubjectKind = kind.parse()?;
    let records = maintainer
        .recent_daily_listens(kind, &value, query.limit)
        .await?;
    Ok(Json(records).into_response())
}

pub fn make_app(config: ServerConfig, maintainer: AggregateMaintainer) -> Router {
    let state = ServerState::new(config, maintainer);

    let entity_routes: Router = Router::new()
        .route("/listeners", post(post_listener).get(get_listeners))
        .route("/listeners/{id}", get(get_listener))
        .route("/tracks", post(post_track).get(get_tracks))
        .route("/tracks/{id}", get(get_track))
        .with_state(state.clone());

    let stats_routes: Router = Router::new()
        .route("/plays", post(post_play))
        .route("/top/{kind}/{value}", get(get_top_tracks))
        .route("/daily/{kind}/{value}", get(get_daily_listens))
        .with_state(state.clone());

    let home_router: Router = Router::new()
        .route("/", get(home))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone());

    home_router
        .nest("/v1", entity_routes.merge(stats_routes))
        .layer(middleware::from_fn_with_state(state, log_requests))
}

/// Serves until `shutdown` resolves, then drains in-flight requests.
pub async fn run_server<F>(
    maintainer: AggregateMaintainer,
    requests_logging_level: RequestsLoggingLevel,
    port: u16,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = ServerConfig {
        port,
        requests_logging_level,
    };
    let app = make_app(config, maintainer);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
