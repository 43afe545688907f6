use axum::{
    extract::{Path, Query, State as AxumState},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, get_service, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use crate::error::{BracketError, StoreError, TournamentError};
use crate::events::EventLog;
use crate::tournament::Tournament;
use crate::types::{MatchId, Session, TeamId};

pub const OPERATOR_HEADER: &str = "x-operator";

#[derive(Clone)]
pub struct AppState {
    pub tournament: Arc<Tournament>,
    pub events: Arc<EventLog>,
}

#[derive(Debug)]
pub enum ApiError {
    MissingOperator,
    Tournament(TournamentError),
}

impl From<TournamentError> for ApiError {
    fn from(err: TournamentError) -> Self {
        ApiError::Tournament(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        let err = match self {
            ApiError::MissingOperator => return StatusCode::UNAUTHORIZED,
            ApiError::Tournament(err) => err,
        };
        match err {
            TournamentError::Store(StoreError::NotFound(_))
            | TournamentError::Bracket(BracketError::Store(StoreError::NotFound(_))) => StatusCode::NOT_FOUND,
            TournamentError::Store(StoreError::Unavailable(_))
            | TournamentError::Bracket(BracketError::Store(StoreError::Unavailable(_))) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TournamentError::Poisoned => StatusCode::INTERNAL_SERVER_ERROR,
            TournamentError::UnknownTeam(_)
            | TournamentError::Store(StoreError::InvalidWinner { .. })
            | TournamentError::Bracket(BracketError::InvalidDraw(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::MissingOperator => format!("missing {OPERATOR_HEADER} header"),
            ApiError::Tournament(err) => err.to_string(),
        };
        if status.is_server_error() {
            error!(%status, "{message}");
        } else {
            warn!(%status, "{message}");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn session_from(headers: &HeaderMap) -> Result<Session, ApiError> {
    headers
        .get(OPERATOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(Session::new)
        .ok_or(ApiError::MissingOperator)
}

fn no_store<T: Serialize>(payload: T) -> Response {
    (
        [("Cache-Control", "no-store"), ("Pragma", "no-cache"), ("Expires", "0")],
        Json(payload),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateQuery {
    since_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WalkoverBody {
    winner: TeamId,
}

pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/state.json", get(get_state_json))
        .route("/events.json", get(get_events_json))
        .route("/matches/:id/start", post(start_match))
        .route("/matches/:id/pause", post(pause_match))
        .route("/matches/:id/point", post(point))
        .route("/matches/:id/side-out", post(side_out))
        .route("/matches/:id/reset", post(reset_match))
        .route("/matches/:id/walkover", post(walkover))
        .route("/matches/:id/cancel", post(cancel_match))
        .route("/matches/:id/advance", post(advance_match))
        .with_state(state);
    match static_dir {
        Some(dir) => api.fallback_service(get_service(ServeDir::new(dir))),
        None => api,
    }
}

pub async fn serve(state: AppState, static_dir: Option<PathBuf>, addr: &str) -> std::io::Result<()> {
    let app = router(state, static_dir);
    let listener = TcpListener::bind(addr).await?;
    info!("scoreboard listening at http://{addr}/");
    axum::serve(listener, app).await
}

async fn get_state_json(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Response, ApiError> {
    Ok(no_store(state.tournament.snapshot(query.since_ms)?))
}

async fn get_events_json(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<EventsQuery>,
) -> Response {
    no_store(state.events.since(query.after.unwrap_or(0)))
}

async fn start_match(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<MatchId>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = session_from(&headers)?;
    Ok(no_store(state.tournament.start_match(id, &session)?))
}

async fn pause_match(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<MatchId>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = session_from(&headers)?;
    Ok(no_store(state.tournament.pause_match(id, &session)?))
}

async fn point(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<MatchId>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = session_from(&headers)?;
    Ok(no_store(state.tournament.point(id, &session)?))
}

async fn side_out(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<MatchId>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = session_from(&headers)?;
    Ok(no_store(state.tournament.side_out(id, &session)?))
}

async fn reset_match(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<MatchId>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = session_from(&headers)?;
    Ok(no_store(state.tournament.reset_match(id, &session)?))
}

async fn walkover(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<MatchId>,
    headers: HeaderMap,
    Json(body): Json<WalkoverBody>,
) -> Result<Response, ApiError> {
    let session = session_from(&headers)?;
    Ok(no_store(state.tournament.walkover(id, body.winner, &session)?))
}

async fn cancel_match(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<MatchId>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = session_from(&headers)?;
    Ok(no_store(state.tournament.cancel_match(id, &session)?))
}

async fn advance_match(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<MatchId>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = session_from(&headers)?;
    Ok(no_store(state.tournament.advance_match(id, &session)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoreError;
    use crate::store::InMemoryMatchStore;
    use crate::tournament::TournamentSettings;
    use crate::types::{MatchStatus, Team};
    use axum::{
        body::{to_bytes, Body},
        http::{HeaderValue, Request},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn two_team_state() -> AppState {
        let events = Arc::new(EventLog::new());
        let teams = (1..=2)
            .map(|id| Team {
                id,
                name: format!("Team {id}"),
                players: [format!("P{id}a"), format!("P{id}b")],
            })
            .collect();
        let tournament = Tournament::create(
            TournamentSettings::new(1, "Final Only", 2),
            teams,
            Arc::new(InMemoryMatchStore::new()),
            events.clone(),
            &Session::system(),
        )
        .unwrap();
        tournament.seed(&[Some(1), Some(2)], &Session::system()).unwrap();
        AppState { tournament: Arc::new(tournament), events }
    }

    fn post(uri: String, operator: Option<&str>) -> Request<Body> {
        let mut request = Request::post(uri);
        if let Some(operator) = operator {
            request = request.header(OPERATOR_HEADER, operator);
        }
        request.body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn point_route_requires_operator_and_returns_update() {
        let state = two_team_state();
        let id = state.tournament.bracket().match_at(1, 0).unwrap().id;
        let app = router(state, None);

        let anonymous = app.clone().oneshot(post(format!("/matches/{id}/point"), None)).await.unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
        assert!(json_body(anonymous).await["error"].as_str().unwrap().contains(OPERATOR_HEADER));

        let started = app
            .clone()
            .oneshot(post(format!("/matches/{id}/start"), Some("court-1")))
            .await
            .unwrap();
        assert_eq!(started.status(), StatusCode::OK);

        let scored = app
            .clone()
            .oneshot(post(format!("/matches/{id}/point"), Some("court-1")))
            .await
            .unwrap();
        assert_eq!(scored.status(), StatusCode::OK);
        assert_eq!(scored.headers()["cache-control"], "no-store");
        let update = json_body(scored).await;
        assert_eq!(update["matchId"], id);
        assert_eq!(update["outcome"]["kind"], "applied");
        assert_eq!(update["state"]["pointsA"], 1);
        assert_eq!(update["state"]["servingSide"], "A");

        let missing = app.oneshot(post("/matches/999/start".to_string(), Some("court-1"))).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn state_route_reports_operator_writes() {
        let state = two_team_state();
        let id = state.tournament.bracket().match_at(1, 0).unwrap().id;
        let app = router(state, None);
        app.clone()
            .oneshot(post(format!("/matches/{id}/start"), Some("court-3")))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::get("/state.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot = json_body(response).await;
        assert_eq!(snapshot["teams"].as_array().unwrap().len(), 2);
        let only = &snapshot["matches"][0];
        assert_eq!(only["status"], "inProgress");
        assert_eq!(only["updatedBy"], "court-3");
        assert_eq!(only["roundLabel"], "Final");
        assert_eq!(only["live"]["isActive"], true);
    }

    #[test]
    fn operator_header_becomes_session() {
        let mut headers = HeaderMap::new();
        assert!(matches!(session_from(&headers), Err(ApiError::MissingOperator)));
        headers.insert(OPERATOR_HEADER, HeaderValue::from_static("  "));
        assert!(matches!(session_from(&headers), Err(ApiError::MissingOperator)));
        headers.insert(OPERATOR_HEADER, HeaderValue::from_static("court-2"));
        assert_eq!(session_from(&headers).unwrap().operator, "court-2");
    }

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (ApiError::MissingOperator, StatusCode::UNAUTHORIZED),
            (TournamentError::from(StoreError::NotFound(4)).into(), StatusCode::NOT_FOUND),
            (
                TournamentError::Bracket(BracketError::Store(StoreError::NotFound(4))).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                TournamentError::from(StoreError::VersionConflict { id: 1, expected: 2, actual: 3 }).into(),
                StatusCode::CONFLICT,
            ),
            (
                TournamentError::from(StoreError::InvalidStatus { id: 1, status: MatchStatus::Pending }).into(),
                StatusCode::CONFLICT,
            ),
            (
                TournamentError::from(ScoreError::invalid("point", "match is not active")).into(),
                StatusCode::CONFLICT,
            ),
            (TournamentError::UnknownTeam(9).into(), StatusCode::BAD_REQUEST),
            (TournamentError::Poisoned.into(), StatusCode::INTERNAL_SERVER_ERROR),
            (
                TournamentError::from(StoreError::Unavailable("disk".into())).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
