use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use pitstop_core::inspection_contracts::{
    InspectionDetail, InspectionHistoryEntry, ItemUpdate, PublicStatusView, TeamListView,
};
use pitstop_core::{validate_event_code, ContractError};
use pitstop_inspection::{ErrorKind, InspectionError, InspectionService};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

const USER_HEADER: &str = "x-pitstop-user";
const ROLE_HEADER: &str = "x-pitstop-role";
const REQUEST_ID_HEADER: &str = "x-request-id";
const ANONYMOUS: &str = "anonymous";
const OVERRIDE_ROLES: [&str; 2] = ["lead", "admin"];

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) service: InspectionService,
    pub(crate) checklist_etag: String,
}

impl AppState {
    pub(crate) fn new(service: InspectionService) -> Result<Self, ContractError> {
        let checklist_etag = format!("\"{}\"", service.checklist().fingerprint()?);
        Ok(Self {
            service,
            checklist_etag,
        })
    }
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/events/:code/inspection/checklist", get(checklist))
        .route("/events/:code/inspection/teams", get(list_teams))
        .route("/events/:code/inspection/teams/:team", get(detail))
        .route("/events/:code/inspection/teams/:team/items", patch(update_items))
        .route("/events/:code/inspection/teams/:team/status", patch(update_status))
        .route("/events/:code/inspection/teams/:team/comment", post(save_comment))
        .route("/events/:code/inspection/teams/:team/override", post(override_status))
        .route("/events/:code/inspection/teams/:team/history", get(history))
        .route("/events/:code/inspection/public-status", get(public_status))
        .layer(middleware::from_fn(request_context))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl ApiError {
    fn invalid_argument(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ErrorKind::InvalidArgument.as_str(),
            message: message.into(),
        }
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            error: "forbidden",
            message: message.into(),
        }
    }

    fn unexpected() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: ErrorKind::Unexpected.as_str(),
            message: "internal error".to_string(),
        }
    }
}

impl From<InspectionError> for ApiError {
    fn from(err: InspectionError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::Unexpected => {
                error!(event = "request_failed", error = %err);
                return ApiError::unexpected();
            }
        };
        Self {
            status,
            error: kind.as_str(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid_argument(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Tags each request with a fresh id, logs its outcome and echoes the id
/// back in `x-request-id`.
async fn request_context(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let span = info_span!(
        "http.request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let mut response = next.run(request).instrument(span.clone()).await;
    let status = response.status();
    let latency_ms = started.elapsed().as_millis() as u64;
    span.in_scope(|| {
        if status.is_server_error() {
            warn!(event = "http_request", status = status.as_u16(), latency_ms);
        } else {
            info!(event = "http_request", status = status.as_u16(), latency_ms);
        }
    });

    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Store access is synchronous SQLite; keep it off the async workers.
async fn run_blocking<T, F>(operation: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, InspectionError> + Send + 'static,
{
    let span = Span::current();
    match tokio::task::spawn_blocking(move || span.in_scope(operation)).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(err) => {
            error!(event = "blocking_task_failed", error = %err);
            Err(ApiError::unexpected())
        }
    }
}

fn parse_team_number(raw: &str) -> Result<u32, ApiError> {
    raw.parse::<u32>()
        .ok()
        .filter(|number| *number > 0)
        .ok_or_else(|| {
            ApiError::invalid_argument(format!("team must be a positive integer, got {raw:?}"))
        })
}

/// Weak comparison over an `If-None-Match` list, `*` matching anything.
fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn actor(headers: &HeaderMap) -> String {
    header_text(headers, USER_HEADER)
        .unwrap_or(ANONYMOUS)
        .to_string()
}

fn may_override(headers: &HeaderMap) -> bool {
    header_text(headers, ROLE_HEADER).is_some_and(|role| {
        OVERRIDE_ROLES
            .iter()
            .any(|allowed| role.eq_ignore_ascii_case(allowed))
    })
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    search: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemsRequest {
    items: Vec<ItemUpdate>,
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct CommentRequest {
    #[serde(default)]
    comment: Option<String>,
}

async fn checklist(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validate_event_code(&code).map_err(InspectionError::from)?;
    let etag = state.checklist_etag.clone();
    let unchanged = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| etag_matches(value, &etag));
    if unchanged {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
    }
    Ok((
        [(header::ETAG, etag)],
        Json(state.service.checklist().clone()),
    )
        .into_response())
}

async fn list_teams(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<TeamListView>, ApiError> {
    run_blocking(move || state.service.list_teams(&code, query.search.as_deref()))
        .await
        .map(Json)
}

async fn detail(
    State(state): State<AppState>,
    Path((code, team)): Path<(String, String)>,
) -> Result<Json<InspectionDetail>, ApiError> {
    let team_number = parse_team_number(&team)?;
    run_blocking(move || state.service.detail(&code, team_number))
        .await
        .map(Json)
}

async fn update_items(
    State(state): State<AppState>,
    Path((code, team)): Path<(String, String)>,
    headers: HeaderMap,
    payload: Result<Json<ItemsRequest>, JsonRejection>,
) -> Result<Json<InspectionDetail>, ApiError> {
    let team_number = parse_team_number(&team)?;
    let Json(request) = payload?;
    let actor = actor(&headers);
    run_blocking(move || {
        state
            .service
            .update_items(&code, team_number, &request.items, &actor)
    })
    .await
    .map(Json)
}

async fn update_status(
    State(state): State<AppState>,
    Path((code, team)): Path<(String, String)>,
    headers: HeaderMap,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<InspectionDetail>, ApiError> {
    let team_number = parse_team_number(&team)?;
    let Json(request) = payload?;
    let actor = actor(&headers);
    run_blocking(move || {
        state
            .service
            .update_status(&code, team_number, &request.status, &actor)
    })
    .await
    .map(Json)
}

async fn save_comment(
    State(state): State<AppState>,
    Path((code, team)): Path<(String, String)>,
    payload: Result<Json<CommentRequest>, JsonRejection>,
) -> Result<Json<InspectionDetail>, ApiError> {
    let team_number = parse_team_number(&team)?;
    let Json(request) = payload?;
    let comment = request.comment.unwrap_or_default();
    run_blocking(move || state.service.save_comment(&code, team_number, &comment))
        .await
        .map(Json)
}

async fn override_status(
    State(state): State<AppState>,
    Path((code, team)): Path<(String, String)>,
    headers: HeaderMap,
    payload: Result<Json<CommentRequest>, JsonRejection>,
) -> Result<Json<InspectionDetail>, ApiError> {
    let team_number = parse_team_number(&team)?;
    let actor = actor(&headers);
    if !may_override(&headers) {
        warn!(
            event = "override_forbidden",
            code = %code,
            team = team_number,
            actor = %actor,
        );
        return Err(ApiError::forbidden("override requires the lead or admin role"));
    }
    let Json(request) = payload?;
    let comment = request.comment.unwrap_or_default();
    run_blocking(move || {
        state
            .service
            .override_status(&code, team_number, &comment, &actor)
    })
    .await
    .map(Json)
}

async fn history(
    State(state): State<AppState>,
    Path((code, team)): Path<(String, String)>,
) -> Result<Json<Vec<InspectionHistoryEntry>>, ApiError> {
    let team_number = parse_team_number(&team)?;
    run_blocking(move || state.service.history(&code, team_number))
        .await
        .map(Json)
}

async fn public_status(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<PublicStatusView>, ApiError> {
    run_blocking(move || state.service.public_status(&code))
        .await
        .map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::{TimeZone, Utc};
    use pitstop_core::checklist::ChecklistDefinition;
    use pitstop_core::inspection_contracts::{HistoryAction, InspectionStatus};
    use pitstop_core::Event;
    use pitstop_storage::{EventCatalog, EventStores};
    use rusqlite::Connection;
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;

    const CHECKLIST: &str = r#"{
        "version": "hub.v1",
        "sections": [{"id": "general", "label": "General", "order": 1}],
        "items": [
            {"key": "A", "label": "Robot safe", "sectionId": "general", "required": true},
            {"key": "B", "label": "Notes", "sectionId": "general", "inputType": "text"}
        ]
    }"#;

    fn fixture() -> (TempDir, AppState) {
        let dir = TempDir::new().expect("temp dir");
        let stores = EventStores::new(dir.path());
        let start = Utc
            .with_ymd_and_hms(2026, 4, 18, 9, 0, 0)
            .single()
            .expect("valid timestamp");
        EventCatalog::open(stores.catalog_path())
            .expect("open catalog")
            .upsert_event(&Event {
                code: "demo1".to_string(),
                name: "Demo Qualifier".to_string(),
                region: "USCA".to_string(),
                event_type: 2,
                status: 1,
                start,
                end: start,
                divisions: 0,
            })
            .expect("register event");
        Connection::open(stores.store_path("demo1").expect("store path"))
            .expect("create store")
            .execute_batch(
                "
                CREATE TABLE teams (number INTEGER PRIMARY KEY);
                INSERT INTO teams VALUES (42);
                ",
            )
            .expect("seed store");

        let checklist = ChecklistDefinition::from_json(CHECKLIST).expect("checklist");
        let service = InspectionService::new(stores, Arc::new(checklist));
        (dir, AppState::new(service).expect("state"))
    }

    fn team_path(team: &str) -> Path<(String, String)> {
        Path(("demo1".to_string(), team.to_string()))
    }

    fn headers(user: &str, role: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_str(user).expect("header"));
        if let Some(role) = role {
            headers.insert(ROLE_HEADER, HeaderValue::from_str(role).expect("header"));
        }
        headers
    }

    async fn error_body(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[test]
    fn router_builds_with_every_route() {
        let (_dir, state) = fixture();
        let _ = router(state);
    }

    #[test]
    fn team_segment_must_be_a_positive_integer() {
        assert_eq!(parse_team_number("42").expect("valid"), 42);
        for raw in ["0", "-3", "abc", "", "4.5"] {
            let err = parse_team_number(raw).expect_err("invalid team");
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
            assert_eq!(err.error, "invalid_argument");
        }
    }

    #[test]
    fn if_none_match_accepts_lists_weak_tags_and_wildcard() {
        let etag = "\"abc123\"";
        assert!(etag_matches("\"abc123\"", etag));
        assert!(etag_matches("W/\"abc123\"", etag));
        assert!(etag_matches("\"old\", W/\"abc123\"", etag));
        assert!(etag_matches("*", etag));
        assert!(!etag_matches("\"old\"", etag));
        assert!(!etag_matches("abc123", etag));
    }

    #[test]
    fn actor_and_role_come_from_headers() {
        assert_eq!(actor(&HeaderMap::new()), ANONYMOUS);
        assert_eq!(actor(&headers(" inspector1 ", None)), "inspector1");
        assert!(!may_override(&headers("inspector1", None)));
        assert!(!may_override(&headers("inspector1", Some("inspector"))));
        assert!(may_override(&headers("lead1", Some("Lead"))));
        assert!(may_override(&headers("root", Some("admin"))));
    }

    #[tokio::test]
    async fn inspection_flow_through_handlers() {
        let (_dir, state) = fixture();

        let Json(listing) = list_teams(
            State(state.clone()),
            Path("demo1".to_string()),
            Query(ListQuery::default()),
        )
        .await
        .expect("list");
        assert_eq!(listing.teams[0].team.team_name, "Team 42");
        assert_eq!(listing.teams[0].status, InspectionStatus::NotStarted);

        let Json(detail) = update_items(
            State(state.clone()),
            team_path("42"),
            headers("inspector1", None),
            Ok(Json(ItemsRequest {
                items: vec![ItemUpdate::set("A", "ok")],
            })),
        )
        .await
        .expect("items");
        assert_eq!(detail.inspection.status, InspectionStatus::InProgress);
        assert_eq!(detail.progress.completed_required, 1);

        let Json(detail) = update_status(
            State(state.clone()),
            team_path("42"),
            headers("inspector1", None),
            Ok(Json(StatusRequest {
                status: "PASSED".to_string(),
            })),
        )
        .await
        .expect("status");
        assert_eq!(detail.inspection.status, InspectionStatus::Passed);

        let Json(entries) = history(State(state.clone()), team_path("42"))
            .await
            .expect("history");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|entry| entry.actor == "inspector1"));
    }

    #[tokio::test]
    async fn incomplete_pass_is_a_bad_request_with_error_body() {
        let (_dir, state) = fixture();
        let err = update_status(
            State(state),
            team_path("42"),
            HeaderMap::new(),
            Ok(Json(StatusRequest {
                status: "PASSED".to_string(),
            })),
        )
        .await
        .expect_err("incomplete");

        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_argument");
        assert!(body["message"]
            .as_str()
            .is_some_and(|message| message.contains("1 of 1 required items missing")));
    }

    #[tokio::test]
    async fn override_requires_lead_role() {
        let (_dir, state) = fixture();
        let err = override_status(
            State(state.clone()),
            team_path("42"),
            headers("inspector1", Some("inspector")),
            Ok(Json(CommentRequest::default())),
        )
        .await
        .expect_err("forbidden");
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let Json(detail) = override_status(
            State(state.clone()),
            team_path("42"),
            headers("lead1", Some("lead")),
            Ok(Json(CommentRequest {
                comment: Some("forced due to time constraints".to_string()),
            })),
        )
        .await
        .expect("override");
        assert_eq!(detail.inspection.status, InspectionStatus::Passed);

        let Json(entries) = history(State(state), team_path("42"))
            .await
            .expect("history");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, HistoryAction::LeadOverride);
        assert!(entries[0].is_override);
        assert_eq!(entries[0].actor, "lead1");
    }

    #[tokio::test]
    async fn unknown_event_and_team_are_not_found() {
        let (_dir, state) = fixture();

        let err = public_status(State(state.clone()), Path("ghost".to_string()))
            .await
            .expect_err("unknown event");
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let err = detail(State(state.clone()), team_path("7"))
            .await
            .expect_err("unknown team");
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = public_status(State(state), Path("../etc".to_string()))
            .await
            .expect_err("bad code");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn comment_round_trips_and_public_board_hides_it() {
        let (_dir, state) = fixture();
        let Json(detail) = save_comment(
            State(state.clone()),
            team_path("42"),
            Ok(Json(CommentRequest {
                comment: Some("zip tie loose".to_string()),
            })),
        )
        .await
        .expect("comment");
        assert_eq!(detail.inspection.comment.as_deref(), Some("zip tie loose"));

        let Json(board) = public_status(State(state), Path("demo1".to_string()))
            .await
            .expect("public");
        let json = serde_json::to_string(&board).expect("serialize");
        assert!(!json.contains("zip tie loose"));
        assert_eq!(board.teams[0].team_number, 42);
    }

    #[tokio::test]
    async fn checklist_carries_etag_and_honours_if_none_match() {
        let (_dir, state) = fixture();
        let response = checklist(
            State(state.clone()),
            Path("demo1".to_string()),
            HeaderMap::new(),
        )
        .await
        .expect("checklist");
        assert_eq!(response.status(), StatusCode::OK);
        let etag = response
            .headers()
            .get(header::ETAG)
            .cloned()
            .expect("etag header");
        assert_eq!(
            etag.to_str().expect("ascii etag"),
            state.checklist_etag.as_str()
        );

        let mut conditional = HeaderMap::new();
        conditional.insert(header::IF_NONE_MATCH, etag);
        let response = checklist(State(state), Path("demo1".to_string()), conditional)
            .await
            .expect("checklist");
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }
}
