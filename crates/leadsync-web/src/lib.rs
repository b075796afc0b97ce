//! JSON HTTP surface over the replication engine.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use leadsync_core::{LeadUpdate, SyncError};
use leadsync_sync::LeadSync;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "leadsync-web";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LeadSync>,
}

impl AppState {
    pub fn new(engine: Arc<LeadSync>) -> Self {
        Self { engine }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ListQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
struct NewTab {
    sheet_name: String,
}

/// `?sheets=Main Leads,June Leads` limits a pass to those tabs.
#[derive(Debug, Deserialize, Default)]
struct PassQuery {
    sheets: Option<String>,
}

impl PassQuery {
    fn sheet_names(&self) -> Option<Vec<String>> {
        let names: Vec<String> = self
            .sheets
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        (!names.is_empty()).then_some(names)
    }
}

#[derive(Debug, Deserialize)]
struct DuplicateQuery {
    phone: String,
}

#[derive(Debug, Serialize)]
struct DuplicateAnswer {
    phone: String,
    assigned_to: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/batches/{batch}/sheets",
            get(list_sheets_handler).post(add_sheet_handler),
        )
        .route("/batches/{batch}/sheets/{sheet}", delete(remove_sheet_handler))
        .route(
            "/batches/{batch}/sheets/{sheet}/leads/{lead_id}",
            patch(update_lead_handler),
        )
        .route("/batches/{batch}/sync/pull", post(pull_handler))
        .route("/batches/{batch}/sync/push", post(push_handler))
        .route("/batches/{batch}/duplicates", get(duplicate_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(engine: Arc<LeadSync>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app(AppState::new(engine))).await?;
    Ok(())
}

async fn health_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn list_sheets_handler(
    State(state): State<Arc<AppState>>,
    Path(batch): Path<String>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state.engine.list_sheets_for_batch(&batch, query.force).await {
        Ok(sheets) => Json(json!({ "batch_name": batch, "sheets": sheets })).into_response(),
        Err(err) => error_response(err),
    }
}

async fn add_sheet_handler(
    State(state): State<Arc<AppState>>,
    Path(batch): Path<String>,
    Json(body): Json<NewTab>,
) -> Response {
    match state.engine.add_batch_tab(&batch, &body.sheet_name).await {
        Ok(report) => (StatusCode::CREATED, Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn remove_sheet_handler(
    State(state): State<Arc<AppState>>,
    Path((batch, sheet)): Path<(String, String)>,
) -> Response {
    match state.engine.remove_batch_tab(&batch, &sheet).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => error_response(err),
    }
}

async fn update_lead_handler(
    State(state): State<Arc<AppState>>,
    Path((batch, sheet, lead_id)): Path<(String, String, String)>,
    Json(update): Json<LeadUpdate>,
) -> Response {
    match state
        .engine
        .update_batch_lead(&batch, &sheet, &lead_id, update)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => error_response(err),
    }
}

async fn pull_handler(
    State(state): State<Arc<AppState>>,
    Path(batch): Path<String>,
    Query(query): Query<PassQuery>,
) -> Response {
    let names = query.sheet_names();
    match state.engine.sync_batch_to_store(&batch, names.as_deref()).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => error_response(err),
    }
}

async fn push_handler(
    State(state): State<Arc<AppState>>,
    Path(batch): Path<String>,
    Query(query): Query<PassQuery>,
) -> Response {
    let names = query.sheet_names();
    match state
        .engine
        .sync_assignments_to_sheets(&batch, names.as_deref())
        .await
    {
        Ok(report) => Json(report).into_response(),
        Err(err) => error_response(err),
    }
}

async fn duplicate_handler(
    State(state): State<Arc<AppState>>,
    Path(batch): Path<String>,
    Query(query): Query<DuplicateQuery>,
) -> Response {
    match state
        .engine
        .get_assignee_for_duplicate_phone(&batch, &query.phone)
        .await
    {
        Ok(assigned_to) => Json(DuplicateAnswer {
            phone: state.engine.phone_format().canonicalize(&query.phone),
            assigned_to,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

fn status_for(err: &SyncError) -> StatusCode {
    match err {
        SyncError::NotFound(_) => StatusCode::NOT_FOUND,
        SyncError::NotConfigured(_) | SyncError::SchemaMismatch { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SyncError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SyncError::RemoteTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
        SyncError::Rejected(_) => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(err: SyncError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(kind = err.kind(), error = %err, "request failed");
    }
    (
        status,
        Json(json!({ "error": err.to_string(), "kind": err.kind() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use leadsync_sheets::MemorySheets;
    use leadsync_storage::MemoryStore;
    use leadsync_sync::EngineConfig;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_app() -> (Router, Arc<MemorySheets>) {
        let sheets = Arc::new(MemorySheets::new());
        sheets.put_tab(
            "admin",
            "Main Leads",
            &[
                &["id", "full_name", "phone", "assigned_to"],
                &["7", "Sam", "0771234567", ""],
            ],
        );
        sheets.add_spreadsheet("alice-sheet");
        let store = Arc::new(MemoryStore::new());
        store.register_batch("B1", "admin");
        store.register_officer("B1", "Alice", "alice-sheet");
        let engine = LeadSync::new(
            EngineConfig::default(),
            sheets.clone(),
            store.clone(),
            store.clone(),
            store,
        );
        (app(AppState::new(Arc::new(engine))), sheets)
    }

    async fn body_json(resp: Response) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn lists_batch_sheets() {
        let (app, _) = test_app();
        let resp = app.oneshot(get("/batches/B1/sheets?force=true")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["sheets"], json!(["Main Leads"]));
    }

    #[tokio::test]
    async fn unknown_batch_is_unprocessable() {
        let (app, _) = test_app();
        let resp = app.oneshot(get("/batches/B9/sheets")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(resp).await["kind"], "not_configured");
    }

    #[tokio::test]
    async fn patch_assigns_a_lead() {
        let (app, sheets) = test_app();
        let resp = app
            .oneshot(json_request(
                "PATCH",
                "/batches/B1/sheets/Main%20Leads/leads/7",
                json!({ "assigned_to": "Alice" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["lead"]["ops"]["assigned_to"], "Alice");
        assert_eq!(sheets.tab_rows("admin", "Main Leads").unwrap()[1][3], "Alice");
    }

    #[tokio::test]
    async fn patch_of_a_missing_lead_is_not_found() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(json_request(
                "PATCH",
                "/batches/B1/sheets/Main%20Leads/leads/404",
                json!({ "status": "Called" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_lookup_answers_with_the_canonical_phone() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(get("/batches/B1/duplicates?phone=077%20123%204567"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["phone"], "94771234567");
        assert_eq!(body["assigned_to"], "");
    }

    #[tokio::test]
    async fn pull_reports_per_tab() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/batches/B1/sync/pull?sheets=Main%20Leads")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["tabs"][0]["sheet_name"], "Main Leads");
        assert_eq!(body["tabs"][0]["inserted"], 1);
    }

    #[tokio::test]
    async fn tabs_can_be_added_and_removed() {
        let (app, sheets) = test_app();
        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/batches/B1/sheets",
                json!({ "sheet_name": "June Leads" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(sheets.tab_titles("alice-sheet").contains(&"June Leads".to_string()));

        let resp = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/batches/B1/sheets/June%20Leads")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!sheets.tab_titles("admin").contains(&"June Leads".to_string()));
    }

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(
            status_for(&SyncError::schema_mismatch("T", "id")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&SyncError::RemoteTransient("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for(&SyncError::Rejected("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(&SyncError::InvalidInput("x".into())), StatusCode::BAD_REQUEST);
    }
}
