//! Read-only HTTP API.
//!
//! Serves document lookup, entity resolution, and CRM listings over a
//! [`CrmStore`]. Every route lives under the configured prefix (default
//! `/api`).
//!
//! # Endpoints
//!
//! | Method | Path | Cache (s) |
//! |--------|------|-----------|
//! | `GET` | `/health` | |
//! | `GET` | `/v1/persons/by-doc?doc=` | 20 |
//! | `GET` | `/v1/persons?q=&limit=&offset=` | 20 |
//! | `GET` | `/v1/persons/{id}` | 60 |
//! | `GET` | `/v1/organizations/by-doc?doc=` | 20 |
//! | `GET` | `/v1/organizations/{id}` | 60 |
//! | `GET` | `/v1/entities/by-doc?doc=&hint=PF\|PJ` | 20 |
//! | `GET` | `/v1/users?active_only=&limit=&offset=` | 20 |
//! | `GET` | `/v1/users/search?q=` | 20 |
//! | `GET` | `/v1/users/{id}` | 60 |
//! | `GET` | `/v1/pipelines/base-nova` | 60 |
//! | `GET` | `/v1/pipelines` | 120 |
//! | `GET` | `/v1/pipelines/{id}` | 60 |
//! | `GET` | `/v1/stages?pipeline_id=` | 60 |
//! | `GET` | `/v1/deals/{id}` | 30 |
//! | `GET` | `/v1/deals/base-nova?doc=` | 10 |
//! | `GET` | `/v1/deals/by-entity?person_id=&org_id=` | 10 |
//! | `GET` | `/v1/search/deals?q=` | 10 |
//! | `GET` | `/v1/search/deals/advanced` | 15 |
//!
//! Everything except `/health` requires `Authorization: Bearer <token>`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_implemented", "message": "organizacoes not available" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `not_implemented` (501), `internal` (500).
//!
//! A route whose backing table is missing answers 501; entity resolution
//! degrades instead, skipping the missing entity type.

use anyhow::Context;
use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, Request, State,
    },
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{
    de::{self, DeserializeOwned},
    Deserialize, Deserializer, Serialize,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use pipeboard_core::document::{normalize_digits, DocumentKind};
use pipeboard_core::query::{parse_timestamp_bound, DealSearch, DealStatus, Page};
use pipeboard_core::resolve::{probe_first, resolve_document};
use pipeboard_core::store::{CrmStore, OrganizationsByDocument, PersonsByDocument, Table};

use crate::auth::check_bearer;
use crate::config::{Config, PaginationConfig};
use crate::pg_store::PgStore;
use crate::{bootstrap, db};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn CrmStore>,
    token: Arc<str>,
    pagination: PaginationConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn CrmStore>, token: &str, pagination: PaginationConfig) -> Self {
        Self {
            store,
            token: Arc::from(token),
            pagination,
        }
    }

    fn listing_page(&self, limit: Option<i64>, offset: Option<i64>) -> Page {
        Page::clamp(limit, offset, self.pagination.listing)
    }

    fn deals_page(&self, limit: Option<i64>, offset: Option<i64>) -> Page {
        Page::clamp(limit, offset, self.pagination.deals)
    }

    /// 501 unless `table` exists.
    async fn require_table(&self, table: Table) -> Result<(), AppError> {
        if self.store.table_available(table).await? {
            Ok(())
        } else {
            tracing::warn!(table = %table, "request needs a missing table");
            Err(not_implemented(format!("{} not available", table)))
        }
    }
}

/// Starts the HTTP server.
///
/// Requires a configured token, bootstraps the database helpers, then
/// serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let token = config.auth.require_token()?;
    let pool = db::connect(config).await?;
    bootstrap::run_bootstrap(&pool).await?;

    let state = AppState::new(
        Arc::new(PgStore::new(pool)),
        &token,
        config.pagination.clone(),
    );
    let app = build_router(state, config.api_prefix());

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(
        bind = %config.server.bind,
        prefix = config.api_prefix(),
        "pipeboard API listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the router with every route mounted under `prefix`.
///
/// An empty prefix serves the routes at the root.
pub fn build_router(state: AppState, prefix: &str) -> Router {
    let protected = Router::new()
        .route("/v1/persons/by-doc", get(handle_person_by_doc))
        .route("/v1/persons", get(handle_list_persons))
        .route("/v1/persons/{id}", get(handle_person))
        .route("/v1/organizations/by-doc", get(handle_organization_by_doc))
        .route("/v1/organizations/{id}", get(handle_organization))
        .route("/v1/entities/by-doc", get(handle_entities_by_doc))
        .route("/v1/users", get(handle_list_users))
        .route("/v1/users/search", get(handle_search_users))
        .route("/v1/users/{id}", get(handle_user))
        .route("/v1/pipelines/base-nova", get(handle_base_nova_pipelines))
        .route("/v1/pipelines", get(handle_list_pipelines))
        .route("/v1/pipelines/{id}", get(handle_pipeline))
        .route("/v1/stages", get(handle_stages))
        .route("/v1/deals/base-nova", get(handle_base_nova_deals))
        .route("/v1/deals/by-entity", get(handle_deals_by_entity))
        .route("/v1/deals/{id}", get(handle_deal))
        .route("/v1/search/deals", get(handle_search_deals))
        .route("/v1/search/deals/advanced", get(handle_search_deals_advanced))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    let api = Router::new()
        .route("/health", get(handle_health))
        .merge(protected)
        .with_state(state);

    let app = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(prefix, api)
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    app.layer(TraceLayer::new_for_http()).layer(cors)
}

async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    check_bearer(request.headers(), &state.token).map_err(|f| unauthorized(f.message()))?;
    Ok(next.run(request).await)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Store failures: the detail goes to the log, the client gets a generic
/// message.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: "internal error".to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn not_implemented(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_IMPLEMENTED,
        code: "not_implemented",
        message: message.into(),
    }
}

// ============ Request helpers ============

/// Unwraps a query string, reporting malformed ones in the error contract.
fn query_params<T: DeserializeOwned>(
    query: Result<Query<T>, QueryRejection>,
) -> Result<T, AppError> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

fn path_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, AppError> {
    path.map(|Path(id)| id)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

fn cache_control(max_age: u32) -> HeaderValue {
    HeaderValue::from_str(&format!("public, max-age={}", max_age))
        .unwrap_or_else(|_| HeaderValue::from_static("no-cache"))
}

/// JSON response with `Cache-Control: public, max-age=<max_age>`.
fn cached<T: Serialize>(max_age: u32, body: T) -> Response {
    let mut response = Json(body).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, cache_control(max_age));
    response
}

/// Like [`cached`], plus extra response headers. Values that are not valid
/// header text are skipped.
fn cached_with_headers<T: Serialize>(
    max_age: u32,
    extra: &[(&'static str, String)],
    body: T,
) -> Response {
    let mut response = cached(max_age, body);
    for (name, value) in extra {
        if let Ok(value) = HeaderValue::from_str(value) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(*name), value);
        }
    }
    response
}

fn joined_or_dash(variants: &[String]) -> String {
    if variants.is_empty() {
        "-".to_string()
    } else {
        variants.join(",")
    }
}

fn found<T>(record: Option<T>, what: &str, id: impl std::fmt::Display) -> Result<T, AppError> {
    record.ok_or_else(|| not_found(format!("{} {} not found", what, id)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
}

/// Round-trips to the database. Never requires a token.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ok = match state.store.ping().await {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            false
        }
    };
    Json(HealthResponse { ok })
}

// ============ Persons & organizations ============

#[derive(Deserialize)]
struct DocParams {
    doc: Option<String>,
}

fn required_doc(params: DocParams) -> Result<String, AppError> {
    params
        .doc
        .ok_or_else(|| bad_request("query parameter 'doc' is required"))
}

/// Keys tried by the single-type document lookups: the kind's variants,
/// then the raw digit string when it is not one of them.
///
/// A document with more digits than the kind's canonical length is not of
/// that kind and yields no keys.
fn single_kind_keys(kind: DocumentKind, doc: &str, variants: &[String]) -> Vec<String> {
    let digits = normalize_digits(doc);
    if digits.len() > kind.canonical_len() {
        return Vec::new();
    }
    let mut keys = variants.to_vec();
    if !digits.is_empty() && !keys.contains(&digits) {
        keys.push(digits);
    }
    keys
}

async fn handle_person_by_doc(
    State(state): State<AppState>,
    params: Result<Query<DocParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let doc = required_doc(query_params(params)?)?;
    state.require_table(Table::Persons).await?;

    let variants = DocumentKind::Pf.variants(&doc);
    let keys = single_kind_keys(DocumentKind::Pf, &doc, &variants);
    let person = probe_first(&PersonsByDocument(state.store.as_ref()), &keys).await?;
    let person = found(person, "person with document", &doc)?;

    Ok(cached_with_headers(
        20,
        &[("x-normalized-doc", variants.join(","))],
        person,
    ))
}

#[derive(Deserialize)]
struct ListParams {
    q: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn handle_list_persons(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query_params(params)?;
    state.require_table(Table::Persons).await?;

    let page = state.listing_page(params.limit, params.offset);
    let q = params.q.as_deref().filter(|q| !q.is_empty());
    let persons = state.store.list_persons(q, page).await?;
    Ok(cached(20, persons))
}

async fn handle_person(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Response, AppError> {
    let id = path_id(id)?;
    state.require_table(Table::Persons).await?;

    let person = found(state.store.person_by_id(id).await?, "person", id)?;
    Ok(cached(60, person))
}

async fn handle_organization_by_doc(
    State(state): State<AppState>,
    params: Result<Query<DocParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let doc = required_doc(query_params(params)?)?;
    state.require_table(Table::Organizations).await?;

    let variants = DocumentKind::Pj.variants(&doc);
    let keys = single_kind_keys(DocumentKind::Pj, &doc, &variants);
    let organization = probe_first(&OrganizationsByDocument(state.store.as_ref()), &keys).await?;
    let organization = found(organization, "organization with document", &doc)?;

    Ok(cached_with_headers(
        20,
        &[("x-normalized-doc", variants.join(","))],
        organization,
    ))
}

async fn handle_organization(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Response, AppError> {
    let id = path_id(id)?;
    state.require_table(Table::Organizations).await?;

    let organization = found(state.store.organization_by_id(id).await?, "organization", id)?;
    Ok(cached(60, organization))
}

// ============ GET /v1/entities/by-doc ============

#[derive(Deserialize)]
struct EntityParams {
    doc: Option<String>,
    hint: Option<String>,
}

/// Resolves a document to a person or an organization.
///
/// Missing tables are skipped rather than reported; the normalized
/// variants are echoed in `X-Variants-PF` / `X-Variants-PJ`.
async fn handle_entities_by_doc(
    State(state): State<AppState>,
    params: Result<Query<EntityParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query_params(params)?;
    let doc = params
        .doc
        .ok_or_else(|| bad_request("query parameter 'doc' is required"))?;
    let hint = params
        .hint
        .as_deref()
        .map(str::parse::<DocumentKind>)
        .transpose()
        .map_err(|e| bad_request(e.to_string()))?;

    let resolution = resolve_document(state.store.as_ref(), &doc, hint).await?;
    let headers = [
        ("x-variants-pf", joined_or_dash(&resolution.normalized.pf)),
        ("x-variants-pj", joined_or_dash(&resolution.normalized.pj)),
    ];
    Ok(cached_with_headers(20, &headers, resolution))
}

// ============ Users ============

#[derive(Deserialize)]
struct UserListParams {
    #[serde(default, deserialize_with = "deserialize_flag")]
    active_only: Option<bool>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// Parses a query-string boolean: `true/false`, `1/0`, `yes/no`, `on/off`
/// and `t/f`, `y/n`, case-insensitively.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "t" | "y" => Some(true),
        "false" | "0" | "no" | "off" | "f" | "n" => Some(false),
        _ => None,
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|raw| {
            parse_flag(&raw)
                .ok_or_else(|| de::Error::custom(format!("invalid boolean '{}'", raw)))
        })
        .transpose()
}

async fn handle_list_users(
    State(state): State<AppState>,
    params: Result<Query<UserListParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query_params(params)?;
    state.require_table(Table::Users).await?;

    let page = state.listing_page(params.limit, params.offset);
    let users = state
        .store
        .list_users(params.active_only.unwrap_or(true), page)
        .await?;
    Ok(cached(20, users))
}

async fn handle_search_users(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query_params(params)?;
    let Some(q) = params.q.filter(|q| !q.is_empty()) else {
        return Ok(Json(Vec::<()>::new()).into_response());
    };
    state.require_table(Table::Users).await?;

    let page = state.listing_page(params.limit, params.offset);
    let users = state.store.search_users(&q, page).await?;
    Ok(cached(20, users))
}

async fn handle_user(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Response, AppError> {
    let id = path_id(id)?;
    state.require_table(Table::Users).await?;

    let user = found(state.store.user_by_id(id).await?, "user", id)?;
    Ok(cached(60, user))
}

// ============ Pipelines & stages ============

async fn handle_base_nova_pipelines(State(state): State<AppState>) -> Result<Response, AppError> {
    state.require_table(Table::Pipelines).await?;
    Ok(cached(60, state.store.base_nova_pipelines().await?))
}

async fn handle_list_pipelines(State(state): State<AppState>) -> Result<Response, AppError> {
    state.require_table(Table::Pipelines).await?;
    Ok(cached(120, state.store.list_pipelines().await?))
}

async fn handle_pipeline(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Response, AppError> {
    let id = path_id(id)?;
    state.require_table(Table::Pipelines).await?;

    let pipeline = found(state.store.pipeline_by_id(id).await?, "pipeline", id)?;
    Ok(cached(60, pipeline))
}

#[derive(Deserialize)]
struct StageParams {
    pipeline_id: Option<i64>,
}

async fn handle_stages(
    State(state): State<AppState>,
    params: Result<Query<StageParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let pipeline_id = query_params(params)?
        .pipeline_id
        .ok_or_else(|| bad_request("query parameter 'pipeline_id' is required"))?;
    state.require_table(Table::Stages).await?;

    Ok(cached(60, state.store.stages_by_pipeline(pipeline_id).await?))
}

// ============ Deals ============

async fn handle_deal(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Response, AppError> {
    let id = path_id(id)?;
    state.require_table(Table::Deals).await?;

    let deal = found(state.store.deal_by_id(id).await?, "deal", id)?;
    Ok(cached(30, deal))
}

#[derive(Deserialize)]
struct BaseNovaParams {
    doc: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn handle_base_nova_deals(
    State(state): State<AppState>,
    params: Result<Query<BaseNovaParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query_params(params)?;
    state.require_table(Table::Deals).await?;

    let page = state.deals_page(params.limit, params.offset);
    let digits = params
        .doc
        .as_deref()
        .map(normalize_digits);
    let deals = state.store.base_nova_deals(digits.as_deref(), page).await?;
    Ok(cached(10, deals))
}

#[derive(Deserialize)]
struct ByEntityParams {
    person_id: Option<i64>,
    org_id: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn handle_deals_by_entity(
    State(state): State<AppState>,
    params: Result<Query<ByEntityParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query_params(params)?;
    if params.person_id.is_none() && params.org_id.is_none() {
        return Err(bad_request("person_id or org_id is required"));
    }
    state.require_table(Table::Deals).await?;

    let page = state.deals_page(params.limit, params.offset);
    let deals = state
        .store
        .deals_by_entity(params.person_id, params.org_id, page)
        .await?;
    Ok(cached(10, deals))
}

async fn handle_search_deals(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query_params(params)?;
    let Some(q) = params.q.filter(|q| !q.is_empty()) else {
        return Ok(Json(Vec::<()>::new()).into_response());
    };
    state.require_table(Table::Deals).await?;

    let page = state.listing_page(params.limit, params.offset);
    let deals = state.store.search_deals(&q, page).await?;
    Ok(cached(10, deals))
}

#[derive(Deserialize)]
struct AdvancedParams {
    pipeline_id: Option<i64>,
    stage_id: Option<i64>,
    status: Option<String>,
    owner_id: Option<i64>,
    person_id: Option<i64>,
    org_id: Option<i64>,
    updated_from: Option<String>,
    updated_to: Option<String>,
    added_from: Option<String>,
    added_to: Option<String>,
    doc_like: Option<String>,
    q: Option<String>,
    order_by: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

fn timestamp_bound(
    raw: Option<&str>,
    name: &str,
) -> Result<Option<chrono::NaiveDateTime>, AppError> {
    raw.map(parse_timestamp_bound)
        .transpose()
        .map_err(|e| bad_request(format!("{}: {}", name, e)))
}

impl AdvancedParams {
    fn into_search(self) -> Result<DealSearch, AppError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<DealStatus>)
            .transpose()
            .map_err(|e| bad_request(e.to_string()))?;

        Ok(DealSearch {
            pipeline_id: self.pipeline_id,
            stage_id: self.stage_id,
            status,
            owner_id: self.owner_id,
            person_id: self.person_id,
            org_id: self.org_id,
            updated_from: timestamp_bound(self.updated_from.as_deref(), "updated_from")?,
            updated_to: timestamp_bound(self.updated_to.as_deref(), "updated_to")?,
            added_from: timestamp_bound(self.added_from.as_deref(), "added_from")?,
            added_to: timestamp_bound(self.added_to.as_deref(), "added_to")?,
            doc_like: self.doc_like,
            q: self.q,
            order_by: self.order_by,
        })
    }
}

async fn handle_search_deals_advanced(
    State(state): State<AppState>,
    params: Result<Query<AdvancedParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query_params(params)?;
    let page = state.listing_page(params.limit, params.offset);
    let search = params.into_search()?;
    state.require_table(Table::Deals).await?;

    let deals = state.store.search_deals_advanced(&search, page).await?;
    Ok(cached(15, deals))
}
