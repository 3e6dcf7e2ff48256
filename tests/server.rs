//! HTTP-level tests for the read API.
//!
//! Drive the real router with `tower::ServiceExt::oneshot` over an
//! in-memory store, so no database is needed.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use pipeboard::config::PaginationConfig;
use pipeboard::server::{build_router, AppState};
use pipeboard_core::models::{Deal, Organization, Person, Pipeline, Stage, User};
use pipeboard_core::store::memory::InMemoryStore;
use pipeboard_core::store::Table;

const TOKEN: &str = "test-token";

fn at(day: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).single()
}

fn person(id: i64, name: &str, cpf: &str, day: u32) -> Person {
    Person {
        id,
        name: Some(name.to_string()),
        owner_id: Some(7),
        update_time: at(day),
        cpf_text: Some(cpf.to_string()),
    }
}

fn organization(id: i64, name: &str, cnpj: &str) -> Organization {
    Organization {
        id,
        name: Some(name.to_string()),
        owner_id: None,
        update_time: at(1),
        cnpj_text: Some(cnpj.to_string()),
    }
}

fn deal(id: i64, title: &str, pipeline_id: i64, day: u32) -> Deal {
    Deal {
        id,
        title: title.to_string(),
        status: Some(if id % 2 == 0 { "won" } else { "open" }.to_string()),
        value: Some(id as f64 * 100.0),
        currency: Some("BRL".to_string()),
        pipeline_id: Some(pipeline_id),
        stage_id: Some(1),
        person_id: Some(10),
        org_id: None,
        update_time: at(day),
        add_time: at(day),
        user_id: Some(7),
    }
}

fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store
        .insert_person(person(10, "Ana Souza", "123.456.789-01", 3))
        .unwrap();
    store
        .insert_person(person(11, "Bruno Lima", "012.345.678-90", 4))
        .unwrap();
    store
        .insert_organization(organization(20, "Acme Ltda", "12.345.678/0001-95"))
        .unwrap();
    store
        .insert_user(User {
            id: 7,
            name: Some("Carla".to_string()),
            email: Some("carla@example.com".to_string()),
            is_admin: Some(false),
            active_flag: Some(true),
            last_login: None,
            created: at(1),
            modified: None,
            timezone_name: Some("America/Sao_Paulo".to_string()),
        })
        .unwrap();
    store
        .insert_pipeline(Pipeline {
            id: 1,
            name: "Base Nova 2024".to_string(),
            is_deleted: Some(false),
        })
        .unwrap();
    store
        .insert_pipeline(Pipeline {
            id: 2,
            name: "Comercial".to_string(),
            is_deleted: Some(false),
        })
        .unwrap();
    for (id, order_nr, deleted) in [(1, 2, false), (2, 1, false), (3, 0, true)] {
        store
            .insert_stage(
                Stage {
                    id,
                    name: format!("Stage {}", id),
                    pipeline_id: 1,
                    order_nr,
                },
                deleted,
            )
            .unwrap();
    }
    store
        .insert_deal(deal(100, "Renegociação 123.456.789-01", 1, 5))
        .unwrap();
    store.insert_deal(deal(101, "Upgrade Acme", 2, 6)).unwrap();
    store.insert_deal(deal(102, "Contrato novo", 1, 7)).unwrap();
    store
}

fn app_with(store: InMemoryStore, prefix: &str) -> Router {
    let state = AppState::new(Arc::new(store), TOKEN, PaginationConfig::default());
    build_router(state, prefix)
}

fn app() -> Router {
    app_with(seeded_store(), "/api")
}

async fn send(app: &Router, uri: &str, token: Option<&str>) -> (StatusCode, HeaderMap, Value) {
    let mut request = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, HeaderMap, Value) {
    send(app, uri, Some(TOKEN)).await
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).unwrap().to_str().unwrap()
}

fn ids(body: &Value) -> Vec<i64> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|v| v["id"].as_i64().unwrap())
        .collect()
}

// ── Auth & health ──────────────────────────────────────────────

#[tokio::test]
async fn health_needs_no_token() {
    let (status, _, body) = send(&app(), "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "ok": true }));
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let (status, _, body) = send(&app(), "/api/v1/pipelines", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");
    assert_eq!(body["error"]["message"], "Missing bearer token");
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let (status, _, body) = send(&app(), "/api/v1/pipelines", Some("nope")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Invalid token");
}

#[tokio::test]
async fn empty_prefix_serves_at_root() {
    let app = app_with(seeded_store(), "");
    let (status, _, _) = send(&app, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = get(&app, "/v1/pipelines").await;
    assert_eq!(status, StatusCode::OK);
}

// ── Document lookups ───────────────────────────────────────────

#[tokio::test]
async fn person_by_doc_sets_normalized_header() {
    let (status, headers, body) = get(&app(), "/api/v1/persons/by-doc?doc=123.456.789-01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 10);
    assert_eq!(header_str(&headers, "x-normalized-doc"), "12345678901");
    assert_eq!(header_str(&headers, "cache-control"), "public, max-age=20");
}

#[tokio::test]
async fn person_by_doc_finds_stripped_leading_zero() {
    let (status, headers, body) = get(&app(), "/api/v1/persons/by-doc?doc=1234567890").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 11);
    assert_eq!(
        header_str(&headers, "x-normalized-doc"),
        "01234567890,1234567890"
    );
}

#[tokio::test]
async fn person_by_doc_not_found() {
    let (status, _, body) = get(&app(), "/api/v1/persons/by-doc?doc=999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn person_by_doc_ignores_cnpj_length_documents() {
    let store = seeded_store();
    store
        .insert_person(person(12, "Davi Rocha", "456.780.001-90", 5))
        .unwrap();
    let app = app_with(store, "/api");

    let (status, _, body) = get(&app, "/api/v1/persons/by-doc?doc=12.345.678%2F0001-90").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _, body) = get(&app, "/api/v1/persons/by-doc?doc=45678000190").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 12);
}

#[tokio::test]
async fn person_by_doc_tries_raw_digits() {
    let store = seeded_store();
    store.insert_person(person(13, "Eva Dias", "0123", 5)).unwrap();
    let app = app_with(store, "/api");

    let (status, _, body) = get(&app, "/api/v1/persons/by-doc?doc=0123").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 13);
}

#[tokio::test]
async fn person_by_doc_requires_doc() {
    let (status, _, body) = get(&app(), "/api/v1/persons/by-doc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn organization_by_doc_matches_cnpj() {
    let (status, headers, body) =
        get(&app(), "/api/v1/organizations/by-doc?doc=12345678000195").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 20);
    assert_eq!(header_str(&headers, "x-normalized-doc"), "12345678000195");
}

#[tokio::test]
async fn missing_table_answers_501() {
    let store = seeded_store();
    store.drop_table(Table::Organizations).unwrap();
    let app = app_with(store, "/api");

    let (status, _, body) = get(&app, "/api/v1/organizations/by-doc?doc=12345678000195").await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["error"]["code"], "not_implemented");
    assert_eq!(body["error"]["message"], "organizacoes not available");

    let (status, _, _) = get(&app, "/api/v1/organizations/20").await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
}

// ── Entity resolution ──────────────────────────────────────────

#[tokio::test]
async fn entities_by_doc_prefers_person_for_short_documents() {
    let (status, headers, body) = get(&app(), "/api/v1/entities/by-doc?doc=1234567890").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["match"], "person");
    assert_eq!(body["person"]["id"], 11);
    assert!(body["organization"].is_null());
    assert_eq!(
        body["normalized"]["pf"],
        serde_json::json!(["01234567890", "1234567890"])
    );
    assert_eq!(
        header_str(&headers, "x-variants-pf"),
        "01234567890,1234567890"
    );
    assert_eq!(
        header_str(&headers, "x-variants-pj"),
        "00001234567890,1234567890"
    );
    assert_eq!(header_str(&headers, "cache-control"), "public, max-age=20");
}

#[tokio::test]
async fn entities_by_doc_prefers_organization_for_cnpj() {
    let (status, _, body) =
        get(&app(), "/api/v1/entities/by-doc?doc=12.345.678%2F0001-95").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["match"], "organization");
    assert_eq!(body["organization"]["id"], 20);
}

#[tokio::test]
async fn entities_by_doc_empty_document() {
    let (status, headers, body) = get(&app(), "/api/v1/entities/by-doc?doc=abc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["match"], "none");
    assert_eq!(body["normalized"]["pf"], serde_json::json!([]));
    assert_eq!(header_str(&headers, "x-variants-pf"), "-");
    assert_eq!(header_str(&headers, "x-variants-pj"), "-");
}

#[tokio::test]
async fn entities_by_doc_degrades_without_organizations() {
    let store = seeded_store();
    store.drop_table(Table::Organizations).unwrap();
    let app = app_with(store, "/api");

    let (status, _, body) = get(&app, "/api/v1/entities/by-doc?doc=12345678000195&hint=PJ").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["match"], "none");
    assert!(body["organization"].is_null());
}

#[tokio::test]
async fn entities_by_doc_rejects_unknown_hint() {
    let (status, _, body) = get(&app(), "/api/v1/entities/by-doc?doc=1&hint=pf").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

// ── Listings ───────────────────────────────────────────────────

#[tokio::test]
async fn persons_listing_searches_name_and_cpf() {
    let app = app();
    let (_, headers, body) = get(&app, "/api/v1/persons?q=souza").await;
    assert_eq!(ids(&body), vec![10]);
    assert_eq!(header_str(&headers, "cache-control"), "public, max-age=20");

    let (_, _, body) = get(&app, "/api/v1/persons?q=012.3").await;
    assert_eq!(ids(&body), vec![11]);

    let (_, _, body) = get(&app, "/api/v1/persons?limit=1").await;
    assert_eq!(ids(&body), vec![11]);
}

#[tokio::test]
async fn record_by_id_and_not_found() {
    let app = app();
    let (status, headers, body) = get(&app, "/api/v1/persons/10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cpf_text"], "123.456.789-01");
    assert_eq!(header_str(&headers, "cache-control"), "public, max-age=60");

    let (status, _, _) = get(&app, "/api/v1/deals/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = get(&app, "/api/v1/users/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn users_listing_and_search() {
    let app = app();
    let (status, _, body) = get(&app, "/api/v1/users").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![7]);

    let (_, _, body) = get(&app, "/api/v1/users/search?q=EXAMPLE.com").await;
    assert_eq!(ids(&body), vec![7]);

    let (status, _, body) = get(&app, "/api/v1/users/search?q=").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));
}

#[tokio::test]
async fn users_active_only_accepts_common_flags() {
    let store = seeded_store();
    store
        .insert_user(User {
            id: 8,
            name: Some("Diego".to_string()),
            email: Some("diego@example.com".to_string()),
            is_admin: Some(false),
            active_flag: Some(false),
            last_login: None,
            created: at(2),
            modified: None,
            timezone_name: None,
        })
        .unwrap();
    let app = app_with(store, "/api");

    for flag in ["0", "no", "off", "false"] {
        let (status, _, body) = get(&app, &format!("/api/v1/users?active_only={flag}")).await;
        assert_eq!(status, StatusCode::OK, "{flag}");
        assert_eq!(ids(&body), vec![7, 8], "{flag}");
    }
    for flag in ["1", "yes", "on", "TRUE"] {
        let (_, _, body) = get(&app, &format!("/api/v1/users?active_only={flag}")).await;
        assert_eq!(ids(&body), vec![7], "{flag}");
    }

    let (status, _, body) = get(&app, "/api/v1/users?active_only=maybe").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn pipelines_and_stages() {
    let app = app();
    let (_, headers, body) = get(&app, "/api/v1/pipelines").await;
    assert_eq!(ids(&body), vec![1, 2]);
    assert_eq!(header_str(&headers, "cache-control"), "public, max-age=120");

    let (_, _, body) = get(&app, "/api/v1/pipelines/base-nova").await;
    assert_eq!(ids(&body), vec![1]);

    let (_, _, body) = get(&app, "/api/v1/stages?pipeline_id=1").await;
    assert_eq!(ids(&body), vec![2, 1]);

    let (status, _, _) = get(&app, "/api/v1/stages").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Deals ──────────────────────────────────────────────────────

#[tokio::test]
async fn base_nova_deals_filter_by_title_digits() {
    let app = app();
    let (_, headers, body) = get(&app, "/api/v1/deals/base-nova").await;
    assert_eq!(ids(&body), vec![102, 100]);
    assert_eq!(header_str(&headers, "cache-control"), "public, max-age=10");

    let (_, _, body) = get(&app, "/api/v1/deals/base-nova?doc=123.456.789-01").await;
    assert_eq!(ids(&body), vec![100]);
}

#[tokio::test]
async fn deals_by_entity_requires_an_id() {
    let app = app();
    let (status, _, body) = get(&app, "/api/v1/deals/by-entity").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "person_id or org_id is required");

    let (status, _, body) = get(&app, "/api/v1/deals/by-entity?person_id=10&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![102, 101]);
}

#[tokio::test]
async fn deal_search_short_circuits_on_empty_query() {
    let store = seeded_store();
    store.drop_table(Table::Deals).unwrap();
    let app = app_with(store, "/api");

    let (status, _, body) = get(&app, "/api/v1/search/deals?q=").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));

    let (status, _, _) = get(&app, "/api/v1/search/deals?q=acme").await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn deal_search_by_text_or_digits() {
    let app = app();
    let (_, _, body) = get(&app, "/api/v1/search/deals?q=acme").await;
    assert_eq!(ids(&body), vec![101]);

    let (_, _, body) = get(&app, "/api/v1/search/deals?q=789-01").await;
    assert_eq!(ids(&body), vec![100]);
}

#[tokio::test]
async fn advanced_deal_search() {
    let app = app();
    let (status, headers, body) = get(
        &app,
        "/api/v1/search/deals/advanced?pipeline_id=1&order_by=value%20asc",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![100, 102]);
    assert_eq!(header_str(&headers, "cache-control"), "public, max-age=15");

    let (_, _, body) = get(&app, "/api/v1/search/deals/advanced?status=won").await;
    assert_eq!(ids(&body), vec![102, 100]);

    let (_, _, body) = get(
        &app,
        "/api/v1/search/deals/advanced?updated_from=2024-03-06&order_by=bogus",
    )
    .await;
    assert_eq!(ids(&body), vec![102, 101]);

    let (status, _, _) = get(&app, "/api/v1/search/deals/advanced?status=archived").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = get(&app, "/api/v1/search/deals/advanced?added_to=03/2024").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
