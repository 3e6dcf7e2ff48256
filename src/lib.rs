//! # Pipeboard
//!
//! A read-only HTTP query layer over a CRM schema in PostgreSQL: tax-document
//! (CPF/CNPJ) lookup, PF/PJ entity resolution, and paginated listings of
//! deals, people, organizations, users, pipelines, and stages.
//!
//! The document and resolution logic lives in `pipeboard-core`; this crate
//! wires it to PostgreSQL and axum.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!  │  HTTP (axum) │──▶│ pipeboard-   │──▶│  PgStore     │──▶ PostgreSQL
//!  │  bearer auth │   │ core resolve │   │  (CrmStore)  │
//!  └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`db`] | PostgreSQL pool |
//! | [`bootstrap`] | SQL helper creation and health check |
//! | [`pg_store`] | PostgreSQL [`CrmStore`](pipeboard_core::store::CrmStore) |
//! | [`auth`] | Bearer token checks |
//! | [`server`] | HTTP routes and error contract |
//! | [`lookup`] | CLI document commands |

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod lookup;
pub mod pg_store;
pub mod server;
