//! # Pipeboard Core
//!
//! Shared logic for Pipeboard: tax-document normalization, PF/PJ entity
//! resolution, SQL predicate construction, CRM models, and the store trait.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. The server
//! crate supplies a PostgreSQL-backed [`store::CrmStore`]; tests use
//! [`store::memory::InMemoryStore`].
//!
//! ```text
//!  raw document ──▶ document::build_both_variants ──▶ { pf: [...], pj: [...] }
//!                                                          │
//!                             resolve::resolve_entity ◀────┘
//!                               │  probe_first(pf) / probe_first(pj)
//!                               ▼
//!                          decide_match ──▶ Resolution { match, normalized, person, organization }
//! ```

pub mod document;
pub mod models;
pub mod query;
pub mod resolve;
pub mod store;
