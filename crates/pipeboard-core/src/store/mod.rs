//! Storage abstraction for the read API.
//!
//! The [`CrmStore`] trait lists every read the HTTP layer performs, so the
//! same handlers run against PostgreSQL in production and against
//! [`memory::InMemoryStore`] in tests.
//!
//! Several tables are optional: a deployment may lack organizations or
//! users entirely. Callers ask [`CrmStore::table_available`] first and
//! degrade instead of failing.

pub mod memory;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Deal, Organization, Person, Pipeline, Stage, User};
use crate::query::{DealSearch, Page};
use crate::resolve::RecordLookup;

/// Relations the read API depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Persons,
    Organizations,
    Users,
    Pipelines,
    Stages,
    Deals,
    /// Pre-filtered view of deals in "base nova" pipelines.
    DealsBaseNovaView,
}

impl Table {
    pub fn relation_name(self) -> &'static str {
        match self {
            Table::Persons => "pessoas",
            Table::Organizations => "organizacoes",
            Table::Users => "usuarios",
            Table::Pipelines => "pipelines",
            Table::Stages => "etapas_funil",
            Table::Deals => "negocios",
            Table::DealsBaseNovaView => "v_deals_base_nova",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.relation_name())
    }
}

/// Read operations over the CRM schema.
///
/// Document lookups take a digits-only key and match it exactly against
/// the digits of the stored document, newest record first.
#[async_trait]
pub trait CrmStore: Send + Sync {
    /// Round-trips to the backend.
    async fn ping(&self) -> Result<bool>;

    async fn table_available(&self, table: Table) -> Result<bool>;

    async fn person_by_document(&self, key: &str) -> Result<Option<Person>>;

    async fn person_by_id(&self, id: i64) -> Result<Option<Person>>;

    /// Persons by name substring or CPF digits, newest first.
    async fn list_persons(&self, q: Option<&str>, page: Page) -> Result<Vec<Person>>;

    async fn organization_by_document(&self, key: &str) -> Result<Option<Organization>>;

    async fn organization_by_id(&self, id: i64) -> Result<Option<Organization>>;

    /// Users ordered by name.
    async fn list_users(&self, active_only: bool, page: Page) -> Result<Vec<User>>;

    /// Users by name or email substring.
    async fn search_users(&self, q: &str, page: Page) -> Result<Vec<User>>;

    async fn user_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>>;

    async fn base_nova_pipelines(&self) -> Result<Vec<Pipeline>>;

    async fn pipeline_by_id(&self, id: i64) -> Result<Option<Pipeline>>;

    /// Non-deleted stages of a pipeline in funnel order.
    async fn stages_by_pipeline(&self, pipeline_id: i64) -> Result<Vec<Stage>>;

    async fn deal_by_id(&self, id: i64) -> Result<Option<Deal>>;

    /// Deals in "base nova" pipelines, optionally narrowed to titles
    /// containing `doc_digits`.
    async fn base_nova_deals(&self, doc_digits: Option<&str>, page: Page) -> Result<Vec<Deal>>;

    /// Deals linked to the person or the organization.
    async fn deals_by_entity(
        &self,
        person_id: Option<i64>,
        org_id: Option<i64>,
        page: Page,
    ) -> Result<Vec<Deal>>;

    /// Deals by title text or title digits.
    async fn search_deals(&self, q: &str, page: Page) -> Result<Vec<Deal>>;

    async fn search_deals_advanced(&self, search: &DealSearch, page: Page) -> Result<Vec<Deal>>;
}

/// [`RecordLookup`] over a store's person documents.
pub struct PersonsByDocument<'a, S: ?Sized>(pub &'a S);

/// [`RecordLookup`] over a store's organization documents.
pub struct OrganizationsByDocument<'a, S: ?Sized>(pub &'a S);

#[async_trait]
impl<S: CrmStore + ?Sized> RecordLookup for PersonsByDocument<'_, S> {
    type Record = Person;

    async fn lookup_by_key(&self, key: &str) -> Result<Option<Person>> {
        self.0.person_by_document(key).await
    }
}

#[async_trait]
impl<S: CrmStore + ?Sized> RecordLookup for OrganizationsByDocument<'_, S> {
    type Record = Organization;

    async fn lookup_by_key(&self, key: &str) -> Result<Option<Organization>> {
        self.0.organization_by_document(key).await
    }
}
