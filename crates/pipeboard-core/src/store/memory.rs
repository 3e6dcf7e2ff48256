//! In-memory [`CrmStore`] implementation for tests.
//!
//! Uses plain `Vec`s behind a `std::sync::RwLock`. Filters mirror the SQL
//! semantics of the PostgreSQL store closely enough for handler tests:
//! case-insensitive substring matching, digits-only document comparison,
//! and `NULLS LAST` ordering on timestamps.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::document::normalize_digits;
use crate::models::{Deal, Organization, Person, Pipeline, Stage, User};
use crate::query::{DealSearch, Page, SortDirection};

use super::{CrmStore, Table};

#[derive(Default)]
struct Tables {
    persons: Vec<Person>,
    organizations: Vec<Organization>,
    users: Vec<User>,
    pipelines: Vec<Pipeline>,
    /// Stages with their soft-delete flag.
    stages: Vec<(Stage, bool)>,
    deals: Vec<Deal>,
    missing: HashSet<Table>,
}

/// In-memory store for testing.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    /// Marks a relation as absent from the schema.
    pub fn drop_table(&self, table: Table) -> Result<()> {
        self.write()?.missing.insert(table);
        Ok(())
    }

    pub fn insert_person(&self, person: Person) -> Result<()> {
        self.write()?.persons.push(person);
        Ok(())
    }

    pub fn insert_organization(&self, organization: Organization) -> Result<()> {
        self.write()?.organizations.push(organization);
        Ok(())
    }

    pub fn insert_user(&self, user: User) -> Result<()> {
        self.write()?.users.push(user);
        Ok(())
    }

    pub fn insert_pipeline(&self, pipeline: Pipeline) -> Result<()> {
        self.write()?.pipelines.push(pipeline);
        Ok(())
    }

    pub fn insert_stage(&self, stage: Stage, deleted: bool) -> Result<()> {
        self.write()?.stages.push((stage, deleted));
        Ok(())
    }

    pub fn insert_deal(&self, deal: Deal) -> Result<()> {
        self.write()?.deals.push(deal);
        Ok(())
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

/// Mirrors `name ILIKE %q% OR only_digits(doc) LIKE %digits(q)%`.
fn text_or_digits(text: Option<&str>, doc: Option<&str>, q: &str) -> bool {
    if contains_ci(text, q) {
        return true;
    }
    let digits = normalize_digits(q);
    !digits.is_empty() && normalize_digits(doc.unwrap_or("")).contains(&digits)
}

fn same_document(stored: Option<&str>, key: &str) -> bool {
    !key.is_empty() && normalize_digits(stored.unwrap_or("")) == key
}

/// Descending with nulls last, like `ORDER BY ts DESC NULLS LAST`.
fn newest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Ascending with nulls last, like PostgreSQL's default ascending order.
fn nulls_last<T: PartialOrd>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn paginate<T: Clone>(items: Vec<T>, page: Page) -> Vec<T> {
    items.into_iter().skip(page.skip()).take(page.take()).collect()
}

fn sort_deals_default(deals: &mut [Deal]) {
    deals.sort_by(|a, b| newest_first(a.update_time, b.update_time).then(b.id.cmp(&a.id)));
}

fn after(ts: Option<DateTime<Utc>>, bound: Option<NaiveDateTime>) -> bool {
    match bound {
        None => true,
        Some(bound) => ts.map(|t| t.naive_utc() >= bound).unwrap_or(false),
    }
}

fn before(ts: Option<DateTime<Utc>>, bound: Option<NaiveDateTime>) -> bool {
    match bound {
        None => true,
        Some(bound) => ts.map(|t| t.naive_utc() <= bound).unwrap_or(false),
    }
}

fn eq_filter(value: Option<i64>, wanted: Option<i64>) -> bool {
    wanted.map(|w| value == Some(w)).unwrap_or(true)
}

fn deal_matches(deal: &Deal, search: &DealSearch) -> bool {
    eq_filter(deal.pipeline_id, search.pipeline_id)
        && eq_filter(deal.stage_id, search.stage_id)
        && search
            .status
            .map(|s| deal.status.as_deref() == Some(s.as_str()))
            .unwrap_or(true)
        && eq_filter(deal.user_id, search.owner_id)
        && eq_filter(deal.person_id, search.person_id)
        && eq_filter(deal.org_id, search.org_id)
        && after(deal.update_time, search.updated_from)
        && before(deal.update_time, search.updated_to)
        && after(deal.add_time, search.added_from)
        && before(deal.add_time, search.added_to)
        && search
            .doc_digits()
            .map(|d| normalize_digits(&deal.title).contains(&d))
            .unwrap_or(true)
        && search
            .title_text()
            .map(|q| contains_ci(Some(&deal.title), q))
            .unwrap_or(true)
}

fn sort_deals_by(deals: &mut [Deal], search: &DealSearch) {
    let Some(spec) = search.sort() else {
        sort_deals_default(deals);
        return;
    };
    let descending = spec.direction == Some(SortDirection::Desc);
    deals.sort_by(|a, b| {
        let ord = match spec.column {
            "update_time" => nulls_last(a.update_time, b.update_time),
            "add_time" => nulls_last(a.add_time, b.add_time),
            "value" => nulls_last(a.value, b.value),
            _ => a.id.cmp(&b.id),
        };
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
}

#[async_trait]
impl CrmStore for InMemoryStore {
    async fn ping(&self) -> Result<bool> {
        self.read()?;
        Ok(true)
    }

    async fn table_available(&self, table: Table) -> Result<bool> {
        Ok(!self.read()?.missing.contains(&table))
    }

    async fn person_by_document(&self, key: &str) -> Result<Option<Person>> {
        let key = normalize_digits(key);
        let tables = self.read()?;
        let mut hits: Vec<&Person> = tables
            .persons
            .iter()
            .filter(|p| same_document(p.cpf_text.as_deref(), &key))
            .collect();
        hits.sort_by(|a, b| newest_first(a.update_time, b.update_time));
        Ok(hits.first().map(|p| (*p).clone()))
    }

    async fn person_by_id(&self, id: i64) -> Result<Option<Person>> {
        Ok(self.read()?.persons.iter().find(|p| p.id == id).cloned())
    }

    async fn list_persons(&self, q: Option<&str>, page: Page) -> Result<Vec<Person>> {
        let tables = self.read()?;
        let mut persons: Vec<Person> = tables
            .persons
            .iter()
            .filter(|p| match q {
                Some(q) if !q.is_empty() => {
                    text_or_digits(p.name.as_deref(), p.cpf_text.as_deref(), q)
                }
                _ => true,
            })
            .cloned()
            .collect();
        persons.sort_by(|a, b| newest_first(a.update_time, b.update_time).then(b.id.cmp(&a.id)));
        Ok(paginate(persons, page))
    }

    async fn organization_by_document(&self, key: &str) -> Result<Option<Organization>> {
        let key = normalize_digits(key);
        let tables = self.read()?;
        let mut hits: Vec<&Organization> = tables
            .organizations
            .iter()
            .filter(|o| same_document(o.cnpj_text.as_deref(), &key))
            .collect();
        hits.sort_by(|a, b| newest_first(a.update_time, b.update_time));
        Ok(hits.first().map(|o| (*o).clone()))
    }

    async fn organization_by_id(&self, id: i64) -> Result<Option<Organization>> {
        Ok(self
            .read()?
            .organizations
            .iter()
            .find(|o| o.id == id)
            .cloned())
    }

    async fn list_users(&self, active_only: bool, page: Page) -> Result<Vec<User>> {
        let tables = self.read()?;
        let mut users: Vec<User> = tables
            .users
            .iter()
            .filter(|u| !active_only || u.active_flag == Some(true))
            .cloned()
            .collect();
        users.sort_by(|a, b| nulls_last(a.name.as_ref(), b.name.as_ref()));
        Ok(paginate(users, page))
    }

    async fn search_users(&self, q: &str, page: Page) -> Result<Vec<User>> {
        let tables = self.read()?;
        let mut users: Vec<User> = tables
            .users
            .iter()
            .filter(|u| contains_ci(u.name.as_deref(), q) || contains_ci(u.email.as_deref(), q))
            .cloned()
            .collect();
        users.sort_by(|a, b| nulls_last(a.name.as_ref(), b.name.as_ref()));
        Ok(paginate(users, page))
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        Ok(self.read()?.users.iter().find(|u| u.id == id).cloned())
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let mut pipelines = self.read()?.pipelines.clone();
        pipelines.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pipelines)
    }

    async fn base_nova_pipelines(&self) -> Result<Vec<Pipeline>> {
        let mut pipelines: Vec<Pipeline> = self
            .read()?
            .pipelines
            .iter()
            .filter(|p| p.is_base_nova())
            .cloned()
            .collect();
        pipelines.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pipelines)
    }

    async fn pipeline_by_id(&self, id: i64) -> Result<Option<Pipeline>> {
        Ok(self.read()?.pipelines.iter().find(|p| p.id == id).cloned())
    }

    async fn stages_by_pipeline(&self, pipeline_id: i64) -> Result<Vec<Stage>> {
        let mut stages: Vec<Stage> = self
            .read()?
            .stages
            .iter()
            .filter(|(s, deleted)| s.pipeline_id == pipeline_id && !deleted)
            .map(|(s, _)| s.clone())
            .collect();
        stages.sort_by_key(|s| s.order_nr);
        Ok(stages)
    }

    async fn deal_by_id(&self, id: i64) -> Result<Option<Deal>> {
        Ok(self.read()?.deals.iter().find(|d| d.id == id).cloned())
    }

    async fn base_nova_deals(&self, doc_digits: Option<&str>, page: Page) -> Result<Vec<Deal>> {
        let tables = self.read()?;
        let base_nova: HashSet<i64> = tables
            .pipelines
            .iter()
            .filter(|p| p.is_base_nova())
            .map(|p| p.id)
            .collect();
        let mut deals: Vec<Deal> = tables
            .deals
            .iter()
            .filter(|d| d.pipeline_id.map(|id| base_nova.contains(&id)).unwrap_or(false))
            .filter(|d| {
                doc_digits
                    .map(|digits| normalize_digits(&d.title).contains(digits))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        sort_deals_default(&mut deals);
        Ok(paginate(deals, page))
    }

    async fn deals_by_entity(
        &self,
        person_id: Option<i64>,
        org_id: Option<i64>,
        page: Page,
    ) -> Result<Vec<Deal>> {
        if person_id.is_none() && org_id.is_none() {
            return Ok(Vec::new());
        }
        let tables = self.read()?;
        let mut deals: Vec<Deal> = tables
            .deals
            .iter()
            .filter(|d| {
                (person_id.is_some() && d.person_id == person_id)
                    || (org_id.is_some() && d.org_id == org_id)
            })
            .cloned()
            .collect();
        sort_deals_default(&mut deals);
        Ok(paginate(deals, page))
    }

    async fn search_deals(&self, q: &str, page: Page) -> Result<Vec<Deal>> {
        let tables = self.read()?;
        let mut deals: Vec<Deal> = tables
            .deals
            .iter()
            .filter(|d| text_or_digits(Some(&d.title), Some(&d.title), q))
            .cloned()
            .collect();
        sort_deals_default(&mut deals);
        Ok(paginate(deals, page))
    }

    async fn search_deals_advanced(&self, search: &DealSearch, page: Page) -> Result<Vec<Deal>> {
        let tables = self.read()?;
        let mut deals: Vec<Deal> = tables
            .deals
            .iter()
            .filter(|d| deal_matches(d, search))
            .cloned()
            .collect();
        sort_deals_by(&mut deals, search);
        Ok(paginate(deals, page))
    }
}
