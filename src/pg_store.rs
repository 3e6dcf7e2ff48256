//! PostgreSQL-backed [`CrmStore`] implementation.
//!
//! Every statement is read-only. Column lists cast numeric ids to `int8`
//! and timestamps to `timestamptz` so rows decode into the core models no
//! matter how the source schema declares them.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};

use pipeboard_core::models::{Deal, Organization, Person, Pipeline, Stage, User};
use pipeboard_core::query::{
    deal_search_query, deals_by_entity_query, like_contains, push_text_or_digits, BuiltQuery,
    DealSearch, Page, Predicate, SqlValue, DEAL_COLUMNS, DEAL_DEFAULT_ORDER,
};
use pipeboard_core::store::{CrmStore, Table};

const PERSON_COLUMNS: &str = "id::int8 AS id, name, owner_id::int8 AS owner_id, \
     update_time::timestamptz AS update_time, cpf_text::text AS cpf_text";

const ORGANIZATION_COLUMNS: &str = "id::int8 AS id, name, owner_id::int8 AS owner_id, \
     update_time::timestamptz AS update_time, cnpj_text::text AS cnpj_text";

const USER_COLUMNS: &str = "id::int8 AS id, name, email, is_admin, active_flag, \
     last_login::timestamptz AS last_login, created::timestamptz AS created, \
     modified::timestamptz AS modified, timezone_name";

const PIPELINE_COLUMNS: &str = "id::int8 AS id, coalesce(name, '') AS name, is_deleted";

const STAGE_COLUMNS: &str = "id::int8 AS id, coalesce(name, '') AS name, \
     pipeline_id::int8 AS pipeline_id, coalesce(order_nr, 0)::int8 AS order_nr";

const BASE_NOVA_FILTER: &str = "lower(name) LIKE 'base nova%' \
     OR lower(name) LIKE 'base-nova%' \
     OR lower(name) LIKE 'basenova%'";

const TABLE_EXISTS: &str = r#"
SELECT EXISTS (
    SELECT 1
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relname = $1
      AND c.relkind IN ('r', 'v', 'm', 'p')
      AND n.nspname = current_schema()
)
"#;

/// PostgreSQL implementation of the [`CrmStore`] trait.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_deals(&self, built: &BuiltQuery) -> Result<Vec<Deal>> {
        let rows = bind_all(sqlx::query(&built.sql), &built.params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(deal_from_row).collect()
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Timestamp(v) => query.bind(*v),
        };
    }
    query
}

fn person_from_row(row: &PgRow) -> Result<Person> {
    Ok(Person {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        owner_id: row.try_get("owner_id")?,
        update_time: row.try_get("update_time")?,
        cpf_text: row.try_get("cpf_text")?,
    })
}

fn organization_from_row(row: &PgRow) -> Result<Organization> {
    Ok(Organization {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        owner_id: row.try_get("owner_id")?,
        update_time: row.try_get("update_time")?,
        cnpj_text: row.try_get("cnpj_text")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        is_admin: row.try_get("is_admin")?,
        active_flag: row.try_get("active_flag")?,
        last_login: row.try_get("last_login")?,
        created: row.try_get("created")?,
        modified: row.try_get("modified")?,
        timezone_name: row.try_get("timezone_name")?,
    })
}

fn pipeline_from_row(row: &PgRow) -> Result<Pipeline> {
    Ok(Pipeline {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        is_deleted: row.try_get("is_deleted")?,
    })
}

fn stage_from_row(row: &PgRow) -> Result<Stage> {
    Ok(Stage {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        pipeline_id: row.try_get("pipeline_id")?,
        order_nr: row.try_get("order_nr")?,
    })
}

fn deal_from_row(row: &PgRow) -> Result<Deal> {
    Ok(Deal {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        status: row.try_get("status")?,
        value: row.try_get("value")?,
        currency: row.try_get("currency")?,
        pipeline_id: row.try_get("pipeline_id")?,
        stage_id: row.try_get("stage_id")?,
        person_id: row.try_get("person_id")?,
        org_id: row.try_get("org_id")?,
        update_time: row.try_get("update_time")?,
        add_time: row.try_get("add_time")?,
        user_id: row.try_get("user_id")?,
    })
}

#[async_trait]
impl CrmStore for PgStore {
    async fn ping(&self) -> Result<bool> {
        crate::bootstrap::health_check(&self.pool).await
    }

    async fn table_available(&self, table: Table) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(TABLE_EXISTS)
            .bind(table.relation_name())
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            tracing::debug!(table = %table, "relation not found in current schema");
        }
        Ok(exists)
    }

    async fn person_by_document(&self, key: &str) -> Result<Option<Person>> {
        if key.is_empty() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {} FROM pessoas WHERE only_digits(coalesce(cpf_text::text, '')) = $1 \
             ORDER BY update_time DESC NULLS LAST LIMIT 1",
            PERSON_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(person_from_row).transpose()
    }

    async fn person_by_id(&self, id: i64) -> Result<Option<Person>> {
        let sql = format!("SELECT {} FROM pessoas WHERE id = $1", PERSON_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(person_from_row).transpose()
    }

    async fn list_persons(&self, q: Option<&str>, page: Page) -> Result<Vec<Person>> {
        let mut predicate = Predicate::new();
        if let Some(q) = q.filter(|q| !q.is_empty()) {
            push_text_or_digits(
                &mut predicate,
                q,
                "name",
                "only_digits(coalesce(cpf_text::text, ''))",
            );
        }
        let where_sql = predicate.all();
        let limit = predicate.bind(page.limit);
        let offset = predicate.bind(page.offset);
        let sql = format!(
            "SELECT {} FROM pessoas WHERE {} \
             ORDER BY update_time DESC NULLS LAST, id DESC LIMIT {} OFFSET {}",
            PERSON_COLUMNS, where_sql, limit, offset
        );
        let params = predicate.into_params();
        let rows = bind_all(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(person_from_row).collect()
    }

    async fn organization_by_document(&self, key: &str) -> Result<Option<Organization>> {
        if key.is_empty() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {} FROM organizacoes WHERE only_digits(coalesce(cnpj_text::text, '')) = $1 \
             ORDER BY update_time DESC NULLS LAST LIMIT 1",
            ORGANIZATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn organization_by_id(&self, id: i64) -> Result<Option<Organization>> {
        let sql = format!(
            "SELECT {} FROM organizacoes WHERE id = $1",
            ORGANIZATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn list_users(&self, active_only: bool, page: Page) -> Result<Vec<User>> {
        let filter = if active_only {
            "active_flag IS TRUE"
        } else {
            "TRUE"
        };
        let sql = format!(
            "SELECT {} FROM usuarios WHERE {} ORDER BY name NULLS LAST LIMIT $1 OFFSET $2",
            USER_COLUMNS, filter
        );
        let rows = sqlx::query(&sql)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn search_users(&self, q: &str, page: Page) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {} FROM usuarios WHERE name ILIKE $1 OR email ILIKE $1 \
             ORDER BY name NULLS LAST LIMIT $2 OFFSET $3",
            USER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(like_contains(q))
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM usuarios WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let sql = format!("SELECT {} FROM pipelines ORDER BY name", PIPELINE_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(pipeline_from_row).collect()
    }

    async fn base_nova_pipelines(&self) -> Result<Vec<Pipeline>> {
        let sql = format!(
            "SELECT {} FROM pipelines WHERE {} ORDER BY name",
            PIPELINE_COLUMNS, BASE_NOVA_FILTER
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(pipeline_from_row).collect()
    }

    async fn pipeline_by_id(&self, id: i64) -> Result<Option<Pipeline>> {
        let sql = format!("SELECT {} FROM pipelines WHERE id = $1", PIPELINE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(pipeline_from_row).transpose()
    }

    async fn stages_by_pipeline(&self, pipeline_id: i64) -> Result<Vec<Stage>> {
        let sql = format!(
            "SELECT {} FROM etapas_funil WHERE pipeline_id = $1 AND (is_deleted IS NOT TRUE) \
             ORDER BY order_nr",
            STAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(pipeline_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(stage_from_row).collect()
    }

    async fn deal_by_id(&self, id: i64) -> Result<Option<Deal>> {
        let sql = format!("SELECT {} FROM negocios WHERE id = $1", DEAL_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(deal_from_row).transpose()
    }

    async fn base_nova_deals(&self, doc_digits: Option<&str>, page: Page) -> Result<Vec<Deal>> {
        // Without the view, filter on the pipeline ids directly.
        let source = if self.table_available(Table::DealsBaseNovaView).await? {
            "v_deals_base_nova".to_string()
        } else {
            format!(
                "(SELECT * FROM negocios WHERE pipeline_id IN \
                 (SELECT id FROM pipelines WHERE {})) AS base_nova",
                BASE_NOVA_FILTER
            )
        };

        let mut predicate = Predicate::new();
        if let Some(digits) = doc_digits.filter(|d| !d.is_empty()) {
            let ph = predicate.bind(like_contains(digits));
            predicate.push(format!("only_digits(coalesce(title, '')) LIKE {}", ph));
        }
        let where_sql = predicate.all();
        let limit = predicate.bind(page.limit);
        let offset = predicate.bind(page.offset);

        let built = BuiltQuery {
            sql: format!(
                "SELECT {} FROM {} WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
                DEAL_COLUMNS, source, where_sql, DEAL_DEFAULT_ORDER, limit, offset
            ),
            params: predicate.into_params(),
        };
        self.fetch_deals(&built).await
    }

    async fn deals_by_entity(
        &self,
        person_id: Option<i64>,
        org_id: Option<i64>,
        page: Page,
    ) -> Result<Vec<Deal>> {
        match deals_by_entity_query(person_id, org_id, page) {
            Some(built) => self.fetch_deals(&built).await,
            None => Ok(Vec::new()),
        }
    }

    async fn search_deals(&self, q: &str, page: Page) -> Result<Vec<Deal>> {
        let mut predicate = Predicate::new();
        push_text_or_digits(&mut predicate, q, "title", "only_digits(coalesce(title, ''))");
        let where_sql = predicate.all();
        let limit = predicate.bind(page.limit);
        let offset = predicate.bind(page.offset);

        let built = BuiltQuery {
            sql: format!(
                "SELECT {} FROM negocios WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
                DEAL_COLUMNS, where_sql, DEAL_DEFAULT_ORDER, limit, offset
            ),
            params: predicate.into_params(),
        };
        self.fetch_deals(&built).await
    }

    async fn search_deals_advanced(&self, search: &DealSearch, page: Page) -> Result<Vec<Deal>> {
        let built = deal_search_query(search, page);
        self.fetch_deals(&built).await
    }
}
