//! Parameterized SQL construction for listings and deal search.
//!
//! Everything user-controlled travels as a bound parameter; only
//! allow-listed column names and fixed expressions are spliced into the
//! statement text. Placeholders are PostgreSQL positional (`$1`, `$2`, ...).

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveDateTime};

use crate::document::normalize_digits;

// ============ Pagination ============

/// Default and ceiling for a listing's `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl PageLimits {
    pub const LISTING: PageLimits = PageLimits {
        default_limit: 100,
        max_limit: 500,
    };
    pub const DEALS: PageLimits = PageLimits {
        default_limit: 200,
        max_limit: 500,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    /// Missing or non-positive limits take the default; larger ones are
    /// capped at the maximum. Missing or negative offsets become 0.
    pub fn clamp(limit: Option<i64>, offset: Option<i64>, limits: PageLimits) -> Self {
        let limit = match limit {
            Some(l) if l > 0 => l.min(limits.max_limit),
            _ => limits.default_limit,
        };
        let offset = match offset {
            Some(o) if o >= 0 => o,
            _ => 0,
        };
        Page { limit, offset }
    }

    pub fn skip(&self) -> usize {
        self.offset as usize
    }

    pub fn take(&self) -> usize {
        self.limit as usize
    }
}

// ============ Ordering ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A validated `ORDER BY` request: an allow-listed column plus an optional
/// direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec<'a> {
    pub column: &'a str,
    pub direction: Option<SortDirection>,
}

impl<'a> SortSpec<'a> {
    /// Parses requests like `"value desc"` or `" ID "`.
    ///
    /// Returns `None` for anything outside the allow-list or with an
    /// unrecognized direction.
    pub fn parse(order_by: Option<&str>, allowed: &[&'a str]) -> Option<SortSpec<'a>> {
        let raw = order_by?.trim().to_lowercase();
        let mut parts = raw.split_whitespace();
        let requested = parts.next()?;
        let rest: Vec<&str> = parts.collect();

        let direction = match rest.join(" ").as_str() {
            "" => None,
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => return None,
        };
        let column = allowed.iter().copied().find(|c| *c == requested)?;
        Some(SortSpec { column, direction })
    }

    pub fn to_sql(&self) -> String {
        match self.direction {
            None => self.column.to_string(),
            Some(SortDirection::Asc) => format!("{} asc", self.column),
            Some(SortDirection::Desc) => format!("{} desc", self.column),
        }
    }
}

/// `ORDER BY` expression for a request, falling back to `default_expr`
/// whenever the request is absent or not acceptable.
pub fn order_clause(order_by: Option<&str>, allowed: &[&str], default_expr: &str) -> String {
    SortSpec::parse(order_by, allowed)
        .map(|spec| spec.to_sql())
        .unwrap_or_else(|| default_expr.to_string())
}

pub const DEAL_SORT_COLUMNS: [&str; 4] = ["update_time", "add_time", "id", "value"];
pub const DEAL_DEFAULT_ORDER: &str = "update_time DESC NULLS LAST, id DESC";

/// Deal projection shared by every deal query.
pub const DEAL_COLUMNS: &str = "id::int8 AS id, coalesce(title, '') AS title, status, value::float8 AS value, currency, \
     pipeline_id::int8 AS pipeline_id, stage_id::int8 AS stage_id, \
     person_id::int8 AS person_id, org_id::int8 AS org_id, \
     update_time::timestamptz AS update_time, add_time::timestamptz AS add_time, \
     user_id::int8 AS user_id";

// ============ Parameters and predicates ============

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

/// Conditions plus the parameters their placeholders refer to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    conditions: Vec<String>,
    params: Vec<SqlValue>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a parameter and returns its placeholder.
    pub fn bind(&mut self, value: impl Into<SqlValue>) -> String {
        self.params.push(value.into());
        format!("${}", self.params.len())
    }

    pub fn push(&mut self, condition: impl Into<String>) {
        self.conditions.push(condition.into());
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    /// Conditions joined with `AND`; `TRUE` when there are none.
    pub fn all(&self) -> String {
        if self.conditions.is_empty() {
            "TRUE".to_string()
        } else {
            self.conditions.join(" AND ")
        }
    }

    /// Conditions joined with `OR`; `FALSE` when there are none.
    pub fn any(&self) -> String {
        if self.conditions.is_empty() {
            "FALSE".to_string()
        } else {
            self.conditions.join(" OR ")
        }
    }

    pub fn into_params(self) -> Vec<SqlValue> {
        self.params
    }
}

/// `%text%` with LIKE wildcards escaped, so `text` matches literally.
pub fn like_contains(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('%');
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Pushes a free-text condition: `text_expr ILIKE %q%`, widened with
/// `digits_expr LIKE %digits(q)%` when `q` carries any digits.
pub fn push_text_or_digits(predicate: &mut Predicate, q: &str, text_expr: &str, digits_expr: &str) {
    let needle = predicate.bind(like_contains(q));
    let digits = normalize_digits(q);
    if digits.is_empty() {
        predicate.push(format!("{} ILIKE {}", text_expr, needle));
    } else {
        let digits_needle = predicate.bind(like_contains(&digits));
        predicate.push(format!(
            "({} ILIKE {} OR {} LIKE {})",
            text_expr, needle, digits_expr, digits_needle
        ));
    }
}

/// A complete statement and its parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

// ============ Deals ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealStatus {
    Open,
    Won,
    Lost,
}

impl DealStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DealStatus::Open => "open",
            DealStatus::Won => "won",
            DealStatus::Lost => "lost",
        }
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DealStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(DealStatus::Open),
            "won" => Ok(DealStatus::Won),
            "lost" => Ok(DealStatus::Lost),
            other => bail!("invalid status '{}': expected open, won or lost", other),
        }
    }
}

/// Parses a date-range bound: `YYYY-MM-DD` (midnight) or
/// `YYYY-MM-DDTHH:MM:SS`.
pub fn parse_timestamp_bound(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(ts);
        }
    }
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => Ok(date.and_time(chrono::NaiveTime::MIN)),
        Err(_) => bail!(
            "invalid date '{}': expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS",
            raw
        ),
    }
}

/// Filters accepted by the advanced deal search. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DealSearch {
    pub pipeline_id: Option<i64>,
    pub stage_id: Option<i64>,
    pub status: Option<DealStatus>,
    pub owner_id: Option<i64>,
    pub person_id: Option<i64>,
    pub org_id: Option<i64>,
    pub updated_from: Option<NaiveDateTime>,
    pub updated_to: Option<NaiveDateTime>,
    pub added_from: Option<NaiveDateTime>,
    pub added_to: Option<NaiveDateTime>,
    pub doc_like: Option<String>,
    pub q: Option<String>,
    pub order_by: Option<String>,
}

impl DealSearch {
    /// Digits to look for in deal titles, if `doc_like` has any.
    pub fn doc_digits(&self) -> Option<String> {
        self.doc_like
            .as_deref()
            .map(normalize_digits)
            .filter(|d| !d.is_empty())
    }

    /// Free-text title filter, if non-empty.
    pub fn title_text(&self) -> Option<&str> {
        self.q.as_deref().filter(|q| !q.is_empty())
    }

    pub fn sort(&self) -> Option<SortSpec<'static>> {
        SortSpec::parse(self.order_by.as_deref(), &DEAL_SORT_COLUMNS)
    }

    pub fn predicate(&self) -> Predicate {
        let mut p = Predicate::new();

        let equalities = [
            ("pipeline_id", self.pipeline_id),
            ("stage_id", self.stage_id),
        ];
        for (column, value) in equalities {
            if let Some(v) = value {
                let ph = p.bind(v);
                p.push(format!("{} = {}", column, ph));
            }
        }
        if let Some(status) = self.status {
            let ph = p.bind(status.as_str());
            p.push(format!("status = {}", ph));
        }
        let owners = [
            ("user_id", self.owner_id),
            ("person_id", self.person_id),
            ("org_id", self.org_id),
        ];
        for (column, value) in owners {
            if let Some(v) = value {
                let ph = p.bind(v);
                p.push(format!("{} = {}", column, ph));
            }
        }

        let bounds = [
            ("update_time", ">=", self.updated_from),
            ("update_time", "<=", self.updated_to),
            ("add_time", ">=", self.added_from),
            ("add_time", "<=", self.added_to),
        ];
        for (column, op, value) in bounds {
            if let Some(ts) = value {
                let ph = p.bind(ts);
                p.push(format!("{} {} {}", column, op, ph));
            }
        }

        if let Some(digits) = self.doc_digits() {
            let ph = p.bind(like_contains(&digits));
            p.push(format!("only_digits(coalesce(title,'')) LIKE {}", ph));
        }
        if let Some(q) = self.title_text() {
            let ph = p.bind(like_contains(q));
            p.push(format!("title ILIKE {}", ph));
        }
        p
    }
}

/// Statement for the advanced deal search.
pub fn deal_search_query(search: &DealSearch, page: Page) -> BuiltQuery {
    let mut predicate = search.predicate();
    let where_sql = predicate.all();
    let order_sql = order_clause(
        search.order_by.as_deref(),
        &DEAL_SORT_COLUMNS,
        DEAL_DEFAULT_ORDER,
    );
    let limit = predicate.bind(page.limit);
    let offset = predicate.bind(page.offset);

    BuiltQuery {
        sql: format!(
            "SELECT {} FROM negocios WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
            DEAL_COLUMNS, where_sql, order_sql, limit, offset
        ),
        params: predicate.into_params(),
    }
}

/// Statement for deals linked to a person or an organization (either
/// matches). `None` when neither id is given.
pub fn deals_by_entity_query(
    person_id: Option<i64>,
    org_id: Option<i64>,
    page: Page,
) -> Option<BuiltQuery> {
    let mut predicate = Predicate::new();
    if let Some(id) = person_id {
        let ph = predicate.bind(id);
        predicate.push(format!("person_id = {}", ph));
    }
    if let Some(id) = org_id {
        let ph = predicate.bind(id);
        predicate.push(format!("org_id = {}", ph));
    }
    if predicate.is_empty() {
        return None;
    }

    let where_sql = predicate.any();
    let limit = predicate.bind(page.limit);
    let offset = predicate.bind(page.offset);
    Some(BuiltQuery {
        sql: format!(
            "SELECT {} FROM negocios WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
            DEAL_COLUMNS, where_sql, DEAL_DEFAULT_ORDER, limit, offset
        ),
        params: predicate.into_params(),
    })
}
