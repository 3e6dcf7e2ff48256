//! CRM records served by the read API.
//!
//! Field names match the source columns so the JSON shape mirrors the
//! database rows one-to-one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Individual, looked up by CPF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: Option<String>,
    pub owner_id: Option<i64>,
    pub update_time: Option<DateTime<Utc>>,
    pub cpf_text: Option<String>,
}

/// Organization, looked up by CNPJ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: Option<String>,
    pub owner_id: Option<i64>,
    pub update_time: Option<DateTime<Utc>>,
    pub cnpj_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_admin: Option<bool>,
    pub active_flag: Option<bool>,
    pub last_login: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub timezone_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: i64,
    pub title: String,
    pub status: Option<String>,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub pipeline_id: Option<i64>,
    pub stage_id: Option<i64>,
    pub person_id: Option<i64>,
    pub org_id: Option<i64>,
    pub update_time: Option<DateTime<Utc>>,
    pub add_time: Option<DateTime<Utc>>,
    /// Owner of the deal.
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub name: String,
    pub is_deleted: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: i64,
    pub name: String,
    pub pipeline_id: i64,
    pub order_nr: i64,
}

/// Name prefixes (lowercased) that mark a "base nova" pipeline.
pub const BASE_NOVA_PREFIXES: [&str; 3] = ["base nova", "base-nova", "basenova"];

impl Pipeline {
    pub fn is_base_nova(&self) -> bool {
        let name = self.name.to_lowercase();
        BASE_NOVA_PREFIXES.iter().any(|p| name.starts_with(p))
    }
}
