use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::streams;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable, PartialEq)]
#[diesel(table_name = streams)]
pub struct StreamEntity {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub quality: String,
    pub proxy: Option<String>,
    pub is_live: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
