//! Read access to applications and companies.
//!
//! Both are managed outside the engine; the `register_*` helpers exist so
//! operators and tests can seed the rows templates refer to.

use rusqlite::{Connection, OptionalExtension};
use runq_core::{AppId, CompanyId};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::time;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: AppId,
    pub name: String,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub slug: String,
}

fn row_to_application(row: &rusqlite::Row<'_>) -> rusqlite::Result<Application> {
    let raw: String = row.get(2)?;
    let uuid = Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Application {
        id: AppId(row.get(0)?),
        name: row.get(1)?,
        uuid,
    })
}

fn row_to_company(row: &rusqlite::Row<'_>) -> rusqlite::Result<Company> {
    Ok(Company {
        id: CompanyId(row.get(0)?),
        name: row.get(1)?,
        slug: row.get(2)?,
    })
}

pub(crate) fn load_application(conn: &Connection, id: AppId) -> Result<Option<Application>> {
    Ok(conn
        .query_row(
            "SELECT id, name, uuid FROM apps WHERE id = ?1",
            [id.get()],
            row_to_application,
        )
        .optional()?)
}

pub(crate) fn load_company(conn: &Connection, id: CompanyId) -> Result<Option<Company>> {
    Ok(conn
        .query_row(
            "SELECT id, name, slug FROM company WHERE id = ?1",
            [id.get()],
            row_to_company,
        )
        .optional()?)
}

pub fn register_application(ctx: &Context, name: &str, uuid: Option<Uuid>) -> Result<Application> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::Validation("application name is required".to_string()));
    }
    let uuid = uuid.unwrap_or_else(Uuid::new_v4);
    let conn = ctx.store().lock()?;
    conn.execute(
        "INSERT INTO apps (name, uuid, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![name, uuid.to_string(), time::to_db(ctx.now())],
    )?;
    let id = AppId(conn.last_insert_rowid());
    info!(app_id = %id, %name, %uuid, "application registered");
    Ok(Application {
        id,
        name: name.to_string(),
        uuid,
    })
}

pub fn register_company(ctx: &Context, name: &str, slug: &str) -> Result<Company> {
    let (name, slug) = (name.trim(), slug.trim());
    if name.is_empty() || slug.is_empty() {
        return Err(EngineError::Validation(
            "company name and slug are required".to_string(),
        ));
    }
    let conn = ctx.store().lock()?;
    conn.execute(
        "INSERT INTO company (name, slug, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![name, slug, time::to_db(ctx.now())],
    )?;
    let id = CompanyId(conn.last_insert_rowid());
    info!(company_id = %id, %slug, "company registered");
    Ok(Company {
        id,
        name: name.to_string(),
        slug: slug.to_string(),
    })
}

pub fn get_application(ctx: &Context, id: AppId) -> Result<Application> {
    let conn = ctx.store().lock()?;
    load_application(&conn, id)?.ok_or_else(|| EngineError::ApplicationNotFound(id.to_string()))
}

pub fn application_by_uuid(ctx: &Context, uuid: Uuid) -> Result<Application> {
    let conn = ctx.store().lock()?;
    conn.query_row(
        "SELECT id, name, uuid FROM apps WHERE uuid = ?1",
        [uuid.to_string()],
        row_to_application,
    )
    .optional()?
    .ok_or_else(|| EngineError::ApplicationNotFound(uuid.to_string()))
}

pub fn get_company(ctx: &Context, id: CompanyId) -> Result<Company> {
    let conn = ctx.store().lock()?;
    load_company(&conn, id)?.ok_or_else(|| EngineError::CompanyNotFound(id.to_string()))
}

/// Resolve a company given either its numeric id or its slug.
pub fn resolve_company(ctx: &Context, id_or_slug: &str) -> Result<Company> {
    let key = id_or_slug.trim();
    if let Ok(id) = key.parse::<i64>() {
        return get_company(ctx, CompanyId(id));
    }
    let conn = ctx.store().lock()?;
    conn.query_row(
        "SELECT id, name, slug FROM company WHERE slug = ?1",
        [key],
        row_to_company,
    )
    .optional()?
    .ok_or_else(|| EngineError::CompanyNotFound(key.to_string()))
}
