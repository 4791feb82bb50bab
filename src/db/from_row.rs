//! Row mapping for the main database.

use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, Row, ToSql, types::Type};

use crate::error::Result;
use crate::models::*;
use crate::validity::ValidityBasis;

pub const COMPANY_COLS: &str =
    "id, name, email, contact_email, license_status, created_at, updated_at";

pub const COURSE_COLS: &str =
    "id, name, validity_kind, validity_years, grace_days, created_at";

pub const CREDENTIAL_COLS: &str = "id, person_id, course_id, completed_at, valid_from, valid_to, grace_days, validity_basis, created_at";

pub const LICENSE_COLS: &str = "id, company_id, status, start_date, end_date, grace_period_days, suspended_at, suspended_by, suspended_reason, created_at, updated_at";

pub const LICENSE_ACTIVITY_COLS: &str =
    "id, license_id, action, actor, reason, metadata, created_at";

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Parse a TEXT column into a strum-backed enum.
fn parse_enum<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_enum<T>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn parse_json(row: &Row, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

impl FromRow for Company {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Company {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            contact_email: row.get(3)?,
            license_status: parse_opt_enum(row, 4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

impl FromRow for Course {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind: Option<ValidityKind> = parse_opt_enum(row, 2)?;
        Ok(Course {
            id: row.get(0)?,
            name: row.get(1)?,
            validity: match kind {
                Some(kind) => Some(ValidityPolicy {
                    kind,
                    years: row.get(3)?,
                    grace_days: row.get(4)?,
                }),
                None => None,
            },
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for Credential {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Credential {
            id: row.get(0)?,
            person_id: row.get(1)?,
            course_id: row.get(2)?,
            completed_at: row.get(3)?,
            valid_from: row.get(4)?,
            valid_to: row.get(5)?,
            grace_days: row.get(6)?,
            validity_basis: parse_enum::<ValidityBasis>(row, 7)?,
            created_at: row.get(8)?,
        })
    }
}

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            company_id: row.get(1)?,
            status: parse_enum(row, 2)?,
            start_date: row.get(3)?,
            end_date: row.get(4)?,
            grace_period_days: row.get(5)?,
            suspended_at: row.get(6)?,
            suspended_by: row.get(7)?,
            suspended_reason: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl FromRow for LicenseActivity {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LicenseActivity {
            id: row.get(0)?,
            license_id: row.get(1)?,
            action: parse_enum(row, 2)?,
            actor: row.get(3)?,
            reason: row.get(4)?,
            metadata: parse_json(row, 5)?,
            created_at: row.get(6)?,
        })
    }
}

pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Option<T>> {
    let row = conn.query_row(sql, params, T::from_row).optional()?;
    Ok(row)
}

pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
