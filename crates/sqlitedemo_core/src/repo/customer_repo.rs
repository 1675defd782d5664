//! Customer repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide parameterized CRUD primitives over the `customers` table.
//! - Report affected-row counts; deciding what a count means is the
//!   service's job.
//!
//! # Invariants
//! - Mutations only run on the caller's transaction handle.
//! - Reads run on the caller's transaction when one is given, otherwise on
//!   the shared connection, waiting at most its lock timeout.
//! - Rows are returned as stored; any row the schema accepted is readable.

use crate::db::transaction::Transaction;
use crate::db::{Database, DbError};
use crate::model::customer::{Customer, CustomerFilter, CustomerPatch};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const CUSTOMER_SELECT_SQL: &str = "SELECT
    customer_id,
    company_name,
    contact_name,
    contact_title,
    address,
    city,
    region,
    postal_code,
    country,
    phone,
    fax
FROM customers";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for customer persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// Driver/bootstrap failure.
    Db(DbError),
    /// Insert hit an existing primary key.
    Duplicate(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Duplicate(key) => write!(f, "customer already stored: {key}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Duplicate(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Storage primitives consumed by the customer service.
#[async_trait]
pub trait CustomerRepository: Send + Sync {
    /// Lists customers matching `filter`, ordered by key.
    async fn query(
        &self,
        filter: &CustomerFilter,
        tx: Option<&mut Transaction>,
    ) -> RepoResult<Vec<Customer>>;

    /// Inserts one customer; returns affected rows.
    async fn insert(&self, customer: &Customer, tx: &mut Transaction) -> RepoResult<usize>;

    /// Replaces every non-key column of `key`; returns affected rows.
    async fn update(
        &self,
        key: &str,
        patch: &CustomerPatch,
        tx: &mut Transaction,
    ) -> RepoResult<usize>;

    /// Deletes `key`; returns affected rows.
    async fn delete(&self, key: &str, tx: &mut Transaction) -> RepoResult<usize>;
}

/// SQLite-backed customer repository.
#[derive(Debug, Clone)]
pub struct SqliteCustomerRepository {
    db: Database,
}

impl SqliteCustomerRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CustomerRepository for SqliteCustomerRepository {
    async fn query(
        &self,
        filter: &CustomerFilter,
        tx: Option<&mut Transaction>,
    ) -> RepoResult<Vec<Customer>> {
        match tx {
            Some(tx) => query_customers(tx.connection(), filter),
            None => {
                let conn = self.db.lock().await?;
                query_customers(&conn, filter)
            }
        }
    }

    async fn insert(&self, customer: &Customer, tx: &mut Transaction) -> RepoResult<usize> {
        let inserted = tx.connection().execute(
            "INSERT INTO customers (
                customer_id,
                company_name,
                contact_name,
                contact_title,
                address,
                city,
                region,
                postal_code,
                country,
                phone,
                fax
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                customer.customer_id.as_str(),
                customer.company_name.as_str(),
                customer.contact_name.as_deref(),
                customer.contact_title.as_deref(),
                customer.address.as_deref(),
                customer.city.as_deref(),
                customer.region.as_deref(),
                customer.postal_code.as_deref(),
                customer.country.as_deref(),
                customer.phone.as_deref(),
                customer.fax.as_deref(),
            ],
        );

        match inserted {
            Ok(rows) => Ok(rows),
            Err(err) if is_primary_key_violation(&err) => {
                Err(RepoError::Duplicate(customer.customer_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update(
        &self,
        key: &str,
        patch: &CustomerPatch,
        tx: &mut Transaction,
    ) -> RepoResult<usize> {
        let changed = tx.connection().execute(
            "UPDATE customers
             SET
                company_name = ?1,
                contact_name = ?2,
                contact_title = ?3,
                address = ?4,
                city = ?5,
                region = ?6,
                postal_code = ?7,
                country = ?8,
                phone = ?9,
                fax = ?10
             WHERE customer_id = ?11;",
            params![
                patch.company_name.as_str(),
                patch.contact_name.as_deref(),
                patch.contact_title.as_deref(),
                patch.address.as_deref(),
                patch.city.as_deref(),
                patch.region.as_deref(),
                patch.postal_code.as_deref(),
                patch.country.as_deref(),
                patch.phone.as_deref(),
                patch.fax.as_deref(),
                key,
            ],
        )?;
        Ok(changed)
    }

    async fn delete(&self, key: &str, tx: &mut Transaction) -> RepoResult<usize> {
        let changed = tx
            .connection()
            .execute("DELETE FROM customers WHERE customer_id = ?1;", [key])?;
        Ok(changed)
    }
}

fn query_customers(conn: &Connection, filter: &CustomerFilter) -> RepoResult<Vec<Customer>> {
    let mut sql = format!("{CUSTOMER_SELECT_SQL} WHERE 1 = 1");
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(customer_id) = &filter.customer_id {
        sql.push_str(" AND customer_id = ?");
        bind_values.push(Value::Text(customer_id.clone()));
    }

    if let Some(company_name) = &filter.company_name {
        sql.push_str(" AND company_name LIKE ? ESCAPE '\\'");
        bind_values.push(Value::Text(format!("%{}%", escape_like(company_name))));
    }

    if let Some(region) = &filter.region {
        sql.push_str(" AND region = ?");
        bind_values.push(Value::Text(region.clone()));
    }

    if let Some(postal_code) = &filter.postal_code {
        sql.push_str(" AND postal_code = ?");
        bind_values.push(Value::Text(postal_code.clone()));
    }

    sql.push_str(" ORDER BY customer_id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut customers = Vec::new();

    while let Some(row) = rows.next()? {
        customers.push(parse_customer_row(row)?);
    }

    Ok(customers)
}

fn parse_customer_row(row: &Row<'_>) -> RepoResult<Customer> {
    Ok(Customer {
        customer_id: row.get("customer_id")?,
        company_name: row.get("company_name")?,
        contact_name: row.get("contact_name")?,
        contact_title: row.get("contact_title")?,
        address: row.get("address")?,
        city: row.get("city")?,
        region: row.get("region")?,
        postal_code: row.get("postal_code")?,
        country: row.get("country")?,
        phone: row.get("phone")?,
        fax: row.get("fax")?,
    })
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
