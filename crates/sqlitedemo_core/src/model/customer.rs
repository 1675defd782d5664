//! Customer domain model.
//!
//! # Responsibility
//! - Define the single keyed record managed by the customer service.
//! - Provide input validation used before any storage side effect.
//!
//! # Invariants
//! - `customer_id` is the only key; there are no composite keys.
//! - `customer_id` and `company_name` are mandatory and never empty; any
//!   other text is accepted as given.
//! - serde field names follow the `CustomerID`/`CompanyName` JSON shape.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Customer key, kept as an alias to make signatures read by intent.
pub type CustomerId = String;

/// Canonical customer record as stored and read back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Customer {
    #[serde(rename = "CustomerID")]
    pub customer_id: CustomerId,
    pub company_name: String,
    pub contact_name: Option<String>,
    pub contact_title: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub fax: Option<String>,
}

impl Customer {
    /// Creates a customer with only the mandatory fields set.
    pub fn new(customer_id: impl Into<String>, company_name: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            company_name: company_name.into(),
            ..Self::default()
        }
    }

    /// Validates key and mandatory fields before persistence.
    ///
    /// # Errors
    /// - `customer_id` is empty.
    /// - `company_name` is empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_customer_id(&self.customer_id)?;
        validate_company_name(&self.company_name)
    }
}

/// Update payload: every non-key column of [`Customer`].
///
/// Updates replace the whole record; a `None` optional clears the column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomerPatch {
    pub company_name: String,
    pub contact_name: Option<String>,
    pub contact_title: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub fax: Option<String>,
}

impl CustomerPatch {
    /// Creates a patch that sets `company_name` and clears optional columns.
    pub fn new(company_name: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            ..Self::default()
        }
    }

    /// Validates mandatory fields of the patch.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_company_name(&self.company_name)
    }

    /// Applies the patch on top of `key`, producing the full target record.
    pub fn apply_to(&self, key: &str) -> Customer {
        Customer {
            customer_id: key.to_string(),
            company_name: self.company_name.clone(),
            contact_name: self.contact_name.clone(),
            contact_title: self.contact_title.clone(),
            address: self.address.clone(),
            city: self.city.clone(),
            region: self.region.clone(),
            postal_code: self.postal_code.clone(),
            country: self.country.clone(),
            phone: self.phone.clone(),
            fax: self.fax.clone(),
        }
    }
}

impl From<&Customer> for CustomerPatch {
    fn from(value: &Customer) -> Self {
        Self {
            company_name: value.company_name.clone(),
            contact_name: value.contact_name.clone(),
            contact_title: value.contact_title.clone(),
            address: value.address.clone(),
            city: value.city.clone(),
            region: value.region.clone(),
            postal_code: value.postal_code.clone(),
            country: value.country.clone(),
            phone: value.phone.clone(),
            fax: value.fax.clone(),
        }
    }
}

/// Acknowledgement returned by a successful delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomerDeleted {
    #[serde(rename = "CustomerID")]
    pub customer_id: CustomerId,
    pub deleted: bool,
}

/// Read filters. Every field is optional; an empty filter matches all rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomerFilter {
    /// Exact key match.
    #[serde(rename = "CustomerID")]
    pub customer_id: Option<String>,
    /// Case-insensitive substring match.
    pub company_name: Option<String>,
    /// Exact match.
    pub region: Option<String>,
    /// Exact match.
    pub postal_code: Option<String>,
}

impl CustomerFilter {
    /// Filter matching exactly one key.
    pub fn by_id(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: Some(customer_id.into()),
            ..Self::default()
        }
    }
}

/// Input validation failure for customer payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.field, self.reason)
    }
}

impl Error for ValidationError {}

/// Validates a customer key. Keys are compared verbatim, so only the empty
/// key is refused.
pub fn validate_customer_id(customer_id: &str) -> Result<(), ValidationError> {
    if customer_id.is_empty() {
        return Err(ValidationError::new("CustomerID", "is null or empty."));
    }
    Ok(())
}

fn validate_company_name(company_name: &str) -> Result<(), ValidationError> {
    if company_name.is_empty() {
        return Err(ValidationError::new("CompanyName", "is null or empty."));
    }
    Ok(())
}
