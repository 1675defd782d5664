//! Audit/error recorder used by the customer service.
//!
//! # Responsibility
//! - Define the fire-and-forget logger contract of the service layer.
//! - Render explicit input snapshots as deterministic log properties.
//!
//! # Invariants
//! - Recorder calls never fail and never panic.
//! - Snapshot properties have a fixed key set per input type.

use crate::logging::sanitize_message;
use crate::model::customer::{Customer, CustomerFilter, CustomerPatch};
use log::{error, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;

const MAX_PROPERTY_CHARS: usize = 512;

/// Named log properties; ordered so rendering is deterministic.
pub type LogProperties = BTreeMap<String, String>;

/// Logger contract consumed by the service layer.
///
/// Implementations must swallow their own failures.
pub trait LogRecorder: Send + Sync {
    /// Records an informational event with properties.
    fn write_with(&self, message: &str, properties: &LogProperties);

    /// Records an error with properties.
    fn write_error_with(&self, error: &(dyn Error + 'static), properties: &LogProperties);

    /// Records an informational event.
    fn write(&self, message: &str) {
        self.write_with(message, &LogProperties::new());
    }

    /// Records an error.
    fn write_error(&self, error: &(dyn Error + 'static)) {
        self.write_error_with(error, &LogProperties::new());
    }
}

/// Recorder writing through the `log` facade in `key=value` event format.
#[derive(Debug, Clone, Default)]
pub struct LogFacadeRecorder;

impl LogRecorder for LogFacadeRecorder {
    fn write_with(&self, message: &str, properties: &LogProperties) {
        info!(
            "event=audit module=service status=ok message=\"{}\"{}",
            sanitize_message(message, MAX_PROPERTY_CHARS),
            render_properties(properties)
        );
    }

    fn write_error_with(&self, error: &(dyn Error + 'static), properties: &LogProperties) {
        error!(
            "event=operation_failed module=service status=error error=\"{}\"{}",
            sanitize_message(&error.to_string(), MAX_PROPERTY_CHARS),
            render_properties(properties)
        );
    }
}

/// Recorder that drops everything; useful for tools that do not log.
#[derive(Debug, Clone, Default)]
pub struct NullRecorder;

impl LogRecorder for NullRecorder {
    fn write_with(&self, _message: &str, _properties: &LogProperties) {}

    fn write_error_with(&self, _error: &(dyn Error + 'static), _properties: &LogProperties) {}
}

fn render_properties(properties: &LogProperties) -> String {
    properties
        .iter()
        .map(|(key, value)| {
            format!(
                " {key}=\"{}\"",
                sanitize_message(value, MAX_PROPERTY_CHARS).replace('"', "'")
            )
        })
        .collect()
}

/// Explicit, per-type snapshot of an operation input for log properties.
pub trait LogSnapshot {
    /// Fixed set of named fields plus a `json` rendering of the whole input.
    fn snapshot(&self) -> LogProperties;
}

impl LogSnapshot for Customer {
    fn snapshot(&self) -> LogProperties {
        let mut properties = snapshot_fields([
            ("CustomerID", Some(self.customer_id.as_str())),
            ("CompanyName", Some(self.company_name.as_str())),
            ("ContactName", self.contact_name.as_deref()),
            ("ContactTitle", self.contact_title.as_deref()),
            ("Address", self.address.as_deref()),
            ("City", self.city.as_deref()),
            ("Region", self.region.as_deref()),
            ("PostalCode", self.postal_code.as_deref()),
            ("Country", self.country.as_deref()),
            ("Phone", self.phone.as_deref()),
            ("Fax", self.fax.as_deref()),
        ]);
        insert_json(&mut properties, self);
        properties
    }
}

impl LogSnapshot for CustomerPatch {
    fn snapshot(&self) -> LogProperties {
        let mut properties = snapshot_fields([
            ("CompanyName", Some(self.company_name.as_str())),
            ("ContactName", self.contact_name.as_deref()),
            ("ContactTitle", self.contact_title.as_deref()),
            ("Address", self.address.as_deref()),
            ("City", self.city.as_deref()),
            ("Region", self.region.as_deref()),
            ("PostalCode", self.postal_code.as_deref()),
            ("Country", self.country.as_deref()),
            ("Phone", self.phone.as_deref()),
            ("Fax", self.fax.as_deref()),
        ]);
        insert_json(&mut properties, self);
        properties
    }
}

impl LogSnapshot for CustomerFilter {
    fn snapshot(&self) -> LogProperties {
        let mut properties = snapshot_fields([
            ("CustomerID", self.customer_id.as_deref()),
            ("CompanyName", self.company_name.as_deref()),
            ("Region", self.region.as_deref()),
            ("PostalCode", self.postal_code.as_deref()),
        ]);
        insert_json(&mut properties, self);
        properties
    }
}

impl LogSnapshot for str {
    fn snapshot(&self) -> LogProperties {
        let mut properties = snapshot_fields([("CustomerID", Some(self))]);
        insert_json(&mut properties, self);
        properties
    }
}

fn snapshot_fields<const N: usize>(fields: [(&str, Option<&str>); N]) -> LogProperties {
    fields
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.unwrap_or_default().to_string()))
        .collect()
}

fn insert_json<T: Serialize + ?Sized>(properties: &mut LogProperties, value: &T) {
    // Serializing plain structs of strings cannot fail; keep the key anyway.
    let json = serde_json::to_string(value).unwrap_or_default();
    properties.insert("JSON".to_string(), json);
}

#[cfg(test)]
mod tests {
    use super::{render_properties, LogProperties, LogSnapshot};
    use crate::model::customer::{Customer, CustomerFilter};

    #[test]
    fn customer_snapshot_has_fixed_fields_and_json() {
        let mut customer = Customer::new("C1", "Acme");
        customer.city = Some("Taipei".to_string());

        let snapshot = customer.snapshot();
        assert_eq!(snapshot.len(), 12);
        assert_eq!(snapshot["CustomerID"], "C1");
        assert_eq!(snapshot["City"], "Taipei");
        assert_eq!(snapshot["Fax"], "");
        assert!(snapshot["JSON"].starts_with("{\"CustomerID\":\"C1\",\"CompanyName\":\"Acme\""));
    }

    #[test]
    fn snapshot_is_deterministic() {
        let filter = CustomerFilter {
            region: Some("SP".to_string()),
            ..CustomerFilter::default()
        };
        assert_eq!(filter.snapshot(), filter.snapshot());
        assert_eq!("C9".snapshot()["JSON"], "\"C9\"");
    }

    #[test]
    fn rendered_properties_are_single_line_and_sorted() {
        let mut properties = LogProperties::new();
        properties.insert("b".to_string(), "two\nlines".to_string());
        properties.insert("a".to_string(), "say \"hi\"".to_string());

        let rendered = render_properties(&properties);
        assert_eq!(rendered, " a=\"say 'hi'\" b=\"two lines\"");
    }
}
