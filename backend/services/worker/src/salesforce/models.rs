use chrono::{DateTime, Utc};
use prodsync_pipeline::ProductRecord;
use serde::{Deserialize, Deserializer, Serialize};

/// A `Product2` row from the Salesforce REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SalesforceProduct {
    pub id: Option<String>,
    pub name: String,
    pub product_code: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, deserialize_with = "deserialize_sf_datetime")]
    pub last_modified_date: Option<DateTime<Utc>>,
}

impl From<SalesforceProduct> for ProductRecord {
    fn from(p: SalesforceProduct) -> Self {
        Self {
            id: p.id,
            name: p.name,
            product_code: p.product_code,
            description: p.description,
            is_active: p.is_active,
            last_modified: p.last_modified_date,
        }
    }
}

/// Body of an sObject insert. Read-only fields are left out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProductInsert {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
}

impl From<&ProductRecord> for ProductInsert {
    fn from(p: &ProductRecord) -> Self {
        Self {
            name: p.name.clone(),
            product_code: p.product_code.clone(),
            description: p.description.clone(),
            is_active: p.is_active,
        }
    }
}

/// A page of SOQL results (`/query`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse<T> {
    pub total_size: u64,
    pub done: bool,
    pub next_records_url: Option<String>,
    pub records: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveError {
    pub status_code: String,
    pub message: String,
}

/// Result of an sObject create or delete.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveResult {
    pub id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<SaveError>,
}

impl SaveResult {
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.status_code, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Salesforce renders datetimes as `2026-03-01T09:05:07.000+0000`, which is not RFC 3339.
fn deserialize_sf_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| {
        DateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f%z")
            .or_else(|_| DateTime::parse_from_rfc3339(&s))
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    })
    .transpose()
}
