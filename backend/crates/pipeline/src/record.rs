use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Salesforce `Product2` row as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Assigned by the source on insert.
    pub id: Option<String>,
    pub name: String,
    pub product_code: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ProductRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            product_code: None,
            description: None,
            is_active: true,
            last_modified: None,
        }
    }

    /// Key used to report per-record outcomes: the source id when known, the name otherwise.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

/// An SAP material master entry, matched to products by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRecord {
    /// Assigned by the target on create.
    pub material_number: Option<String>,
    pub name: String,
    pub product_code: Option<String>,
    pub description: Option<String>,
    pub deletion_flag: bool,
    pub source_id: Option<String>,
}

impl From<&ProductRecord> for MaterialRecord {
    fn from(product: &ProductRecord) -> Self {
        Self {
            material_number: None,
            name: product.name.clone(),
            product_code: product.product_code.clone(),
            description: product.description.clone(),
            deletion_flag: !product.is_active,
            source_id: product.id.clone(),
        }
    }
}
