use prodsync_pipeline::MaterialRecord;
use serde::{Deserialize, Serialize};

/// OData v2 wraps every payload in `{"d": ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ODataEnvelope<T> {
    pub d: T,
}

/// Collection payload: `{"d": {"results": [...]}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ODataResults<T> {
    pub results: Vec<T>,
}

/// An entry of the `MaterialSet` entity set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SapMaterial {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material_number: Option<String>,
    pub name: String,
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deletion_flag: bool,
    #[serde(default)]
    pub salesforce_id: Option<String>,
}

impl From<&MaterialRecord> for SapMaterial {
    fn from(m: &MaterialRecord) -> Self {
        Self {
            material_number: m.material_number.clone(),
            name: m.name.clone(),
            product_code: m.product_code.clone(),
            description: m.description.clone(),
            deletion_flag: m.deletion_flag,
            salesforce_id: m.source_id.clone(),
        }
    }
}

impl From<SapMaterial> for MaterialRecord {
    fn from(m: SapMaterial) -> Self {
        Self {
            material_number: m.material_number,
            name: m.name,
            product_code: m.product_code,
            description: m.description,
            deletion_flag: m.deletion_flag,
            source_id: m.salesforce_id,
        }
    }
}

/// Quote a value as an OData string literal (`'` doubles).
pub fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
