use async_trait::async_trait;

use crate::record::{MaterialRecord, ProductRecord};
use crate::watermark::ExtractionWindow;
use prodsync_common::error::ProdsyncResult;

/// The system products are read from (Salesforce).
#[async_trait]
pub trait SourceSystem: Send + Sync {
    fn system_name(&self) -> &str;

    /// Insert products, returning them with `id` and `last_modified` filled in.
    async fn create_products(&self, products: Vec<ProductRecord>)
        -> ProdsyncResult<Vec<ProductRecord>>;

    /// Products whose last modification falls inside `window`, oldest first.
    async fn query_modified(&self, window: &ExtractionWindow) -> ProdsyncResult<Vec<ProductRecord>>;

    async fn find_by_name(&self, name: &str) -> ProdsyncResult<Vec<ProductRecord>>;

    /// Delete products by id. Returns how many were deleted.
    async fn delete_products(&self, ids: &[String]) -> ProdsyncResult<usize>;
}

/// The system materials are written to (SAP).
#[async_trait]
pub trait TargetSystem: Send + Sync {
    fn system_name(&self) -> &str;

    /// Create the material, or update the existing one with the same name.
    /// Returns the material number.
    async fn upsert_material(&self, material: &MaterialRecord) -> ProdsyncResult<String>;

    async fn find_by_name(&self, name: &str) -> ProdsyncResult<Vec<MaterialRecord>>;

    /// Delete every material with this name. Returns how many were deleted.
    async fn delete_by_name(&self, name: &str) -> ProdsyncResult<usize>;
}
