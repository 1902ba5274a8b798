use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::models::{ProductInsert, QueryResponse, SalesforceProduct, SaveResult};
use super::query::{build_modified_products_soql, build_products_by_name_soql, PRODUCT_FIELDS};
use crate::http::{parse_env_or, send_with_retry, ClientError};
use prodsync_common::error::{ProdsyncError, ProdsyncResult};
use prodsync_pipeline::{ExtractionWindow, ProductRecord, SourceSystem};

/// Composite sObject deletes accept at most this many ids per call.
const DELETE_CHUNK: usize = 200;

#[derive(Debug, Clone)]
pub struct SalesforceClientConfig {
    pub instance_url: String,
    pub access_token: String,
    pub api_version: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl SalesforceClientConfig {
    /// Load Salesforce config from environment.
    ///
    /// Returns `Ok(None)` if the instance URL or access token is missing.
    /// Returns `Err` if a numeric setting does not parse.
    pub fn from_env() -> Result<Option<Self>, String> {
        let instance_url = match std::env::var("SALESFORCE_INSTANCE_URL").ok() {
            Some(v) => v.trim_end_matches('/').to_string(),
            None => return Ok(None),
        };
        let access_token = match std::env::var("SALESFORCE_ACCESS_TOKEN").ok() {
            Some(v) => v,
            None => return Ok(None),
        };

        let api_version =
            std::env::var("SALESFORCE_API_VERSION").unwrap_or_else(|_| "v58.0".to_string());
        let max_retries = parse_env_or("SALESFORCE_MAX_RETRIES", 3)?;
        let timeout_secs = parse_env_or("SALESFORCE_TIMEOUT_SECS", 30)?;

        Ok(Some(Self {
            instance_url,
            access_token,
            api_version,
            max_retries,
            timeout_secs,
        }))
    }
}

#[derive(Clone)]
pub struct SalesforceClient {
    client: Client,
    config: SalesforceClientConfig,
}

impl SalesforceClient {
    pub fn new(config: SalesforceClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn data_url(&self, path: &str) -> String {
        format!(
            "{}/services/data/{}/{}",
            self.config.instance_url, self.config.api_version, path
        )
    }

    /// Run a SOQL query, following `nextRecordsUrl` until the result is done.
    pub async fn query_all(&self, soql: &str) -> Result<Vec<SalesforceProduct>, ClientError> {
        let first_url = self.data_url("query");
        let response = send_with_retry(self.config.max_retries, || {
            self.client
                .get(&first_url)
                .bearer_auth(&self.config.access_token)
                .query(&[("q", soql)])
        })
        .await?;
        let mut page: QueryResponse<SalesforceProduct> = response.json().await?;
        let total_size = page.total_size;
        let mut records = std::mem::take(&mut page.records);

        while !page.done {
            let Some(next) = page.next_records_url.take() else {
                return Err(ClientError::Unexpected(
                    "query not done but no nextRecordsUrl".to_string(),
                ));
            };
            let url = format!("{}{}", self.config.instance_url, next);
            let response = send_with_retry(self.config.max_retries, || {
                self.client.get(&url).bearer_auth(&self.config.access_token)
            })
            .await?;
            page = response.json().await?;
            records.append(&mut page.records);
        }

        if records.len() as u64 != total_size {
            tracing::warn!(
                total_size,
                received = records.len(),
                "salesforce query returned a different number of records than reported"
            );
        }
        tracing::debug!(count = records.len(), "salesforce query finished");
        Ok(records)
    }

    pub async fn insert_product(&self, product: &ProductRecord) -> Result<String, ClientError> {
        let url = self.data_url("sobjects/Product2");
        let body = ProductInsert::from(product);
        let response = send_with_retry(self.config.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.config.access_token)
                .json(&body)
        })
        .await?;

        let result: SaveResult = response.json().await?;
        match (result.success, result.id.clone()) {
            (true, Some(id)) => Ok(id),
            _ => Err(ClientError::Unexpected(format!(
                "insert of '{}' failed: {}",
                product.name,
                result.error_summary()
            ))),
        }
    }

    pub async fn get_product(&self, id: &str) -> Result<SalesforceProduct, ClientError> {
        let url = self.data_url(&format!("sobjects/Product2/{id}"));
        let fields = PRODUCT_FIELDS.replace(' ', "");
        let response = send_with_retry(self.config.max_retries, || {
            self.client
                .get(&url)
                .bearer_auth(&self.config.access_token)
                .query(&[("fields", fields.as_str())])
        })
        .await?;
        Ok(response.json().await?)
    }

    /// Delete by id with the composite API. Per-record failures are logged, not raised.
    pub async fn delete_ids(&self, ids: &[String]) -> Result<usize, ClientError> {
        let url = self.data_url("composite/sobjects");
        let mut deleted = 0;

        for chunk in ids.chunks(DELETE_CHUNK) {
            let joined = chunk.join(",");
            let response = send_with_retry(self.config.max_retries, || {
                self.client
                    .delete(&url)
                    .bearer_auth(&self.config.access_token)
                    .query(&[("ids", joined.as_str()), ("allOrNone", "false")])
            })
            .await?;

            let results: Vec<SaveResult> = response.json().await?;
            for result in &results {
                if result.success {
                    deleted += 1;
                } else {
                    tracing::warn!(
                        id = ?result.id,
                        errors = %result.error_summary(),
                        "salesforce refused to delete product"
                    );
                }
            }
        }

        Ok(deleted)
    }
}

fn source_error(e: ClientError) -> ProdsyncError {
    ProdsyncError::Source(format!("salesforce: {e}"))
}

#[async_trait]
impl SourceSystem for SalesforceClient {
    fn system_name(&self) -> &str {
        "salesforce"
    }

    async fn create_products(
        &self,
        products: Vec<ProductRecord>,
    ) -> ProdsyncResult<Vec<ProductRecord>> {
        let mut created = Vec::with_capacity(products.len());
        for product in &products {
            let id = self.insert_product(product).await.map_err(source_error)?;
            // read back to pick up server-assigned fields like LastModifiedDate
            let stored = self.get_product(&id).await.map_err(source_error)?;
            tracing::info!(id = %id, name = %product.name, "inserted salesforce product");
            created.push(ProductRecord::from(stored));
        }
        Ok(created)
    }

    async fn query_modified(&self, window: &ExtractionWindow) -> ProdsyncResult<Vec<ProductRecord>> {
        let soql = build_modified_products_soql(window);
        tracing::info!(soql = %soql, "querying modified salesforce products");
        let products = self.query_all(&soql).await.map_err(source_error)?;
        Ok(products.into_iter().map(ProductRecord::from).collect())
    }

    async fn find_by_name(&self, name: &str) -> ProdsyncResult<Vec<ProductRecord>> {
        let soql = build_products_by_name_soql(name);
        let products = self.query_all(&soql).await.map_err(source_error)?;
        Ok(products.into_iter().map(ProductRecord::from).collect())
    }

    async fn delete_products(&self, ids: &[String]) -> ProdsyncResult<usize> {
        self.delete_ids(ids).await.map_err(source_error)
    }
}
