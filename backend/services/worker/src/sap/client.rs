use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use tokio::sync::Mutex;

use super::models::{odata_literal, ODataEnvelope, ODataResults, SapMaterial};
use crate::http::{parse_env_or, send_with_retry, ClientError};
use prodsync_common::error::{ProdsyncError, ProdsyncResult};
use prodsync_pipeline::{MaterialRecord, TargetSystem};

const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Debug, Clone)]
pub struct SapClientConfig {
    /// OData service root, e.g. `https://sap.example.com/sap/opu/odata/sap/ZMATERIAL_SRV`.
    pub base_url: String,
    pub user: String,
    pub password: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl SapClientConfig {
    /// Load SAP config from environment.
    ///
    /// Returns `Ok(None)` if the base URL or credentials are missing.
    pub fn from_env() -> Result<Option<Self>, String> {
        let base_url = match std::env::var("SAP_BASE_URL").ok() {
            Some(v) => v.trim_end_matches('/').to_string(),
            None => return Ok(None),
        };
        let user = match std::env::var("SAP_USER").ok() {
            Some(v) => v,
            None => return Ok(None),
        };
        let password = match std::env::var("SAP_PASSWORD").ok() {
            Some(v) => v,
            None => return Ok(None),
        };

        Ok(Some(Self {
            base_url,
            user,
            password,
            max_retries: parse_env_or("SAP_MAX_RETRIES", 3)?,
            timeout_secs: parse_env_or("SAP_TIMEOUT_SECS", 30)?,
        }))
    }
}

pub struct SapClient {
    client: Client,
    config: SapClientConfig,
    csrf_token: Mutex<Option<String>>,
}

impl SapClient {
    pub fn new(config: SapClientConfig) -> Result<Self, reqwest::Error> {
        // the CSRF token is bound to the session cookie
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .build()?;
        Ok(Self {
            client,
            config,
            csrf_token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.config.user, Some(&self.config.password))
            .header("accept", "application/json")
    }

    async fn fetch_csrf_token(&self) -> Result<String, ClientError> {
        let url = self.url("");
        let response = send_with_retry(self.config.max_retries, || {
            self.authed(self.client.get(&url)).header(CSRF_HEADER, "Fetch")
        })
        .await?;

        let token = response
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ClientError::Unexpected("no CSRF token in response".to_string()))?;
        tracing::debug!("fetched sap csrf token");
        Ok(token)
    }

    async fn csrf_token(&self) -> Result<String, ClientError> {
        let mut cached = self.csrf_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.fetch_csrf_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Send a modifying request with a CSRF token, refreshing the token once on 403.
    async fn send_modifying<F>(&self, build: F) -> Result<reqwest::Response, ClientError>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.csrf_token().await?;
        match send_with_retry(self.config.max_retries, || {
            self.authed(build(&token)).header(CSRF_HEADER, token.as_str())
        })
        .await
        {
            Err(e) if e.status() == Some(StatusCode::FORBIDDEN) => {
                tracing::warn!("sap rejected csrf token, refetching");
                let fresh = self.fetch_csrf_token().await?;
                *self.csrf_token.lock().await = Some(fresh.clone());
                send_with_retry(self.config.max_retries, || {
                    self.authed(build(&fresh)).header(CSRF_HEADER, fresh.as_str())
                })
                .await
            }
            other => other,
        }
    }

    pub async fn list_by_name(&self, name: &str) -> Result<Vec<SapMaterial>, ClientError> {
        let url = self.url("MaterialSet");
        let filter = format!("Name eq {}", odata_literal(name));
        let response = send_with_retry(self.config.max_retries, || {
            self.authed(self.client.get(&url))
                .query(&[("$filter", filter.as_str()), ("$format", "json")])
        })
        .await?;
        let body: ODataEnvelope<ODataResults<SapMaterial>> = response.json().await?;
        Ok(body.d.results)
    }

    pub async fn create(&self, material: &SapMaterial) -> Result<SapMaterial, ClientError> {
        let url = self.url("MaterialSet");
        let response = self
            .send_modifying(|_| self.client.post(&url).json(material))
            .await?;
        let body: ODataEnvelope<SapMaterial> = response.json().await?;
        Ok(body.d)
    }

    pub async fn update(&self, number: &str, material: &SapMaterial) -> Result<(), ClientError> {
        let url = self.url(&format!("MaterialSet({})", odata_literal(number)));
        self.send_modifying(|_| self.client.put(&url).json(material))
            .await?;
        Ok(())
    }

    pub async fn delete(&self, number: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("MaterialSet({})", odata_literal(number)));
        self.send_modifying(|_| self.client.delete(&url)).await?;
        Ok(())
    }
}

fn target_error(e: ClientError) -> ProdsyncError {
    ProdsyncError::Target(format!("sap: {e}"))
}

#[async_trait]
impl TargetSystem for SapClient {
    fn system_name(&self) -> &str {
        "sap"
    }

    async fn upsert_material(&self, material: &MaterialRecord) -> ProdsyncResult<String> {
        let existing = self
            .list_by_name(&material.name)
            .await
            .map_err(target_error)?;

        let mut payload = SapMaterial::from(material);
        match existing.into_iter().find_map(|m| m.material_number) {
            Some(number) => {
                payload.material_number = Some(number.clone());
                self.update(&number, &payload).await.map_err(target_error)?;
                tracing::info!(material_number = %number, name = %material.name, "updated sap material");
                Ok(number)
            }
            None => {
                payload.material_number = None;
                let created = self.create(&payload).await.map_err(target_error)?;
                let number = created.material_number.ok_or_else(|| {
                    ProdsyncError::Target(format!(
                        "sap: created material '{}' without a number",
                        material.name
                    ))
                })?;
                tracing::info!(material_number = %number, name = %material.name, "created sap material");
                Ok(number)
            }
        }
    }

    async fn find_by_name(&self, name: &str) -> ProdsyncResult<Vec<MaterialRecord>> {
        let materials = self.list_by_name(name).await.map_err(target_error)?;
        Ok(materials.into_iter().map(MaterialRecord::from).collect())
    }

    async fn delete_by_name(&self, name: &str) -> ProdsyncResult<usize> {
        let materials = self.list_by_name(name).await.map_err(target_error)?;
        let mut deleted = 0;
        for number in materials.into_iter().filter_map(|m| m.material_number) {
            self.delete(&number).await.map_err(target_error)?;
            deleted += 1;
        }
        Ok(deleted)
    }
}
