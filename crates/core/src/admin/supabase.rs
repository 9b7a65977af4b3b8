use crate::admin::{AdminApi, AuthUser, Bucket, BucketOutcome, BucketSpec};
use crate::config::Settings;
use crate::errors::{AdminApiError, ErrorClass};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SupabaseAdmin {
    http: reqwest::Client,
    base_url: String,
    service_role_key: String,
    retries: u32,
}

impl SupabaseAdmin {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_supabase_url()?.to_string();
        let service_role_key = settings.require_service_role_key()?.to_string();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .build()
            .context("failed to build supabase http client")?;

        Ok(Self {
            http,
            base_url,
            service_role_key,
            retries: settings.http_retries.max(1),
        })
    }

    fn url(&self, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(&self.service_role_key)?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.service_role_key))?,
        );
        Ok(headers)
    }

    /// Sends one request and returns the body of a 2xx response.
    async fn send_once(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<String> {
        let mut req = self
            .http
            .request(method, self.url(path))
            .headers(self.headers()?)
            .query(query);
        if let Some(body) = body {
            req = req.json(body);
        }

        let res = req
            .send()
            .await
            .with_context(|| format!("supabase {operation} request failed"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("failed to read supabase {operation} response"))?;

        if !status.is_success() {
            return Err(AdminApiError {
                operation,
                status,
                body: text,
            }
            .into());
        }
        Ok(text)
    }

    /// GETs are idempotent, so transport errors, 429 and 5xx are retried with backoff.
    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut attempt: u32 = 0;
        let text = loop {
            attempt += 1;
            match self.send_once(operation, Method::GET, path, query, None).await {
                Ok(text) => break text,
                Err(err) => {
                    if attempt >= self.retries || !is_retryable(&err) {
                        return Err(err);
                    }
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(operation, attempt, ?backoff, error = %err, "supabase request failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        };

        serde_json::from_str::<T>(&text)
            .with_context(|| format!("failed to parse supabase {operation} response: {text}"))
    }
}

/// Wait after failed attempt `attempt` (1-based). `retries` counts attempts, so the default
/// of 3 sleeps 1s then 2s.
fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(6))
}

fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(api) = err.downcast_ref::<AdminApiError>() {
        return api.status == StatusCode::TOO_MANY_REQUESTS || api.status.is_server_error();
    }
    err.chain().any(|cause| cause.downcast_ref::<reqwest::Error>().is_some())
}

#[derive(Debug, Deserialize)]
struct ListUsersResponse {
    users: Vec<AuthUser>,
}

#[async_trait::async_trait]
impl AdminApi for SupabaseAdmin {
    async fn list_users(&self, page: u32, per_page: u32) -> Result<Vec<AuthUser>> {
        anyhow::ensure!(page >= 1, "page must be >= 1");
        let res: ListUsersResponse = self
            .get_json(
                "list_users",
                "/auth/v1/admin/users",
                &[("page", page.to_string()), ("per_page", per_page.to_string())],
            )
            .await?;
        Ok(res.users)
    }

    async fn delete_user(&self, id: Uuid) -> Result<()> {
        self.send_once(
            "delete_user",
            Method::DELETE,
            &format!("/auth/v1/admin/users/{id}"),
            &[],
            None,
        )
        .await?;
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        self.get_json("list_buckets", "/storage/v1/bucket", &[]).await
    }

    async fn create_bucket(&self, spec: &BucketSpec) -> Result<BucketOutcome> {
        anyhow::ensure!(!spec.name.trim().is_empty(), "bucket name must be non-empty");
        let mut body = serde_json::to_value(spec).context("serialize bucket spec failed")?;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("id".to_string(), serde_json::Value::String(spec.name.clone()));
        }

        match self
            .send_once("create_bucket", Method::POST, "/storage/v1/bucket", &[], Some(&body))
            .await
        {
            Ok(_) => Ok(BucketOutcome::Created),
            Err(err) => match err.downcast_ref::<AdminApiError>() {
                Some(api) if api.class() == ErrorClass::AlreadyExists => {
                    Ok(BucketOutcome::AlreadyExists)
                }
                _ => Err(err),
            },
        }
    }

    async fn rpc(&self, function: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        anyhow::ensure!(
            !function.is_empty() && function.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
            "invalid rpc function name: {function:?}"
        );
        let text = self
            .send_once(
                "rpc",
                Method::POST,
                &format!("/rest/v1/rpc/{function}"),
                &[],
                Some(&args),
            )
            .await?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).with_context(|| format!("rpc {function} returned invalid JSON"))
    }
}
