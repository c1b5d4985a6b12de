//! Authenticated HTTP client for the Messenger bot API
//!
//! Wraps reqwest::Client, fetching a currently-valid access token from the
//! TokenManager before every call.

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use crate::auth::TokenManager;

const BOT_API_BASE_PATH: &str = "/messenger/beta1";

pub struct MessengerClient {
    http: reqwest::Client,
    base_url: String,
    manager: Arc<TokenManager>,
    /// Whether token lookups may use the on-disk cache.
    persist: bool,
}

impl MessengerClient {
    pub fn new(api_url: &str, manager: Arc<TokenManager>, persist: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}{}", api_url.trim_end_matches('/'), BOT_API_BASE_PATH),
            manager,
            persist,
        }
    }

    async fn bearer_token(&self) -> Result<String> {
        let credential = self
            .manager
            .get_token(self.persist)
            .await
            .context("Authentication failed")?;
        Ok(credential.access_token)
    }

    /// GET request against the bot API (bearer auth).
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let token = self.bearer_token().await?;
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("Messenger GET {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .with_context(|| format!("Messenger GET {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST request against the bot API (bearer auth, optional JSON body).
    pub async fn post(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let token = self.bearer_token().await?;
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("Messenger POST {}", url);

        let mut request = self.http.post(&url).bearer_auth(&token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("Messenger POST {} failed", url))?;

        check_response(resp, &url).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Token may be invalid -- run 'messenger-cli login'.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}
