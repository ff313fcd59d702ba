use anyhow::Result;
use async_trait::async_trait;
use bangumi_sync_config::BangumiConfig;
use reqwest::Client;
use std::time::Duration;
use tracing::trace;
use crate::bangumi::api::collections_url;
use crate::error::TransportError;
use crate::traits::{PageQuery, PageTransport, TransportResponse};

/// Connection settings for the Bangumi API
#[derive(Debug, Clone)]
pub struct BangumiSettings {
    pub base_url: String,
    pub username: String,
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl From<&BangumiConfig> for BangumiSettings {
    fn from(config: &BangumiConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            username: config.username.clone(),
            user_agent: config.user_agent.clone(),
            request_timeout: config.request_timeout(),
        }
    }
}

/// HTTP transport for the collections endpoint. Makes exactly one request per call.
pub struct BangumiClient {
    client: Client,
    url: String,
    access_token: Option<String>,
}

impl BangumiClient {
    pub fn new(settings: &BangumiSettings, access_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            client,
            url: collections_url(&settings.base_url, &settings.username),
            access_token,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        // connect, reset, truncated body and similar wire-level failures
        TransportError::Connection(e.to_string())
    }
}

#[async_trait]
impl PageTransport for BangumiClient {
    async fn get_collections(&self, query: &PageQuery) -> Result<TransportResponse, TransportError> {
        let params = [
            ("subject_type", query.scope.subject_type.code().to_string()),
            ("type", query.scope.collection_type.code().to_string()),
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
        ];

        let mut request = self
            .client
            .get(&self.url)
            .query(&params)
            .header("Accept", "application/json");
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        trace!(url = %self.url, scope = %query.scope, offset = query.offset, limit = query.limit, "GET collections");
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(TransportResponse { status, body })
    }
}
