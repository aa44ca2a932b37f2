//! reqwest-backed [`DataService`] speaking the backend's POST interface.

use super::wire::{
    encode_bracket_request, encode_data_request, parse_bracket_response, parse_data_response,
};
use super::{Bracket, DataService};
use crate::config::ServiceConfig;
use crate::error::FetchError;
use crate::types::{DataPoint, Pwe, StreamId};
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;

pub struct HttpDataService {
    client: reqwest::Client,
    config: ServiceConfig,
}

impl std::fmt::Debug for HttpDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDataService")
            .field("base_url", &self.config.base_url)
            .field("authenticated", &self.config.token.is_some())
            .finish()
    }
}

impl HttpDataService {
    pub fn new(config: ServiceConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, body: String) -> Result<String, FetchError> {
        let resp = self.client.post(self.url(path)).body(body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }

        resp.text().await.map_err(FetchError::from)
    }
}

#[async_trait]
impl DataService for HttpDataService {
    async fn fetch_range(
        &self,
        stream: StreamId,
        start_ns: i64,
        end_ns: i64,
        pwe: Pwe,
    ) -> Result<Vec<DataPoint>, FetchError> {
        let body = encode_data_request(&stream, start_ns, end_ns, pwe, self.config.token.as_deref());
        debug!("data request: {}", body);
        let text = self.post("data", body).await?;
        parse_data_response(&text)
    }

    async fn fetch_bracket(
        &self,
        streams: &[StreamId],
    ) -> Result<HashMap<StreamId, Bracket>, FetchError> {
        if streams.is_empty() {
            return Ok(HashMap::new());
        }
        let body = encode_bracket_request(streams, self.config.token.as_deref());
        let text = self.post("bracket", body).await?;
        parse_bracket_response(&text, streams)
    }
}
