// SPDX-License-Identifier: MIT

//! Web search clients used by the research step

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::adk::error::StagewiseError;

/// One search result as returned by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub source: String,
    /// Provider-assigned score, if any
    #[serde(default)]
    pub score: Option<f64>,
}

/// Capability to run a web search
#[async_trait]
pub trait SearchClient: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, max_results: u32)
        -> Result<Vec<SearchHit>, StagewiseError>;
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f64>,
}

/// Tavily search API client
pub struct TavilySearchClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl TavilySearchClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, StagewiseError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(StagewiseError::config("TAVILY_API_KEY must be set"));
        }
        Ok(Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.tavily.com".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn parse_response(body: TavilyResponse) -> Vec<SearchHit> {
        body.results
            .into_iter()
            .filter(|r| !r.content.trim().is_empty())
            .map(|r| SearchHit {
                source: if r.url.is_empty() {
                    "Unknown source".to_string()
                } else {
                    r.url
                },
                content: r.content,
                score: r.score,
            })
            .collect()
    }
}

#[async_trait]
impl SearchClient for TavilySearchClient {
    fn name(&self) -> &str {
        "tavily_search"
    }

    async fn search(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<SearchHit>, StagewiseError> {
        let url = format!("{}/search", self.base_url);
        let body = json!({
            "query": query,
            "max_results": max_results,
            "include_answer": false,
            "include_raw_content": false
        });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let text = resp.text().await?;
            return Err(StagewiseError::api("tavily", text));
        }

        let parsed: TavilyResponse = resp.json().await?;
        let hits = Self::parse_response(parsed);
        log::debug!("Tavily returned {} hits for '{}'", hits.len(), query);
        Ok(hits)
    }
}

/// Client used when no search provider is configured; always empty
#[derive(Debug, Default)]
pub struct StubSearchClient;

#[async_trait]
impl SearchClient for StubSearchClient {
    fn name(&self) -> &str {
        "stub_search"
    }

    async fn search(
        &self,
        query: &str,
        _max_results: u32,
    ) -> Result<Vec<SearchHit>, StagewiseError> {
        log::debug!("Stub search for '{}' returns no results", query);
        Ok(Vec::new())
    }
}

/// Pick Tavily when a key is present, otherwise degrade to the stub.
///
/// The second element explains why the stub was chosen.
pub fn from_api_key(api_key: Option<&str>) -> (Arc<dyn SearchClient>, Option<String>) {
    let Some(key) = api_key else {
        return (
            Arc::new(StubSearchClient),
            Some("TAVILY_API_KEY not set, search returns no results".to_string()),
        );
    };

    match TavilySearchClient::new(key) {
        Ok(client) => {
            let client: Arc<dyn SearchClient> = Arc::new(client);
            (client, None)
        }
        Err(e) => {
            log::warn!("Failed to create Tavily client: {}", e);
            let client: Arc<dyn SearchClient> = Arc::new(StubSearchClient);
            (client, Some(e.to_string()))
        }
    }
}
