//! Blocking REST bindings for the external services.
//!
//! - [`RestCatalogService`]: PostgREST-style hosted catalog (`rpc/tnved_match`,
//!   `tnved_catalog`, `product_mappings`)
//! - [`OpenAiEmbeddings`]: OpenAI-compatible `/embeddings`
//! - [`ChatAssistant`]: OpenAI-compatible `/chat/completions`

use std::collections::HashSet;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    CatalogQueryService, CatalogVerificationService, ClassificationAssistant,
    DisambiguationAssistant, EmbeddingService, FuzzyRow, RemoteOverrideCache, ServiceError,
    ServiceResult, Suggestion,
};
use crate::config::{AssistantConfig, EmbeddingConfig, RemoteConfig};
use crate::models::{is_valid_code, OverrideMapping, OverrideSource};
use tariff_match_llm::{
    build_classification_messages, make_pick_prompt, parse_classification_output,
    parse_pick_output, ChatMessage, ClassifyItem,
};

const DEFAULT_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

fn build_client(timeout_secs: u64) -> ServiceResult<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn api_key(env_var: &str) -> Option<String> {
    std::env::var(env_var).ok().filter(|k| !k.trim().is_empty())
}

/// Turn a non-2xx response into [`ServiceError::Status`].
fn check_status(response: Response) -> ServiceResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(ServiceError::Status {
        status: status.as_u16(),
        body,
    })
}

fn decode<T: serde::de::DeserializeOwned>(response: Response) -> ServiceResult<T> {
    check_status(response)?
        .json()
        .map_err(|e| ServiceError::Decode(e.to_string()))
}

// ============ Hosted catalog ============

/// Hosted catalog service with a PostgREST-style REST interface.
pub struct RestCatalogService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    tenant: String,
}

#[derive(Serialize)]
struct FuzzyMatchParams<'a> {
    p_query: &'a str,
    p_limit_count: usize,
}

#[derive(Deserialize)]
struct CodeRow {
    code: String,
}

#[derive(Serialize, Deserialize)]
struct ProductMappingRow {
    product_name: String,
    tnved_code: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tenant: Option<String>,
}

impl RestCatalogService {
    pub fn new(base_url: &str, api_key: Option<String>, tenant: &str, timeout_secs: u64) -> ServiceResult<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            tenant: tenant.to_string(),
        })
    }

    /// `None` when no base URL is configured.
    pub fn from_config(config: &RemoteConfig) -> ServiceResult<Option<Self>> {
        match config.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => Self::new(
                url,
                api_key(&config.api_key_env),
                &config.tenant,
                config.timeout_secs,
            )
            .map(Some),
            None => Ok(None),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }
}

impl CatalogQueryService for RestCatalogService {
    fn fuzzy_match(&self, query: &str, limit: usize) -> ServiceResult<Vec<FuzzyRow>> {
        let url = format!("{}/rpc/tnved_match", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .json(&FuzzyMatchParams {
                p_query: query,
                p_limit_count: limit,
            })
            .send()?;

        let mut rows: Vec<FuzzyRow> = decode(response)?;
        rows.retain(|r| is_valid_code(r.code.trim()));
        for row in &mut rows {
            row.code = row.code.trim().to_string();
        }
        debug!(query, rows = rows.len(), "remote fuzzy match");
        Ok(rows)
    }
}

impl CatalogVerificationService for RestCatalogService {
    fn codes_exist(&self, codes: &[String]) -> ServiceResult<HashSet<String>> {
        let wanted: Vec<&str> = codes
            .iter()
            .map(String::as_str)
            .filter(|c| is_valid_code(c))
            .collect();
        if wanted.is_empty() {
            return Ok(HashSet::new());
        }

        let url = format!("{}/tnved_catalog", self.base_url);
        let filter = format!("in.({})", wanted.join(","));
        let response = self
            .authorize(self.client.get(&url))
            .query(&[("select", "code"), ("code", filter.as_str())])
            .send()?;

        let rows: Vec<CodeRow> = decode(response)?;
        Ok(rows.into_iter().map(|r| r.code).collect())
    }
}

impl RemoteOverrideCache for RestCatalogService {
    fn fetch_all(&self) -> ServiceResult<Vec<OverrideMapping>> {
        let url = format!("{}/product_mappings", self.base_url);
        let tenant_filter = format!("eq.{}", self.tenant);
        let response = self
            .authorize(self.client.get(&url))
            .query(&[
                ("select", "product_name,tnved_code,source"),
                ("tenant", tenant_filter.as_str()),
            ])
            .send()?;

        let rows: Vec<ProductMappingRow> = decode(response)?;
        Ok(rows
            .into_iter()
            .filter(|r| is_valid_code(&r.tnved_code))
            .map(|r| {
                OverrideMapping::name(
                    crate::resolver::normalize_key(&r.product_name),
                    r.tnved_code,
                    OverrideSource::Remote,
                )
            })
            .filter(|m| !m.key.is_empty())
            .collect())
    }

    fn upsert(&self, mapping: &OverrideMapping) -> ServiceResult<()> {
        let url = format!("{}/product_mappings", self.base_url);
        let row = ProductMappingRow {
            product_name: mapping.key.clone(),
            tnved_code: mapping.code.clone(),
            source: Some(mapping.source.as_str().to_string()),
            tenant: Some(self.tenant.clone()),
        };
        let response = self
            .authorize(self.client.post(&url))
            .header("Prefer", "resolution=merge-duplicates")
            .json(&[row])
            .send()?;
        check_status(response)?;
        Ok(())
    }
}

// ============ Embeddings ============

/// OpenAI-compatible embeddings client.
pub struct OpenAiEmbeddings {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    pub fn from_config(config: &EmbeddingConfig) -> ServiceResult<Option<Self>> {
        let key = api_key(&config.api_key_env);
        if config.url.is_none() && key.is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            client: build_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_EMBEDDINGS_URL.to_string()),
            model: config.model.clone(),
            api_key: key,
        }))
    }
}

impl EmbeddingService for OpenAiEmbeddings {
    fn embed(&self, texts: &[String]) -> ServiceResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.url).json(&serde_json::json!({
            "model": self.model,
            "input": texts,
        }));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let mut response: EmbeddingResponse = decode(request.send()?)?;
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

// ============ Chat assistant ============

/// OpenAI-compatible chat client for suggestions and disambiguation.
pub struct ChatAssistant {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl ChatAssistant {
    pub fn from_config(config: &AssistantConfig) -> ServiceResult<Option<Self>> {
        let key = api_key(&config.api_key_env);
        if config.url.is_none() && key.is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            client: build_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_CHAT_URL.to_string()),
            model: config.model.clone(),
            api_key: key,
        }))
    }

    fn complete(&self, messages: &[ChatMessage]) -> ServiceResult<String> {
        let mut request = self.client.post(&self.url).json(&serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": messages,
        }));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response: ChatResponse = decode(request.send()?)?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ServiceError::Decode("empty chat completion".into()))
    }
}

impl ClassificationAssistant for ChatAssistant {
    fn classify(&self, activity: Option<&str>, items: &[ClassifyItem]) -> ServiceResult<Vec<Suggestion>> {
        let messages = build_classification_messages(activity, items, true);
        let reply = self.complete(&messages)?;
        let output = parse_classification_output(&reply)?;
        Ok(output
            .results
            .into_iter()
            .map(|s| Suggestion {
                id: s.id,
                code: s.code,
            })
            .collect())
    }
}

impl DisambiguationAssistant for ChatAssistant {
    fn pick(&self, name: &str, options: &[String]) -> ServiceResult<Option<usize>> {
        let messages = [ChatMessage {
            role: "user",
            content: make_pick_prompt(name, options),
        }];
        let reply = self.complete(&messages)?;
        Ok(parse_pick_output(&reply, options.len())?)
    }
}
