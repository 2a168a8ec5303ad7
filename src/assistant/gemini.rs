use anyhow::{Result, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use crate::assistant::Assistant;
use crate::cli::config::AssistantSettings;
use crate::error::ServiceError;

/// User-facing text for every generation failure
const GENERATION_FAILED: &str = "Failed to generate response. Please try again.";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    /// Text of the first candidate
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().map(|p| p.text).collect();
        (!text.is_empty()).then_some(text)
    }
}

/// Gemini `generateContent` REST client
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(settings: &AssistantSettings) -> Result<Self> {
        let api_key = settings.api_key.clone()
            .context("Missing Gemini API key (set assistant.api_key or GEMINI_API_KEY)")?;

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
        })
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model);
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self.client.post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Gemini")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Gemini returned {}: {}", status, error_text);
        }

        let parsed: GenerateResponse = response.json().await
            .context("Failed to parse Gemini response")?;

        parsed.text().context("Gemini returned no candidates")
    }
}

#[async_trait]
impl Assistant for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        debug!("Generating response with {}", self.model);

        self.request(prompt).await.map_err(|e| {
            error!("Error generating response: {:#}", e);
            ServiceError::Generation(GENERATION_FAILED.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(endpoint: &str) -> AssistantSettings {
        AssistantSettings {
            endpoint: endpoint.to_string(),
            model: "gemini-pro".to_string(),
            api_key: Some("secret".to_string()),
        }
    }

    #[tokio::test]
    async fn test_generate_returns_first_candidate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-pro:generateContent"))
            .and(query_param("key", "secret"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{ "role": "user", "parts": [{ "text": "Which selector?" }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": "Use " }, { "text": "#login" }] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(&settings(&server.uri())).unwrap();
        assert_eq!(client.generate("Which selector?").await.unwrap(), "Use #login");
    }

    #[tokio::test]
    async fn test_generate_failure_is_generation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let client = GeminiClient::new(&settings(&server.uri())).unwrap();
        let error = client.generate("hi").await.unwrap_err();

        assert_eq!(error, ServiceError::Generation(GENERATION_FAILED.to_string()));
    }

    #[tokio::test]
    async fn test_empty_candidates_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let client = GeminiClient::new(&settings(&server.uri())).unwrap();
        assert!(client.generate("hi").await.is_err());
    }
}
