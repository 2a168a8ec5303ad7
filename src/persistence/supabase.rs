use anyhow::{Result, Context};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error};

use crate::cli::config::PersistenceSettings;
use crate::error::ServiceError;
use crate::persistence::PersistenceService;

/// Supabase REST (PostgREST) client
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SupabaseClient {
    pub fn new(settings: &PersistenceSettings) -> Result<Self> {
        if settings.url.is_empty() {
            anyhow::bail!("Missing Supabase URL (set persistence.url or SUPABASE_URL)");
        }
        let api_key = settings.api_key.clone()
            .context("Missing Supabase key (set persistence.api_key or SUPABASE_ANON_KEY)")?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl PersistenceService for SupabaseClient {
    async fn insert(&self, table: &str, record: serde_json::Value) -> Result<(), ServiceError> {
        let failure = |message: String| ServiceError::Persistence {
            table: table.to_string(),
            message,
        };

        let endpoint = format!("{}/rest/v1/{}", self.base_url, table);

        let response = self.client.post(&endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=minimal")
            .json(&record)
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await
                .unwrap_or_else(|_| "Unknown error".to_string());

            error!("Supabase insert into {} failed: {}", table, error_text);
            return Err(failure(format!("{}: {}", status, error_text)));
        }

        debug!("Inserted record into {}", table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(url: &str) -> PersistenceSettings {
        PersistenceSettings {
            backend: "supabase".to_string(),
            url: url.to_string(),
            api_key: Some("anon-key".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_posts_record() {
        let server = MockServer::start().await;
        let record = serde_json::json!({ "project_id": "demo", "url": "https://example.com" });

        Mock::given(method("POST"))
            .and(path("/rest/v1/scraped_data"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer anon-key"))
            .and(header("prefer", "return=minimal"))
            .and(body_json(&record))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&settings(&server.uri())).unwrap();
        client.insert("scraped_data", record).await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_error_maps_to_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid API key"))
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&settings(&server.uri())).unwrap();
        let error = client.insert("scraped_data", serde_json::json!({})).await.unwrap_err();

        match error {
            ServiceError::Persistence { table, message } => {
                assert_eq!(table, "scraped_data");
                assert!(message.contains("Invalid API key"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let mut config = settings("https://project.supabase.co");
        config.api_key = None;
        assert!(SupabaseClient::new(&config).is_err());
    }
}
