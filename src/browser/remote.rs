use anyhow::{Result, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Serialize, Deserialize};
use std::time::Duration;
use tracing::{debug, error};

use crate::scrape::PdfRenderer;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfRequest {
    pub html: String,
    pub format: String,
    pub border: String,
}

/// HTTP browser service that renders HTML into PDF documents
pub struct RemoteBrowserService {
    client: Client,
    base_url: String,
}

impl RemoteBrowserService {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PdfRenderer for RemoteBrowserService {
    async fn render_pdf(&self, markup: &str) -> Result<Vec<u8>> {
        let endpoint = format!("{}/pdf", self.base_url);

        let request = PdfRequest {
            html: markup.to_string(),
            format: "A4".to_string(),
            border: "10mm".to_string(),
        };

        debug!("Requesting PDF rendering of {} bytes of markup", markup.len());

        let response = self.client.post(&endpoint)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to browser service")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await
                .unwrap_or_else(|_| "Unknown error".to_string());

            error!("PDF rendering failed: {}", error_text);
            anyhow::bail!("PDF rendering failed ({}): {}", status, error_text);
        }

        let bytes = response.bytes().await
            .context("Failed to read rendered PDF")?;

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_render_pdf() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pdf"))
            .and(body_partial_json(serde_json::json!({ "format": "A4", "border": "10mm" })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 fake".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let service = RemoteBrowserService::new(&format!("{}/", server.uri())).unwrap();
        let pdf = service.render_pdf("<h1>Hello</h1>").await.unwrap();

        assert!(pdf.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_render_pdf_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pdf"))
            .respond_with(ResponseTemplate::new(500).set_body_string("renderer crashed"))
            .mount(&server)
            .await;

        let service = RemoteBrowserService::new(&server.uri()).unwrap();
        let error = service.render_pdf("<p>x</p>").await.unwrap_err();

        assert!(error.to_string().contains("renderer crashed"));
    }
}
