use anyhow::{Result, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::persistence::PersistenceService;
use crate::scrape::data::ScrapedData;

/// Destination a capture can be written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Remote,
    Json,
    Pdf,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkKind::Remote => "remote",
            SinkKind::Json => "json",
            SinkKind::Pdf => "pdf",
        };
        write!(f, "{}", name)
    }
}

/// Where a sink put the capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkOutcome {
    pub sink: SinkKind,
    pub location: String,
}

/// Everything a sink may need from one scrape
#[derive(Debug, Clone)]
pub struct Capture {
    pub project_id: String,
    pub data: ScrapedData,

    /// Raw page markup
    pub markup: String,
}

/// Persistence or export target for captures
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sink: Send + Sync {
    fn kind(&self) -> SinkKind;

    /// Write the capture and return its location
    async fn write(&self, capture: &Capture) -> Result<String>;
}

/// Renders HTML markup into a PDF document
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render_pdf(&self, markup: &str) -> Result<Vec<u8>>;
}

/// Inserts captures into a remote table
pub struct RemoteSink {
    service: Arc<dyn PersistenceService>,
    table: String,
}

impl RemoteSink {
    pub fn new(service: Arc<dyn PersistenceService>, table: &str) -> Self {
        Self {
            service,
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl Sink for RemoteSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Remote
    }

    async fn write(&self, capture: &Capture) -> Result<String> {
        let record = serde_json::json!({
            "project_id": capture.project_id,
            "url": capture.data.url,
            "content": capture.data.content,
            "metadata": capture.data.metadata,
            "timestamp": capture.data.timestamp,
        });

        self.service.insert(&self.table, record).await?;
        debug!("Saved {} to {}", capture.data.url, self.table);

        Ok(self.table.clone())
    }
}

fn export_path(output_dir: &Path, extension: &str) -> PathBuf {
    output_dir.join(format!("scraped_data_{}.{}", Uuid::new_v4(), extension))
}

/// Writes captures as pretty-printed JSON files
pub struct JsonExportSink {
    output_dir: PathBuf,
}

impl JsonExportSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: output_dir.into() }
    }
}

#[async_trait]
impl Sink for JsonExportSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Json
    }

    async fn write(&self, capture: &Capture) -> Result<String> {
        fs::create_dir_all(&self.output_dir).await
            .context(format!("Failed to create export directory: {}", self.output_dir.display()))?;

        let json = serde_json::to_vec_pretty(&capture.data)
            .context("Failed to serialize scraped data")?;

        let path = export_path(&self.output_dir, "json");
        fs::write(&path, json).await
            .context(format!("Failed to write JSON export: {}", path.display()))?;

        debug!("Exported JSON to {}", path.display());
        Ok(path.display().to_string())
    }
}

/// Renders the captured markup to PDF files
pub struct PdfExportSink {
    renderer: Arc<dyn PdfRenderer>,
    output_dir: PathBuf,
}

impl PdfExportSink {
    pub fn new(renderer: Arc<dyn PdfRenderer>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            renderer,
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl Sink for PdfExportSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Pdf
    }

    async fn write(&self, capture: &Capture) -> Result<String> {
        let pdf = self.renderer.render_pdf(&capture.markup).await
            .context("Failed to render PDF")?;

        fs::create_dir_all(&self.output_dir).await
            .context(format!("Failed to create export directory: {}", self.output_dir.display()))?;

        let path = export_path(&self.output_dir, "pdf");
        fs::write(&path, pdf).await
            .context(format!("Failed to write PDF export: {}", path.display()))?;

        debug!("Exported PDF to {}", path.display());
        Ok(path.display().to_string())
    }
}
