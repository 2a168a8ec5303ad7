use chrono::{SecondsFormat, Utc};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::browser::ElementSnapshot;

/// Selector for the headings recorded in page metadata
pub const HEADING_SELECTOR: &str = "h1, h2, h3";

fn enabled() -> bool {
    true
}

/// Parameters of one scrape invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,

    pub project_id: String,

    /// Insert the capture into the remote store
    #[serde(default = "enabled")]
    pub save_remote: bool,

    /// Write the capture as a JSON file
    #[serde(default = "enabled")]
    pub export_json: bool,

    /// Render the page markup as a PDF file
    #[serde(default = "enabled")]
    pub export_pdf: bool,
}

impl ScrapeRequest {
    /// Request with every sink enabled
    pub fn new(url: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            project_id: project_id.into(),
            save_remote: true,
            export_json: true,
            export_pdf: true,
        }
    }
}

/// Heading element found on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    pub text: String,
    pub tag: String,
}

impl From<ElementSnapshot> for Heading {
    fn from(element: ElementSnapshot) -> Self {
        Self {
            text: element.text,
            tag: element.tag,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: String,
    pub headers: Vec<Heading>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    pub title: String,
}

/// Parsed text content of a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub page_content: String,
    pub metadata: DocumentMetadata,
}

/// Result of one successful page capture
///
/// Built once per scrape and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedData {
    pub url: String,
    pub content: Vec<Document>,

    /// ISO-8601, taken when the page was read
    pub timestamp: String,

    pub metadata: PageMetadata,
}

impl ScrapedData {
    pub fn new(url: &str, markup: &str, metadata: PageMetadata) -> Self {
        Self {
            url: url.to_string(),
            content: parse_documents(markup, url),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            metadata,
        }
    }
}

/// Parse page markup into a document collection
pub fn parse_documents(markup: &str, source: &str) -> Vec<Document> {
    let document = Html::parse_document(markup);

    let title = Selector::parse("title").ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let page_content = Selector::parse("body").ok()
        .and_then(|sel| document.select(&sel).next())
        .map(visible_text)
        .unwrap_or_else(|| visible_text(document.root_element()));

    vec![Document {
        page_content,
        metadata: DocumentMetadata {
            source: source.to_string(),
            title,
        },
    }]
}

/// Whitespace-normalised text, skipping script and style contents
fn visible_text(element: ElementRef) -> String {
    element.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent()?;
            let hidden = parent.value().as_element()
                .map(|el| matches!(el.name(), "script" | "style" | "noscript" | "template"))
                .unwrap_or(false);
            (!hidden).then(|| &**text)
        })
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
