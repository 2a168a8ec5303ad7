pub mod data;
pub mod orchestrator;
pub mod sinks;

pub use data::{PageMetadata, ScrapeRequest, ScrapedData};
pub use orchestrator::Scraper;
pub use sinks::{JsonExportSink, PdfExportSink, PdfRenderer, RemoteSink, SinkKind, SinkOutcome};
