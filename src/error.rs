use std::fmt;

use thiserror::Error;

use crate::commands::Command;
use crate::scrape::{ScrapedData, SinkKind};
use crate::tasks::ActionKind;

/// Task fields that cannot be turned into an executable step
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("task selector is empty")]
    EmptySelector,

    #[error("'{0}' action requires a value")]
    MissingValue(ActionKind),
}

/// A command that reached the `failed` state
///
/// Carries the terminal snapshot so callers see the same record the
/// subscribers saw.
#[derive(Debug, Clone, Error)]
#[error("{} command {} failed: {}", .command.command_type(), .command.id(), .message)]
pub struct CommandFailure {
    pub command: Command,
    pub message: String,
}

/// Step of a scrape that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeStage {
    Proxy,
    Launch,
    Navigation,
    Extraction,
    Sink(SinkKind),
}

impl fmt::Display for ScrapeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeStage::Proxy => write!(f, "proxy acquisition"),
            ScrapeStage::Launch => write!(f, "browser launch"),
            ScrapeStage::Navigation => write!(f, "navigation"),
            ScrapeStage::Extraction => write!(f, "extraction"),
            ScrapeStage::Sink(kind) => write!(f, "{} sink", kind),
        }
    }
}

/// Whole-operation failure of one scrape invocation
#[derive(Debug, Error)]
#[error("Failed to scrape {url}: {message}")]
pub struct ScrapeFailure {
    pub url: String,
    pub stage: ScrapeStage,
    pub message: String,

    /// Capture already computed when a sink failed
    pub data: Option<Box<ScrapedData>>,
}

impl ScrapeFailure {
    pub fn new(url: &str, stage: ScrapeStage, error: anyhow::Error) -> Self {
        Self {
            url: url.to_string(),
            stage,
            message: format!("{:#}", error),
            data: None,
        }
    }

    pub fn with_data(mut self, data: ScrapedData) -> Self {
        self.data = Some(Box::new(data));
        self
    }
}

/// Failure reported by an external collaborator (AI or persistence)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("Failed to generate response: {0}")]
    Generation(String),

    #[error("Failed to save to {table}: {message}")]
    Persistence { table: String, message: String },
}
