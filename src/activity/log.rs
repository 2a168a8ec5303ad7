use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::commands::{CommandStatus, CommandType};
use crate::scrape::{PageMetadata, SinkOutcome};

/// Broadcast channel capacity
const BROADCAST_CAPACITY: usize = 1000;

/// Category of a narrated entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Command,
    Result,
    Error,
    Automation,
    Bolt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Completed,
    Failed,
}

/// Typed metadata attached to an entry, keyed by what produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionDetails {
    Scrape {
        url: String,
    },
    ScrapeCompleted {
        url: String,
        metadata: PageMetadata,
        sinks: Vec<SinkOutcome>,
    },
    ScrapeFailed {
        url: String,
        stage: String,
        error: String,
    },
    Command {
        command_id: Uuid,
        command_type: CommandType,
        status: CommandStatus,
    },
}

impl ActionDetails {
    /// Target URL for scrape entries
    pub fn url(&self) -> Option<&str> {
        match self {
            ActionDetails::Scrape { url }
            | ActionDetails::ScrapeCompleted { url, .. }
            | ActionDetails::ScrapeFailed { url, .. } => Some(url),
            ActionDetails::Command { .. } => None,
        }
    }
}

/// A single activity entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,

    #[serde(rename = "type")]
    pub kind: ActionType,

    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionStatus>,

    pub project_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ActionDetails>,

    pub timestamp: DateTime<Utc>,
}

impl Action {
    pub fn new(kind: ActionType, content: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content: content.into(),
            status: None,
            project_id: project_id.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: ActionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_details(mut self, details: ActionDetails) -> Self {
        self.details = Some(details);
        self
    }
}

/// Append-only activity history with real-time fan-out
///
/// Cloning yields another handle on the same log.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: Arc<RwLock<Vec<Action>>>,
    tx: broadcast::Sender<Action>,
}

impl ActivityLog {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            tx,
        }
    }

    pub async fn append(&self, action: Action) {
        debug!("[{}] {:?}: {}", action.project_id, action.kind, action.content);

        self.entries.write().await.push(action.clone());

        // No receivers is fine
        let _ = self.tx.send(action);
    }

    /// Subscribe to entries appended from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.tx.subscribe()
    }

    pub async fn entries(&self) -> Vec<Action> {
        self.entries.read().await.clone()
    }

    pub async fn for_project(&self, project_id: &str) -> Vec<Action> {
        self.entries.read().await
            .iter()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect()
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_filter_by_project() {
        let log = ActivityLog::new();
        log.append(Action::new(ActionType::Command, "deploy", "alpha")).await;
        log.append(Action::new(ActionType::Result, "deployed", "beta")).await;
        log.append(Action::new(ActionType::Error, "boom", "alpha")).await;

        let alpha: Vec<String> = log.for_project("alpha").await.into_iter().map(|a| a.content).collect();
        assert_eq!(alpha, vec!["deploy", "boom"]);
        assert_eq!(log.entries().await.len(), 3);
    }

    #[tokio::test]
    async fn test_subscribers_receive_new_entries() {
        let log = ActivityLog::new();
        let mut rx = log.subscribe();
        let handle = log.clone();

        handle.append(
            Action::new(ActionType::Automation, "Starting web scraping for https://example.com", "p")
                .with_status(ActionStatus::Pending)
                .with_details(ActionDetails::Scrape { url: "https://example.com".to_string() }),
        ).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.status, Some(ActionStatus::Pending));
        assert_eq!(received.details.unwrap().url(), Some("https://example.com"));
    }

    #[test]
    fn test_action_serializes_type_field() {
        let action = Action::new(ActionType::Bolt, "hello", "p");
        let value = serde_json::to_value(&action).unwrap();

        assert_eq!(value["type"], "bolt");
        assert!(value.get("status").is_none());
        assert!(value.get("details").is_none());
    }
}
