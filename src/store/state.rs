use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::commands::Command;
use crate::tasks::TaskSequence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    #[default]
    Idle,
    Deploying,
    Deployed,
    Failed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentStatus::Idle => "idle",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Observable application state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub project_id: String,
    pub tasks: TaskSequence,
    pub messages: Vec<Message>,

    /// Page the agent deploys to; `None` until set
    pub target_url: Option<String>,

    pub is_deploying: bool,
    pub deployment_status: DeploymentStatus,

    /// Latest snapshot of the most recent command
    pub current_command: Option<Command>,
}

impl AppState {
    pub fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            ..Default::default()
        }
    }

    /// Adopt a command snapshot unless it is stale
    ///
    /// A non-terminal snapshot never replaces the terminal snapshot of
    /// the same command, and a command created before the current one
    /// never replaces it. Returns whether the state changed.
    pub(crate) fn observe_command(&mut self, command: Command) -> bool {
        if let Some(current) = &self.current_command {
            if *current == command {
                return false;
            }
            if current.id() == command.id() {
                if current.is_terminal() && !command.is_terminal() {
                    return false;
                }
            } else if command.sequence() < current.sequence() {
                return false;
            }
        }

        self.current_command = Some(command);
        true
    }
}
