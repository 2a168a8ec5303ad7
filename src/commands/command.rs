use serde::{Serialize, Deserialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::scrape::ScrapeRequest;
use crate::tasks::Task;

/// Lifecycle state of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Running => "running",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Discriminant of [`CommandKind`] for display and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Deploy,
    Stop,
    Scout,
    Execute,
    Configure,
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandType::Deploy => "deploy",
            CommandType::Stop => "stop",
            CommandType::Scout => "scout",
            CommandType::Execute => "execute",
            CommandType::Configure => "configure",
        };
        write!(f, "{}", name)
    }
}

/// Options for deploying the agent onto a page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    /// Overrides the configured headless mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
}

/// Runtime settings changed by a `configure` command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,

    /// Quiet period that counts as "page loaded"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_idle_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_enabled: Option<bool>,
}

/// What a command does, with the parameters that operation needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "lowercase")]
pub enum CommandKind {
    Deploy { url: String, options: DeployOptions },
    Stop,
    Scout { request: ScrapeRequest },
    Execute { task: Task },
    Configure { params: ConfigureParams },
}

impl CommandKind {
    pub fn command_type(&self) -> CommandType {
        match self {
            CommandKind::Deploy { .. } => CommandType::Deploy,
            CommandKind::Stop => CommandType::Stop,
            CommandKind::Scout { .. } => CommandType::Scout,
            CommandKind::Execute { .. } => CommandType::Execute,
            CommandKind::Configure { .. } => CommandType::Configure,
        }
    }

    /// One-line human description
    pub fn describe(&self) -> String {
        match self {
            CommandKind::Deploy { url, .. } => format!("Deploy to {}", url),
            CommandKind::Stop => "Stop active automation".to_string(),
            CommandKind::Scout { request } => format!("Scout {}", request.url),
            CommandKind::Execute { task } => {
                format!("Execute {} on {}", task.action, task.selector)
            }
            CommandKind::Configure { .. } => "Configure automation runtime".to_string(),
        }
    }
}

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Immutable snapshot of a tracked asynchronous operation
///
/// Every transition builds a new record; a snapshot handed to a subscriber
/// never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    id: Uuid,
    kind: CommandKind,
    status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,

    /// Creation order within this process
    #[serde(skip)]
    sequence: u64,
}

impl Command {
    pub(crate) fn new(kind: CommandKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: CommandStatus::Pending,
            output: None,
            error: None,
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub(crate) fn running(&self) -> Self {
        debug_assert_eq!(self.status, CommandStatus::Pending);
        Self {
            status: CommandStatus::Running,
            ..self.clone()
        }
    }

    pub(crate) fn completed(&self, output: String) -> Self {
        debug_assert_eq!(self.status, CommandStatus::Running);
        Self {
            status: CommandStatus::Completed,
            output: Some(output),
            ..self.clone()
        }
    }

    pub(crate) fn failed(&self, error: String) -> Self {
        debug_assert_eq!(self.status, CommandStatus::Running);
        Self {
            status: CommandStatus::Failed,
            error: Some(error),
            ..self.clone()
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn command_type(&self) -> CommandType {
        self.kind.command_type()
    }

    pub fn status(&self) -> CommandStatus {
        self.status
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Commands created later have a larger sequence
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_build_new_records() {
        let pending = Command::new(CommandKind::Stop);
        let running = pending.running();
        let done = running.completed("stopped".to_string());

        assert_eq!(pending.status(), CommandStatus::Pending);
        assert_eq!(running.status(), CommandStatus::Running);
        assert_eq!(done.status(), CommandStatus::Completed);
        assert_eq!(done.output(), Some("stopped"));
        assert_eq!(done.error(), None);
        assert_eq!(pending.id(), done.id());
        assert_eq!(pending.sequence(), done.sequence());
        assert!(done.is_terminal());
        assert!(Command::new(CommandKind::Stop).sequence() > pending.sequence());
    }

    #[test]
    fn test_serialized_shape() {
        let command = Command::new(CommandKind::Deploy {
            url: "https://example.com".to_string(),
            options: DeployOptions::default(),
        });

        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["kind"]["type"], "deploy");
        assert_eq!(value["kind"]["params"]["url"], "https://example.com");
        assert!(value.get("output").is_none());
    }
}
