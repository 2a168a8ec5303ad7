use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activity::{Action, ActionDetails, ActionStatus, ActionType, ActivityLog};
use crate::assistant::Assistant;
use crate::commands::{Command, CommandEngine, CommandStatus, CommandSubscription, CommandType, DeployOptions};
use crate::error::{CommandFailure, ServiceError};
use crate::tasks::{Task, TaskPatch, TaskSequence};

pub mod state;

pub use state::{AppState, DeploymentStatus, Message, Role};

/// Reply shown when the assistant cannot answer
pub const APOLOGY: &str = "I apologize, but I encountered an error. Please try again.";

/// Process-wide state container driving the engine
///
/// Every command the engine runs is mirrored into `current_command`,
/// whoever triggered it.
pub struct AppStore {
    state: Arc<watch::Sender<AppState>>,
    engine: Arc<CommandEngine>,
    activity: ActivityLog,
    assistant: Option<Arc<dyn Assistant>>,

    /// Standing engine subscription
    mirror: JoinHandle<()>,
}

impl AppStore {
    pub async fn new(
        engine: Arc<CommandEngine>,
        activity: ActivityLog,
        project_id: &str,
        assistant: Option<Arc<dyn Assistant>>,
    ) -> Self {
        let (tx, _) = watch::channel(AppState::new(project_id));
        let state = Arc::new(tx);

        let subscription = engine.subscribe().await;
        let mirror = tokio::spawn(mirror_commands(subscription, state.clone(), activity.clone()));

        Self {
            state,
            engine,
            activity,
            assistant,
            mirror,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> AppState {
        self.state.borrow().clone()
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn set_target_url(&self, url: &str) {
        let url = url.trim();
        let target = (!url.is_empty()).then(|| url.to_string());
        self.state.send_modify(|s| s.target_url = target);
    }

    pub fn add_task(&self) -> Task {
        let mut created = None;
        self.state.send_modify(|s| created = Some(s.tasks.create().clone()));
        created.unwrap_or_default()
    }

    /// Returns false when no task has `id`
    pub fn update_task(&self, id: Uuid, patch: TaskPatch) -> bool {
        self.state.send_if_modified(|s| s.tasks.update(id, patch))
    }

    /// Returns false when no task has `id`
    pub fn delete_task(&self, id: Uuid) -> bool {
        self.state.send_if_modified(|s| s.tasks.delete(id))
    }

    /// Replace the whole task sequence
    pub fn load_tasks(&self, tasks: TaskSequence) {
        self.state.send_modify(|s| s.tasks = tasks);
    }

    pub fn add_message(&self, role: Role, content: impl Into<String>) -> Message {
        let message = Message::new(role, content);
        self.state.send_modify(|s| s.messages.push(message.clone()));
        message
    }

    pub fn clear_messages(&self) {
        self.state.send_modify(|s| s.messages.clear());
    }

    /// Send a prompt to the assistant and record both sides of the exchange
    ///
    /// Generation failures are answered with an apology message.
    pub async fn ask(&self, prompt: &str) -> Message {
        self.add_message(Role::User, prompt);

        let reply = match &self.assistant {
            Some(assistant) => assistant.generate(prompt).await,
            None => Err(ServiceError::Generation("No assistant configured".to_string())),
        };

        match reply {
            Ok(text) => self.add_message(Role::Assistant, text),
            Err(e) => {
                warn!("Assistant unavailable: {}", e);
                self.add_message(Role::Assistant, APOLOGY)
            }
        }
    }

    /// Deploy to the target URL
    ///
    /// No-op returning `None` when no target is set or a deployment is
    /// already in flight.
    pub async fn deploy(&self) -> Option<Command> {
        let mut target = None;
        self.state.send_if_modified(|s| match (&s.target_url, s.is_deploying) {
            (Some(url), false) => {
                target = Some(url.clone());
                s.is_deploying = true;
                s.deployment_status = DeploymentStatus::Deploying;
                true
            }
            _ => false,
        });

        let Some(url) = target else {
            debug!("Deploy ignored: no target set or deployment in flight");
            return None;
        };

        let engine = self.engine.clone();
        let target = url.clone();
        let command = self.drive(
            async move { engine.deploy(&target, DeployOptions::default()).await },
            move |s, command| {
                let status = if command.status() == CommandStatus::Completed {
                    DeploymentStatus::Deployed
                } else {
                    DeploymentStatus::Failed
                };
                info!("Deployment to {} {}", url, status);
                s.is_deploying = false;
                s.deployment_status = status;
            },
        ).await;

        if command.is_none() {
            self.state.send_modify(|s| {
                s.is_deploying = false;
                s.deployment_status = DeploymentStatus::Failed;
            });
        }

        command
    }

    /// Stop the active deployment; no-op unless deployed
    pub async fn stop(&self) -> Option<Command> {
        if self.state.borrow().deployment_status != DeploymentStatus::Deployed {
            debug!("Stop ignored: nothing deployed");
            return None;
        }

        let engine = self.engine.clone();
        self.drive(
            async move { engine.stop().await },
            |s, command| {
                if command.status() == CommandStatus::Completed {
                    s.deployment_status = DeploymentStatus::Idle;
                }
            },
        ).await
    }

    /// Execute one task of the sequence; no-op when `id` is unknown
    pub async fn execute_task(&self, id: Uuid) -> Option<Command> {
        let task = self.state.borrow().tasks.get(id).cloned();
        let Some(task) = task else {
            debug!("Execute ignored: no task {}", id);
            return None;
        };

        let engine = self.engine.clone();
        self.drive(async move { engine.execute(task).await }, |_, _| {}).await
    }

    /// Await `command` on its own task, then apply `settle` and record the
    /// terminal snapshot
    ///
    /// The state update still happens when the caller stops waiting.
    async fn drive<F, S>(&self, command: F, settle: S) -> Option<Command>
    where
        F: Future<Output = Result<Command, CommandFailure>> + Send + 'static,
        S: FnOnce(&mut AppState, &Command) + Send + 'static,
    {
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            let command = command.await.unwrap_or_else(|failure| failure.command);
            state.send_modify(|s| {
                settle(s, &command);
                s.observe_command(command.clone());
            });
            command
        });

        match task.await {
            Ok(command) => Some(command),
            Err(e) => {
                warn!("Command task ended abnormally: {}", e);
                None
            }
        }
    }
}

impl Drop for AppStore {
    fn drop(&mut self) {
        self.mirror.abort();
    }
}

async fn mirror_commands(
    mut subscription: CommandSubscription,
    state: Arc<watch::Sender<AppState>>,
    activity: ActivityLog,
) {
    while let Some(command) = subscription.recv().await {
        let project_id = state.borrow().project_id.clone();
        if let Some(action) = narrate(&command, &project_id) {
            activity.append(action).await;
        }

        state.send_if_modified(|s| s.observe_command(command));
    }
}

/// Activity entry for a command transition, if it warrants one
///
/// Scout commands are narrated by the scraper itself.
fn narrate(command: &Command, project_id: &str) -> Option<Action> {
    if command.command_type() == CommandType::Scout {
        return None;
    }

    let (kind, content, status) = match command.status() {
        CommandStatus::Pending => (ActionType::Command, command.kind().describe(), ActionStatus::Pending),
        CommandStatus::Running => return None,
        CommandStatus::Completed => (
            ActionType::Result,
            command.output().unwrap_or_default().to_string(),
            ActionStatus::Completed,
        ),
        CommandStatus::Failed => (
            ActionType::Error,
            command.error().unwrap_or_default().to_string(),
            ActionStatus::Failed,
        ),
    };

    Some(
        Action::new(kind, content, project_id)
            .with_status(status)
            .with_details(ActionDetails::Command {
                command_id: command.id(),
                command_type: command.command_type(),
                status: command.status(),
            }),
    )
}
