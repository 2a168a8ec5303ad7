use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::commands::backend::AutomationBackend;
use crate::commands::command::{Command, CommandKind, ConfigureParams, DeployOptions};
use crate::error::CommandFailure;
use crate::scrape::ScrapeRequest;
use crate::tasks::Task;

/// Runs commands through `pending -> running -> completed | failed` and
/// publishes every snapshot to subscribers
pub struct CommandEngine {
    /// Executes the body of each command type
    backend: Arc<dyn AutomationBackend>,

    /// History and subscribers, only mutated by the engine
    state: Arc<Mutex<EngineState>>,
}

#[derive(Default)]
struct EngineState {
    /// Latest snapshot of every command, in creation order
    history: Vec<Command>,

    subscribers: Vec<mpsc::UnboundedSender<Command>>,
}

impl EngineState {
    fn publish(&mut self, command: &Command) {
        match self.history.iter_mut().rev().find(|c| c.id() == command.id()) {
            Some(slot) => *slot = command.clone(),
            None => self.history.push(command.clone()),
        }

        // Receivers that were dropped count as unsubscribed
        self.subscribers.retain(|tx| tx.send(command.clone()).is_ok());
    }
}

/// Ordered stream of command snapshots
///
/// Dropping the subscription detaches it from the engine.
pub struct CommandSubscription {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CommandSubscription {
    /// Next snapshot; `None` once the engine is gone
    pub async fn recv(&mut self) -> Option<Command> {
        self.rx.recv().await
    }

    /// Next snapshot if one is already queued
    pub fn try_recv(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl CommandEngine {
    pub fn new(backend: Arc<dyn AutomationBackend>) -> Self {
        Self {
            backend,
            state: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    pub async fn subscribe(&self) -> CommandSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.subscribers.push(tx);
        CommandSubscription { rx }
    }

    /// Latest snapshot of every command, in creation order
    pub async fn history(&self) -> Vec<Command> {
        self.state.lock().await.history.clone()
    }

    pub async fn deploy(&self, url: &str, options: DeployOptions) -> Result<Command, CommandFailure> {
        self.submit(CommandKind::Deploy { url: url.to_string(), options }).await
    }

    pub async fn stop(&self) -> Result<Command, CommandFailure> {
        self.submit(CommandKind::Stop).await
    }

    pub async fn scout(&self, request: ScrapeRequest) -> Result<Command, CommandFailure> {
        self.submit(CommandKind::Scout { request }).await
    }

    pub async fn execute(&self, task: Task) -> Result<Command, CommandFailure> {
        self.submit(CommandKind::Execute { task }).await
    }

    pub async fn configure(&self, params: ConfigureParams) -> Result<Command, CommandFailure> {
        self.submit(CommandKind::Configure { params }).await
    }

    /// Run one command to its terminal state
    ///
    /// The command runs on its own task, so it still reaches a terminal
    /// state when the caller stops waiting. Returns the completed snapshot,
    /// or the failed snapshot wrapped in [`CommandFailure`] after
    /// subscribers have been notified.
    pub async fn submit(&self, kind: CommandKind) -> Result<Command, CommandFailure> {
        let pending = Command::new(kind);
        let task = tokio::spawn(run_command(self.backend.clone(), self.state.clone(), pending.clone()));

        match task.await {
            Ok(result) => result,
            Err(e) => {
                // The body panicked after the running snapshot went out
                let message = format!("Command task ended abnormally: {}", e);
                let failed = pending.running().failed(message.clone());
                warn!("{} command {} failed: {}", failed.command_type(), failed.id(), message);
                self.state.lock().await.publish(&failed);
                Err(CommandFailure { command: failed, message })
            }
        }
    }
}

async fn run_command(
    backend: Arc<dyn AutomationBackend>,
    state: Arc<Mutex<EngineState>>,
    pending: Command,
) -> Result<Command, CommandFailure> {
    debug!("{} command {} pending: {}", pending.command_type(), pending.id(), pending.kind().describe());
    state.lock().await.publish(&pending);

    let running = pending.running();
    state.lock().await.publish(&running);

    match dispatch(backend.as_ref(), running.kind()).await {
        Ok(output) => {
            let completed = running.completed(output);
            info!("{} command {} completed", completed.command_type(), completed.id());
            state.lock().await.publish(&completed);
            Ok(completed)
        }
        Err(e) => {
            let message = format!("{:#}", e);
            let failed = running.failed(message.clone());
            warn!("{} command {} failed: {}", failed.command_type(), failed.id(), message);
            state.lock().await.publish(&failed);
            Err(CommandFailure { command: failed, message })
        }
    }
}

async fn dispatch(backend: &dyn AutomationBackend, kind: &CommandKind) -> anyhow::Result<String> {
    match kind {
        CommandKind::Deploy { url, options } => backend.deploy(url, options).await,
        CommandKind::Stop => backend.stop().await,
        CommandKind::Scout { request } => backend.scout(request).await,
        CommandKind::Execute { task } => backend.execute(task).await,
        CommandKind::Configure { params } => backend.configure(params).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::backend::testing::FakeBackend;
    use crate::commands::command::{CommandStatus, CommandType};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    fn drain(subscription: &mut CommandSubscription) -> Vec<Command> {
        let mut seen = Vec::new();
        while let Some(command) = subscription.try_recv() {
            seen.push(command);
        }
        seen
    }

    fn statuses(commands: &[Command]) -> Vec<CommandStatus> {
        commands.iter().map(|c| c.status()).collect()
    }

    #[tokio::test]
    async fn test_successful_command_publishes_three_snapshots() {
        let engine = CommandEngine::new(Arc::new(FakeBackend::new()));
        let mut subscription = engine.subscribe().await;

        let command = assert_ok!(engine.deploy("https://example.com", DeployOptions::default()).await);
        assert_eq!(command.status(), CommandStatus::Completed);
        assert_eq!(command.output(), Some("Successfully deployed to https://example.com"));

        let seen = drain(&mut subscription);
        assert_eq!(
            statuses(&seen),
            vec![CommandStatus::Pending, CommandStatus::Running, CommandStatus::Completed]
        );
        assert!(seen.iter().all(|c| c.id() == command.id()));
    }

    #[tokio::test]
    async fn test_failing_command_is_recorded_then_reraised() {
        let backend = FakeBackend::new().failing(CommandType::Stop, "driver vanished");
        let engine = CommandEngine::new(Arc::new(backend));
        let mut subscription = engine.subscribe().await;

        let failure = assert_err!(engine.stop().await);
        assert_eq!(failure.message, "driver vanished");
        assert_eq!(failure.command.status(), CommandStatus::Failed);
        assert_eq!(failure.command.error(), Some("driver vanished"));
        assert_eq!(failure.command.output(), None);

        let seen = drain(&mut subscription);
        assert_eq!(
            statuses(&seen),
            vec![CommandStatus::Pending, CommandStatus::Running, CommandStatus::Failed]
        );

        let history = engine.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], failure.command);
    }

    #[tokio::test]
    async fn test_history_keeps_creation_order() {
        let engine = CommandEngine::new(Arc::new(FakeBackend::new()));
        let first = engine.deploy("https://a.example", DeployOptions::default()).await.unwrap();
        let second = engine.configure(ConfigureParams::default()).await.unwrap();
        let third = engine.stop().await.unwrap();

        let ids: Vec<Uuid> = engine.history().await.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![first.id(), second.id(), third.id()]);
        assert_eq!(engine.history().await[1], second);
    }

    #[tokio::test]
    async fn test_concurrent_commands_keep_per_command_order() {
        let engine = Arc::new(CommandEngine::new(Arc::new(FakeBackend::new())));
        let mut subscription = engine.subscribe().await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    engine.deploy(&format!("https://{}.example", i), DeployOptions::default()).await.map(|_| ())
                } else {
                    engine.stop().await.map(|_| ())
                }
            }));
        }
        for result in futures::future::join_all(handles).await {
            result.unwrap().unwrap();
        }

        let mut per_command: HashMap<Uuid, Vec<CommandStatus>> = HashMap::new();
        for command in drain(&mut subscription) {
            per_command.entry(command.id()).or_default().push(command.status());
        }

        assert_eq!(per_command.len(), 8);
        for sequence in per_command.values() {
            assert_eq!(
                sequence,
                &vec![CommandStatus::Pending, CommandStatus::Running, CommandStatus::Completed]
            );
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_block_others() {
        let engine = CommandEngine::new(Arc::new(FakeBackend::new()));
        let dropped = engine.subscribe().await;
        let mut kept = engine.subscribe().await;
        dropped.unsubscribe();

        engine.stop().await.unwrap();

        assert_eq!(drain(&mut kept).len(), 3);
        assert_eq!(engine.state.lock().await.subscribers.len(), 1);
    }

    #[tokio::test]
    async fn test_command_outlives_abandoned_caller() {
        let gate = Arc::new(Semaphore::new(0));
        let backend = FakeBackend::new().gated(gate.clone());
        let entered = backend.entered();
        let engine = CommandEngine::new(Arc::new(backend));
        let mut subscription = engine.subscribe().await;

        let abandoned = timeout(
            Duration::from_millis(20),
            engine.deploy("https://example.com", DeployOptions::default()),
        ).await;
        assert!(abandoned.is_err());

        timeout(Duration::from_secs(5), entered.notified()).await.unwrap();
        gate.add_permits(1);

        let mut seen: Vec<Command> = Vec::new();
        while !seen.last().map_or(false, |c| c.is_terminal()) {
            let next = timeout(Duration::from_secs(5), subscription.recv()).await.unwrap();
            seen.push(next.unwrap());
        }

        assert_eq!(
            statuses(&seen),
            vec![CommandStatus::Pending, CommandStatus::Running, CommandStatus::Completed]
        );
        assert_eq!(statuses(&engine.history().await), vec![CommandStatus::Completed]);
    }
}
