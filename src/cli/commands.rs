use anyhow::{Result, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activity::ActionDetails;
use crate::app::App;
use crate::cli::config::AppConfig;
use crate::cli::TaskAction;
use crate::commands::{Command, CommandStatus, CommandSubscription, CommandType, ConfigureParams};
use crate::scrape::ScrapeRequest;
use crate::tasks::{ProjectFile, Task, TaskPatch};

/// Load the named profile, or the default configuration
pub fn load_config(profile: Option<&str>) -> Result<AppConfig> {
    match profile {
        Some(name) => AppConfig::load_profile(name)
            .context(format!("Failed to load profile: {}", name)),
        None => AppConfig::load_default(),
    }
}

fn print_command(command: &Command) {
    let detail = match command.status() {
        CommandStatus::Completed => command.output().unwrap_or_default().to_string(),
        CommandStatus::Failed => command.error().unwrap_or_default().to_string(),
        _ => command.kind().describe(),
    };
    println!("[{:<9}] {:<9} {}  {}", command.status(), command.command_type(), command.id(), detail);
}

fn print_task(index: usize, task: &Task) {
    println!(
        "{:>3}. {}  {:<6} {:<30} {}",
        index + 1,
        task.id,
        task.action,
        task.selector,
        task.value.as_deref().unwrap_or("")
    );
}

fn flush(subscription: &mut CommandSubscription) {
    while let Some(command) = subscription.try_recv() {
        print_command(&command);
    }
}

/// Deploy to the target, execute every task in order, then stop
pub async fn run(config: AppConfig, project: String, url: Option<String>, params: ConfigureParams) -> Result<()> {
    let project_file = ProjectFile::load_or_new(&config.project.data_dir, &project)?;
    let target = url.or_else(|| project_file.target_url.clone())
        .context(format!("No target URL for project {}; pass --url or run `lens tasks {} target <url>`", project, project))?;

    if project_file.tasks.is_empty() {
        warn!("Project {} has no tasks", project);
    }

    let app = App::new(config, &project).await?;
    let store = app.store();

    // Every command's transitions are queued by the time its call returns
    let mut subscription = app.engine().subscribe().await;

    let mut status = store.subscribe();
    tokio::spawn(async move {
        let mut last = status.borrow_and_update().deployment_status;
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().deployment_status;
            if current != last {
                info!("Deployment status: {} -> {}", last, current);
                last = current;
            }
        }
    });

    let mut narration = store.activity().subscribe();
    tokio::spawn(async move {
        loop {
            match narration.recv().await {
                Ok(action) => debug!("[{:?}] {}", action.kind, action.content),
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {} activity entries", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if params != ConfigureParams::default() {
        let configured = app.engine().configure(params).await;
        flush(&mut subscription);
        configured?;
    }

    store.load_tasks(project_file.tasks);
    store.set_target_url(&target);

    let deployment = store.deploy().await
        .context("Deployment did not start")?;
    flush(&mut subscription);
    if deployment.status() != CommandStatus::Completed {
        anyhow::bail!("Deployment failed: {}", deployment.error().unwrap_or("unknown error"));
    }

    let ids: Vec<Uuid> = store.snapshot().tasks.iter().map(|task| task.id).collect();
    for id in ids {
        store.execute_task(id).await;
        flush(&mut subscription);
    }

    store.stop().await;
    flush(&mut subscription);
    subscription.unsubscribe();

    let executed: Vec<Command> = app.engine().history().await
        .into_iter()
        .filter(|command| command.command_type() == CommandType::Execute)
        .collect();
    let failures = executed.iter().filter(|command| command.status() == CommandStatus::Failed).count();

    if failures > 0 {
        anyhow::bail!("{} of {} tasks failed", failures, executed.len());
    }

    info!("Executed {} tasks on {}", executed.len(), target);
    Ok(())
}

/// Scrape one page through a scout command
pub async fn scrape(
    config: AppConfig,
    url: String,
    project: Option<String>,
    save_remote: bool,
    export_json: bool,
    export_pdf: bool,
) -> Result<()> {
    let project = project.unwrap_or_else(|| config.project.default_project.clone());
    let app = App::new(config, &project).await?;

    let request = ScrapeRequest {
        url,
        project_id: project.clone(),
        save_remote,
        export_json,
        export_pdf,
    };

    let result = app.engine().scout(request).await;

    for action in app.store().activity().for_project(&project).await {
        println!("{} [{:?}] {}", action.timestamp.format("%H:%M:%S"), action.kind, action.content);
        if let Some(ActionDetails::ScrapeCompleted { sinks, .. }) = &action.details {
            for outcome in sinks {
                println!("    {} -> {}", outcome.sink, outcome.location);
            }
        }
    }

    let command = result?;
    println!("{}", command.output().unwrap_or_default());
    if export_json || export_pdf {
        println!("Exports directory: {}", app.config().export.output_dir.display());
    }

    Ok(())
}

/// Edit a project's persisted task sequence
pub async fn tasks(config: AppConfig, project: String, action: TaskAction) -> Result<()> {
    let data_dir = config.project.data_dir.clone();
    let mut project_file = ProjectFile::load_or_new(&data_dir, &project)?;

    let app = App::new(config, &project).await?;
    let store = app.store();
    store.load_tasks(project_file.tasks.clone());
    if let Some(url) = &project_file.target_url {
        store.set_target_url(url);
    }

    match action {
        TaskAction::List => {
            let state = store.snapshot();
            println!("Project: {}", state.project_id);
            println!("Target: {}", state.target_url.as_deref().unwrap_or("(not set)"));
            for (index, task) in state.tasks.iter().enumerate() {
                print_task(index, task);
            }
            return Ok(());
        }
        TaskAction::Add { selector, action, value } => {
            let id = store.add_task().id;
            store.update_task(id, TaskPatch {
                selector: Some(selector),
                action: Some(action),
                value,
            });
            println!("Added task {}", id);
        }
        TaskAction::Update { id, selector, action, value } => {
            if !store.update_task(id, TaskPatch { selector, action, value }) {
                anyhow::bail!("No task {} in project {}", id, project);
            }
            println!("Updated task {}", id);
        }
        TaskAction::Remove { id } => {
            if !store.delete_task(id) {
                anyhow::bail!("No task {} in project {}", id, project);
            }
            println!("Removed task {}", id);
        }
        TaskAction::Target { url } => {
            store.set_target_url(&url);
            println!("Target set to {}", url);
        }
    }

    let state = store.snapshot();
    project_file.tasks = state.tasks;
    project_file.target_url = state.target_url;
    project_file.save(&data_dir)
}

/// Ask the assistant one question, or chat line by line when no prompt is given
pub async fn chat(config: AppConfig, prompt: Vec<String>) -> Result<()> {
    let project = config.project.default_project.clone();
    let app = App::new(config, &project).await?;
    let store = app.store();

    if !prompt.is_empty() {
        let reply = store.ask(&prompt.join(" ")).await;
        println!("{}", reply.content);
        return Ok(());
    }

    println!("/clear forgets the conversation, /quit exits");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/clear" => {
                store.clear_messages();
                println!("Conversation cleared");
            }
            prompt => {
                let reply = store.ask(prompt).await;
                println!("{}", reply.content);
            }
        }
    }

    info!("Chat ended with {} messages", store.snapshot().messages.len());
    Ok(())
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = AppConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show a profile, creating it with defaults if missing
pub fn manage_profile(profile_name: String) -> Result<()> {
    match AppConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", serde_yaml::to_string(&config)?);
        },
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = AppConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = AppConfig::load_default()?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}
