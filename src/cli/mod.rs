pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use crate::commands::ConfigureParams;
use crate::tasks::ActionKind;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to this file as well
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Configuration profile to use instead of the default
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy to the target page, run the project's tasks, then stop
    Run {
        /// Project whose task sequence to run
        #[arg(required = true)]
        project: String,

        /// Target URL (defaults to the project's saved target)
        #[arg(short, long)]
        url: Option<String>,

        /// Show the browser window
        #[arg(long)]
        headed: bool,

        /// Quiet period that counts as page loaded; 0 waits for the load event only
        #[arg(long, value_name = "MS")]
        network_idle_ms: Option<u64>,

        /// Connect without the proxy pool
        #[arg(long)]
        direct: bool,
    },

    /// Scrape a page and store the capture
    Scrape {
        /// Page to scrape
        #[arg(required = true)]
        url: String,

        /// Project the capture belongs to
        #[arg(long)]
        project: Option<String>,

        /// Skip the remote store
        #[arg(long)]
        no_remote: bool,

        /// Skip the JSON export
        #[arg(long)]
        no_json: bool,

        /// Skip the PDF export
        #[arg(long)]
        no_pdf: bool,
    },

    /// Edit a project's task sequence
    Tasks {
        #[arg(required = true)]
        project: String,

        #[command(subcommand)]
        action: TaskAction,
    },

    /// Ask the assistant; without a prompt, read questions from stdin
    Chat {
        prompt: Vec<String>,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false, value_name = "PROFILE")]
        name: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

#[derive(Subcommand)]
pub enum TaskAction {
    /// Show the sequence in execution order
    List,

    /// Append a task
    Add {
        /// CSS selector of the target element
        #[arg(short, long, default_value = "")]
        selector: String,

        /// click, type, select or submit
        #[arg(short, long, default_value = "click", value_parser = parse_action)]
        action: ActionKind,

        /// Text to type or option to select
        #[arg(long)]
        value: Option<String>,
    },

    /// Change fields of a task
    Update {
        id: Uuid,

        #[arg(short, long)]
        selector: Option<String>,

        #[arg(short, long, value_parser = parse_action)]
        action: Option<ActionKind>,

        #[arg(long)]
        value: Option<String>,
    },

    /// Delete a task
    Remove {
        id: Uuid,
    },

    /// Set the page the sequence runs against
    Target {
        url: String,
    },
}

fn parse_action(value: &str) -> Result<ActionKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "click" => Ok(ActionKind::Click),
        "type" => Ok(ActionKind::Type),
        "select" => Ok(ActionKind::Select),
        "submit" => Ok(ActionKind::Submit),
        other => Err(format!("unknown action '{}' (expected click, type, select or submit)", other)),
    }
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    let profile = cli.profile.as_deref();

    match cli.command {
        Commands::Run { project, url, headed, network_idle_ms, direct } => {
            info!("Running project {}", project);
            let config = commands::load_config(profile)?;
            let params = ConfigureParams {
                headless: headed.then_some(false),
                network_idle_ms,
                proxy_enabled: direct.then_some(false),
            };
            commands::run(config, project, url, params).await
        },
        Commands::Scrape { url, project, no_remote, no_json, no_pdf } => {
            info!("Scraping {}", url);
            let config = commands::load_config(profile)?;
            commands::scrape(config, url, project, !no_remote, !no_json, !no_pdf).await
        },
        Commands::Tasks { project, action } => {
            let config = commands::load_config(profile)?;
            commands::tasks(config, project, action).await
        },
        Commands::Chat { prompt } => {
            let config = commands::load_config(profile)?;
            commands::chat(config, prompt).await
        },
        Commands::Config { name, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles()
            } else if let Some(profile_name) = name {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name)
            } else {
                info!("Showing current configuration");
                commands::show_config()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn test_parse_scrape_flags() {
        let cli = Cli::try_parse_from([
            "lens", "--verbose", "scrape", "https://example.com", "--project", "demo", "--no-pdf",
        ]).unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Scrape { url, project, no_remote, no_json, no_pdf } => {
                assert_eq!(url, "https://example.com");
                assert_eq!(project.as_deref(), Some("demo"));
                assert!(!no_remote && !no_json && no_pdf);
            }
            _ => panic!("expected scrape"),
        }
    }

    #[test]
    fn test_parse_run_runtime_flags() {
        let cli = Cli::try_parse_from([
            "lens", "run", "demo", "--headed", "--network-idle-ms", "500", "--direct",
        ]).unwrap();

        match cli.command {
            Commands::Run { project, url, headed, network_idle_ms, direct } => {
                assert_eq!(project, "demo");
                assert!(url.is_none());
                assert!(headed && direct);
                assert_eq!(network_idle_ms, Some(500));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_chat_without_prompt() {
        let cli = Cli::try_parse_from(["lens", "chat"]).unwrap();
        assert!(matches!(cli.command, Commands::Chat { prompt } if prompt.is_empty()));
    }

    #[test]
    fn test_parse_task_add() {
        let cli = Cli::try_parse_from([
            "lens", "tasks", "demo", "add", "--selector", "#q", "--action", "type", "--value", "rust",
        ]).unwrap();

        match cli.command {
            Commands::Tasks { project, action: TaskAction::Add { selector, action, value } } => {
                assert_eq!(project, "demo");
                assert_eq!(selector, "#q");
                assert_eq!(action, ActionKind::Type);
                assert_eq!(value.as_deref(), Some("rust"));
            }
            _ => panic!("expected tasks add"),
        }

        assert!(Cli::try_parse_from(["lens", "tasks", "demo", "add", "--action", "hover"]).is_err());
    }
}
