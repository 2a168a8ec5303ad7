use anyhow::{Result, Context};
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use std::path::PathBuf;
use std::fs;
use std::sync::Mutex;

/// Filter directives for the requested verbosity
fn filter_directives(verbose: bool) -> [&'static str; 2] {
    if verbose {
        ["beryl_lens=debug", "warn"]
    } else {
        ["beryl_lens=info", "warn"]
    }
}

/// Initialize the logging system
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let mut env_filter = EnvFilter::from_default_env();
    for directive in filter_directives(verbose) {
        env_filter = env_filter.add_directive(directive.parse()?);
    }

    // Configure the logging format
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    let log_file = log_file.unwrap_or_else(default_log_file);

    // Create parent directory if necessary
    if let Some(parent) = log_file.parent() {
        fs::create_dir_all(parent)
            .context(format!("Failed to create log directory: {}", parent.display()))?;
    }

    let file = fs::File::create(&log_file)
        .context(format!("Failed to create log file: {}", log_file.display()))?;
    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Create a default log file path
pub fn default_log_file() -> PathBuf {
    let mut path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "beryl-lens", "beryl-lens") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from("./logs")
    };

    path.push("lens.log");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_parse() {
        for verbose in [true, false] {
            for directive in filter_directives(verbose) {
                assert!(directive.parse::<tracing_subscriber::filter::Directive>().is_ok());
            }
        }
        assert_eq!(filter_directives(true)[0], "beryl_lens=debug");
    }

    #[test]
    fn test_default_log_file_name() {
        assert!(default_log_file().ends_with("lens.log"));
    }
}
