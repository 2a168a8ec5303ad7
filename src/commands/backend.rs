use anyhow::{Result, Context};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{AutomationSettings, BrowserLauncher, LaunchOptions, PageSession, WaitPolicy};
use crate::commands::command::{ConfigureParams, DeployOptions};
use crate::proxy::{ProxyLease, ProxyManager};
use crate::scrape::{ScrapeRequest, Scraper};
use crate::tasks::Task;

/// Timeout used when network-idle waiting is first switched on at runtime
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(100);

/// Executes the body of each command type
///
/// Every method returns the human-readable output recorded on the
/// completed command.
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    async fn deploy(&self, url: &str, options: &DeployOptions) -> Result<String>;

    async fn stop(&self) -> Result<String>;

    async fn execute(&self, task: &Task) -> Result<String>;

    async fn scout(&self, request: &ScrapeRequest) -> Result<String>;

    async fn configure(&self, params: &ConfigureParams) -> Result<String>;
}

/// Browser the agent is currently deployed on
struct Deployment {
    session: Box<dyn PageSession>,

    /// Held until the deployment ends
    _lease: Option<ProxyLease>,

    url: String,
}

/// Production backend driving real browser sessions
pub struct BrowserAutomation {
    launcher: Arc<dyn BrowserLauncher>,
    proxies: Arc<Mutex<ProxyManager>>,
    settings: Arc<RwLock<AutomationSettings>>,
    scraper: Arc<Scraper>,

    /// At most one deployment at a time
    active: Mutex<Option<Deployment>>,
}

impl BrowserAutomation {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        proxies: Arc<Mutex<ProxyManager>>,
        settings: Arc<RwLock<AutomationSettings>>,
        scraper: Arc<Scraper>,
    ) -> Self {
        Self {
            launcher,
            proxies,
            settings,
            scraper,
            active: Mutex::new(None),
        }
    }
}

fn validate_target(url: &str) -> Result<()> {
    let parsed = Url::parse(url).context(format!("Invalid target URL: {}", url))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => anyhow::bail!("Unsupported URL scheme '{}': {}", other, url),
    }
}

#[async_trait]
impl AutomationBackend for BrowserAutomation {
    async fn deploy(&self, url: &str, options: &DeployOptions) -> Result<String> {
        validate_target(url)?;

        let mut active = self.active.lock().await;
        if let Some(mut previous) = active.take() {
            info!("Replacing deployment on {}", previous.url);
            if let Err(e) = previous.session.close().await {
                warn!("Failed to close previous browser session: {:#}", e);
            }
        }

        let lease = self.proxies.lock().await.acquire()?;
        let settings = self.settings.read().await.clone();

        let launch = LaunchOptions {
            headless: options.headless.unwrap_or(settings.headless),
            proxy_url: lease.as_ref().map(|l| l.url().to_string()),
        };
        let mut session = self.launcher.launch(launch).await
            .context("Failed to launch browser")?;

        if let Err(e) = session.goto(url, settings.wait).await {
            if let Err(close_err) = session.close().await {
                warn!("Failed to close browser session: {:#}", close_err);
            }
            if lease.is_some() {
                self.proxies.lock().await.mark_current_failed();
            }
            return Err(e.context(format!("Failed to deploy to {}", url)));
        }

        info!("Deployed to {}", url);
        *active = Some(Deployment {
            session,
            _lease: lease,
            url: url.to_string(),
        });

        Ok(format!("Successfully deployed to {}", url))
    }

    async fn stop(&self) -> Result<String> {
        let deployment = self.active.lock().await.take();

        match deployment {
            Some(mut deployment) => {
                deployment.session.close().await
                    .context(format!("Failed to stop deployment on {}", deployment.url))?;
                info!("Stopped deployment on {}", deployment.url);
                Ok("Successfully stopped all processes".to_string())
            }
            None => {
                debug!("Stop requested with nothing deployed");
                Ok("Nothing to stop".to_string())
            }
        }
    }

    async fn execute(&self, task: &Task) -> Result<String> {
        let step = task.to_step()?;

        let mut active = self.active.lock().await;
        let deployment = active.as_mut()
            .context("No active deployment; deploy before executing tasks")?;

        deployment.session.perform(&step).await
            .context(format!("Failed to {} {}", step.kind(), step.selector()))?;

        Ok(format!("Successfully executed {} on {}", step.kind(), step.selector()))
    }

    async fn scout(&self, request: &ScrapeRequest) -> Result<String> {
        let data = self.scraper.scrape(request).await?;

        Ok(format!(
            "Successfully scraped {} (title: \"{}\", {} headings)",
            data.url,
            data.metadata.title,
            data.metadata.headers.len()
        ))
    }

    async fn configure(&self, params: &ConfigureParams) -> Result<String> {
        let mut settings = self.settings.write().await;

        if let Some(headless) = params.headless {
            settings.headless = headless;
        }

        if let Some(ms) = params.network_idle_ms {
            let window = Duration::from_millis(ms);
            settings.wait = match settings.wait {
                _ if ms == 0 => WaitPolicy::Load,
                WaitPolicy::NetworkIdle { timeout, poll, .. } => WaitPolicy::NetworkIdle { window, timeout, poll },
                WaitPolicy::Load => WaitPolicy::NetworkIdle {
                    window,
                    timeout: DEFAULT_IDLE_TIMEOUT,
                    poll: DEFAULT_IDLE_POLL,
                },
            };
        }
        let summary = format!("headless={}, wait={:?}", settings.headless, settings.wait);
        drop(settings);

        let mut proxies = self.proxies.lock().await;
        if let Some(enabled) = params.proxy_enabled {
            proxies.set_enabled(enabled);
        }

        Ok(format!("Configuration updated ({}, proxy={})", summary, proxies.is_enabled()))
    }
}
