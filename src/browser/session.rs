use anyhow::{Result, Context};
use async_trait::async_trait;
use futures::future;
use serde::{Serialize, Deserialize};
use thirtyfour::prelude::*;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error};

use crate::browser::behavior::BehaviorSimulator;
use crate::browser::fingerprint::{chrome_args, FingerprintManager};
use crate::cli::config::{BrowserSettings, NetworkIdleSettings};
use crate::tasks::Step;

/// Reports readiness and the number of resource requests issued so far
const NETWORK_PROBE_SCRIPT: &str =
    "return [document.readyState, performance.getEntriesByType('resource').length];";

/// How long `goto` waits before the page counts as loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Return once the navigation itself finished
    Load,

    /// Wait until no new requests were issued for `window`
    NetworkIdle {
        window: Duration,
        timeout: Duration,
        poll: Duration,
    },
}

impl From<&NetworkIdleSettings> for WaitPolicy {
    fn from(settings: &NetworkIdleSettings) -> Self {
        WaitPolicy::NetworkIdle {
            window: Duration::from_millis(settings.window_ms),
            timeout: Duration::from_millis(settings.timeout_ms),
            poll: Duration::from_millis(settings.poll_interval_ms),
        }
    }
}

/// Runtime knobs shared by deployments and scrapes
///
/// Changed at runtime by `configure` commands.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationSettings {
    pub headless: bool,
    pub wait: WaitPolicy,
}

impl From<&BrowserSettings> for AutomationSettings {
    fn from(settings: &BrowserSettings) -> Self {
        Self {
            headless: settings.headless,
            wait: WaitPolicy::from(&settings.network_idle),
        }
    }
}

/// Options for launching one isolated browser session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub headless: bool,
    pub proxy_url: Option<String>,
}

/// Text and lowercase tag name of a matched element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub text: String,
    pub tag: String,
}

/// Starts browser sessions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn PageSession>>;
}

/// Exclusively owned handle on one browser page
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn goto(&mut self, url: &str, wait: WaitPolicy) -> Result<()>;

    async fn content(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    /// Every element matching a CSS selector, in document order
    async fn query_all(&self, selector: &str) -> Result<Vec<ElementSnapshot>>;

    async fn perform(&mut self, step: &Step) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Launches Chrome sessions on a WebDriver endpoint
pub struct WebDriverLauncher {
    /// Browser settings
    config: BrowserSettings,

    /// Fingerprint manager
    fingerprint_manager: FingerprintManager,
}

impl WebDriverLauncher {
    pub fn new(config: BrowserSettings) -> Self {
        let fingerprint_manager = FingerprintManager::new(config.fingerprints.clone());

        Self {
            config,
            fingerprint_manager,
        }
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn PageSession>> {
        let fingerprint = self.fingerprint_manager.random_fingerprint()?;

        let mut caps = DesiredCapabilities::chrome();
        for arg in chrome_args(fingerprint, options.proxy_url.as_deref()) {
            caps.add_chrome_arg(&arg)?;
        }

        if options.headless {
            caps.set_headless()?;
        }

        caps.add_chrome_option("excludeSwitches", serde_json::json!(["enable-automation"]))?;
        caps.add_chrome_option("useAutomationExtension", false)?;

        let driver = WebDriver::new(&self.config.webdriver_url, caps).await
            .context("Failed to connect to WebDriver")?;

        driver.set_page_load_timeout(Duration::from_secs(self.config.page_load_timeout_secs)).await?;

        debug!("Browser session launched with fingerprint: {}", fingerprint.name);

        Ok(Box::new(WebDriverSession {
            driver: Some(driver),
            behavior: BehaviorSimulator::new(self.config.behavior.clone()),
        }))
    }
}

/// Browser session backed by a WebDriver connection
pub struct WebDriverSession {
    /// WebDriver instance, `None` once closed
    driver: Option<WebDriver>,

    /// Behavior simulator
    behavior: BehaviorSimulator,
}

impl WebDriverSession {
    fn driver(&self) -> Result<&WebDriver> {
        self.driver.as_ref().context("Browser session already closed")
    }

    async fn wait_for_network_idle(&self, window: Duration, timeout: Duration, poll: Duration) -> Result<()> {
        let driver = self.driver()?;
        let deadline = Instant::now() + timeout;
        let mut tracker = IdleTracker::new(window);

        loop {
            let ret = driver.execute(NETWORK_PROBE_SCRIPT, Vec::new()).await
                .context("Failed to probe network activity")?;
            let (ready_state, requests): (String, u64) = serde_json::from_value(ret.json().clone())
                .context("Unexpected network probe result")?;

            let now = Instant::now();
            if tracker.observe(ready_state == "complete", requests, now) {
                debug!("Network idle after {} requests", requests);
                return Ok(());
            }
            if now >= deadline {
                anyhow::bail!("Timed out after {:?} waiting for network idle", timeout);
            }

            sleep(poll).await;
        }
    }
}

#[async_trait]
impl PageSession for WebDriverSession {
    async fn goto(&mut self, url: &str, wait: WaitPolicy) -> Result<()> {
        debug!("Navigating to: {}", url);
        self.driver()?.goto(url).await
            .context(format!("Failed to navigate to URL: {}", url))?;

        if let WaitPolicy::NetworkIdle { window, timeout, poll } = wait {
            self.wait_for_network_idle(window, timeout, poll).await?;
        }

        Ok(())
    }

    async fn content(&self) -> Result<String> {
        let source = self.driver()?.source().await
            .context("Failed to get page source")?;

        Ok(source)
    }

    async fn title(&self) -> Result<String> {
        let title = self.driver()?.title().await
            .context("Failed to get page title")?;

        Ok(title)
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ElementSnapshot>> {
        let elements = self.driver()?.find_all(By::Css(selector)).await
            .context(format!("Failed to query elements: {}", selector))?;

        let snapshots = future::try_join_all(elements.iter().map(|element| async move {
            Ok::<_, anyhow::Error>(ElementSnapshot {
                text: element.text().await?.trim().to_string(),
                tag: element.tag_name().await?.to_lowercase(),
            })
        }))
        .await?;

        Ok(snapshots)
    }

    async fn perform(&mut self, step: &Step) -> Result<()> {
        let driver = self.driver()?;
        let element = driver.find(By::Css(step.selector())).await
            .context(format!("Element not found: {}", step.selector()))?;

        match step {
            Step::Click { .. } => self.behavior.click(&element).await?,
            Step::Type { text, .. } => self.behavior.type_text(&element, text).await?,
            Step::Select { value, .. } => {
                driver.execute(
                    "arguments[0].value = arguments[1]; \
                     arguments[0].dispatchEvent(new Event('change', { bubbles: true }));",
                    vec![element.to_json()?, serde_json::json!(value)],
                ).await
                .context(format!("Failed to select '{}'", value))?;
            }
            Step::Submit { .. } => {
                driver.execute(
                    "const el = arguments[0]; \
                     if (el.form) { el.form.requestSubmit(); } else { el.click(); }",
                    vec![element.to_json()?],
                ).await
                .context("Failed to submit form")?;
            }
        }

        debug!("Performed {} on {}", step.kind(), step.selector());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(driver) = self.driver.take() {
            driver.quit().await
                .context("Error closing browser session")?;
            debug!("Browser session closed");
        }

        Ok(())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            // Spawn a task to quit the driver
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = driver.quit().await {
                        error!("Error closing browser session during drop: {}", e);
                    }
                });
            }
        }
    }
}

/// Decides when the page went quiet long enough
struct IdleTracker {
    window: Duration,
    last_count: Option<u64>,
    quiet_since: Option<Instant>,
}

impl IdleTracker {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last_count: None,
            quiet_since: None,
        }
    }

    /// Feed one probe; true once idle
    fn observe(&mut self, ready: bool, requests: u64, now: Instant) -> bool {
        if !ready || self.last_count != Some(requests) {
            self.last_count = Some(requests);
            self.quiet_since = if ready { Some(now) } else { None };
            return false;
        }

        match self.quiet_since {
            Some(since) => now.duration_since(since) >= self.window,
            None => {
                self.quiet_since = Some(now);
                false
            }
        }
    }
}
