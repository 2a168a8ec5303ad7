use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::activity::{Action, ActionDetails, ActionStatus, ActionType, ActivityLog};
use crate::browser::{AutomationSettings, BrowserLauncher, LaunchOptions, PageSession, WaitPolicy};
use crate::error::{ScrapeFailure, ScrapeStage};
use crate::proxy::ProxyManager;
use crate::scrape::data::{Heading, PageMetadata, ScrapeRequest, ScrapedData, HEADING_SELECTOR};
use crate::scrape::sinks::{Capture, Sink, SinkKind, SinkOutcome};

/// Page content read before the session is released
struct PageRead {
    markup: String,
    metadata: PageMetadata,
}

/// Runs one end-to-end scrape: proxy, browser, extraction, then sinks
pub struct Scraper {
    /// Browser launcher
    launcher: Arc<dyn BrowserLauncher>,

    /// Proxy manager shared with deployments
    proxies: Arc<Mutex<ProxyManager>>,

    /// Runtime browser settings
    settings: Arc<RwLock<AutomationSettings>>,

    /// Sinks in the order they run
    sinks: Vec<Arc<dyn Sink>>,

    /// Narration trail
    activity: ActivityLog,
}

impl Scraper {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        proxies: Arc<Mutex<ProxyManager>>,
        settings: Arc<RwLock<AutomationSettings>>,
        activity: ActivityLog,
    ) -> Self {
        Self {
            launcher,
            proxies,
            settings,
            sinks: Vec::new(),
            activity,
        }
    }

    /// Append a sink; sinks run in the order they were added
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Scrape `request.url` and hand the capture to every requested sink
    ///
    /// Emits one pending Action, then exactly one completed or failed
    /// Action. The browser session and proxy lease are released on every
    /// path. The first failing sink aborts the rest; its [`ScrapeFailure`]
    /// still carries the computed data.
    pub async fn scrape(&self, request: &ScrapeRequest) -> Result<ScrapedData, ScrapeFailure> {
        let url = &request.url;
        info!("Starting web scraping for {}", url);

        self.activity.append(
            Action::new(ActionType::Automation, format!("Starting web scraping for {}", url), &request.project_id)
                .with_status(ActionStatus::Pending)
                .with_details(ActionDetails::Scrape { url: url.clone() }),
        ).await;

        match self.run(request).await {
            Ok((data, sinks)) => {
                info!("Successfully scraped {}", url);
                self.activity.append(
                    Action::new(ActionType::Automation, format!("Successfully scraped {}", url), &request.project_id)
                        .with_status(ActionStatus::Completed)
                        .with_details(ActionDetails::ScrapeCompleted {
                            url: url.clone(),
                            metadata: data.metadata.clone(),
                            sinks,
                        }),
                ).await;

                Ok(data)
            }
            Err(failure) => {
                warn!("{} (stage: {})", failure, failure.stage);
                self.activity.append(
                    Action::new(ActionType::Error, failure.to_string(), &request.project_id)
                        .with_status(ActionStatus::Failed)
                        .with_details(ActionDetails::ScrapeFailed {
                            url: url.clone(),
                            stage: failure.stage.to_string(),
                            error: failure.message.clone(),
                        }),
                ).await;

                Err(failure)
            }
        }
    }

    async fn run(&self, request: &ScrapeRequest) -> Result<(ScrapedData, Vec<SinkOutcome>), ScrapeFailure> {
        let capture = self.capture(request).await?;

        let mut outcomes = Vec::new();
        for sink in self.sinks.iter().filter(|s| wants(request, s.kind())) {
            let kind = sink.kind();
            match sink.write(&capture).await {
                Ok(location) => {
                    debug!("{} sink wrote {}", kind, location);
                    outcomes.push(SinkOutcome { sink: kind, location });
                }
                Err(e) => {
                    return Err(ScrapeFailure::new(&request.url, ScrapeStage::Sink(kind), e)
                        .with_data(capture.data));
                }
            }
        }

        Ok((capture.data, outcomes))
    }

    /// Read the page, releasing the session and proxy before returning
    async fn capture(&self, request: &ScrapeRequest) -> Result<Capture, ScrapeFailure> {
        let url = &request.url;

        let lease = self.proxies.lock().await.acquire()
            .map_err(|e| ScrapeFailure::new(url, ScrapeStage::Proxy, e))?;
        if lease.is_none() {
            warn!("Scraping {} without an egress proxy; enable proxy.enabled to route through one", url);
        }

        let settings = self.settings.read().await.clone();
        let options = LaunchOptions {
            headless: settings.headless,
            proxy_url: lease.as_ref().map(|l| l.url().to_string()),
        };

        let mut session = self.launcher.launch(options).await
            .map_err(|e| ScrapeFailure::new(url, ScrapeStage::Launch, e))?;

        let read = read_page(session.as_mut(), url, settings.wait).await;

        if let Err(e) = session.close().await {
            warn!("Failed to close browser session: {:#}", e);
        }

        if let Err(failure) = &read {
            if failure.stage == ScrapeStage::Navigation && lease.is_some() {
                self.proxies.lock().await.mark_current_failed();
            }
        }
        drop(lease);

        let page = read?;
        Ok(Capture {
            project_id: request.project_id.clone(),
            data: ScrapedData::new(url, &page.markup, page.metadata),
            markup: page.markup,
        })
    }
}

async fn read_page(session: &mut dyn PageSession, url: &str, wait: WaitPolicy) -> Result<PageRead, ScrapeFailure> {
    session.goto(url, wait).await
        .map_err(|e| ScrapeFailure::new(url, ScrapeStage::Navigation, e))?;

    let extraction = |e| ScrapeFailure::new(url, ScrapeStage::Extraction, e);

    let title = session.title().await.map_err(extraction)?;
    let headers = session.query_all(HEADING_SELECTOR).await.map_err(extraction)?
        .into_iter()
        .map(Heading::from)
        .collect();
    let markup = session.content().await.map_err(extraction)?;

    Ok(PageRead {
        markup,
        metadata: PageMetadata { title, headers },
    })
}

fn wants(request: &ScrapeRequest, kind: SinkKind) -> bool {
    match kind {
        SinkKind::Remote => request.save_remote,
        SinkKind::Json => request.export_json,
        SinkKind::Pdf => request.export_pdf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{ElementSnapshot, MockBrowserLauncher, MockPageSession};
    use crate::cli::config::{ProxyConfig, ProxySettings};
    use crate::error::ServiceError;
    use crate::persistence::MockPersistenceService;
    use crate::scrape::sinks::{MockSink, RemoteSink};

    const URL: &str = "https://example.com";

    fn page_session() -> MockPageSession {
        let mut session = MockPageSession::new();
        session.expect_goto().returning(|_, _| Ok(()));
        session.expect_title().returning(|| Ok("Example Domain".to_string()));
        session.expect_query_all().returning(|_| Ok(vec![
            ElementSnapshot { text: "Example Domain".to_string(), tag: "h1".to_string() },
        ]));
        session.expect_content().returning(|| {
            Ok("<html><head><title>Example Domain</title></head><body><h1>Example Domain</h1></body></html>".to_string())
        });
        session.expect_close().times(1).returning(|| Ok(()));
        session
    }

    fn launcher(session: MockPageSession) -> MockBrowserLauncher {
        let mut launcher = MockBrowserLauncher::new();
        launcher.expect_launch()
            .times(1)
            .return_once(move |_| Ok(Box::new(session) as Box<dyn PageSession>));
        launcher
    }

    fn proxied() -> ProxySettings {
        ProxySettings {
            enabled: true,
            proxy_list: vec![ProxyConfig {
                name: "edge".to_string(),
                proxy_type: "http".to_string(),
                address: "10.1.1.1".to_string(),
                port: None,
                username: None,
                password: None,
            }],
            ..Default::default()
        }
    }

    fn scraper(launcher: MockBrowserLauncher, proxies: Arc<Mutex<ProxyManager>>, activity: ActivityLog) -> Scraper {
        let settings = AutomationSettings { headless: true, wait: WaitPolicy::Load };
        Scraper::new(Arc::new(launcher), proxies, Arc::new(RwLock::new(settings)), activity)
    }

    fn sink(kind: SinkKind, calls: usize) -> Arc<dyn Sink> {
        let mut sink = MockSink::new();
        sink.expect_kind().return_const(kind);
        sink.expect_write().times(calls).returning(move |_| Ok(format!("{}-location", kind)));
        Arc::new(sink)
    }

    fn completed(actions: &[Action]) -> Vec<&Action> {
        actions.iter().filter(|a| a.status == Some(ActionStatus::Completed)).collect()
    }

    fn failed(actions: &[Action]) -> Vec<&Action> {
        actions.iter().filter(|a| a.status == Some(ActionStatus::Failed)).collect()
    }

    #[tokio::test]
    async fn test_successful_scrape() {
        let activity = ActivityLog::new();
        let proxies = Arc::new(Mutex::new(ProxyManager::new(proxied())));
        let scraper = scraper(launcher(page_session()), proxies.clone(), activity.clone())
            .with_sink(sink(SinkKind::Remote, 1))
            .with_sink(sink(SinkKind::Json, 1))
            .with_sink(sink(SinkKind::Pdf, 1));

        let data = scraper.scrape(&ScrapeRequest::new(URL, "demo")).await.unwrap();

        assert_eq!(data.url, URL);
        assert_eq!(data.metadata.title, "Example Domain");
        assert_eq!(data.metadata.headers, vec![Heading { text: "Example Domain".to_string(), tag: "h1".to_string() }]);

        let actions = activity.for_project("demo").await;
        assert_eq!(actions[0].status, Some(ActionStatus::Pending));
        let done = completed(&actions);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].details.as_ref().and_then(|d| d.url()), Some(URL));
        assert!(failed(&actions).is_empty());

        match &done[0].details {
            Some(ActionDetails::ScrapeCompleted { sinks, .. }) => {
                let kinds: Vec<SinkKind> = sinks.iter().map(|s| s.sink).collect();
                assert_eq!(kinds, vec![SinkKind::Remote, SinkKind::Json, SinkKind::Pdf]);
            }
            other => panic!("unexpected details: {:?}", other),
        }

        assert_eq!(proxies.lock().await.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_fails_whole_scrape() {
        let activity = ActivityLog::new();
        let proxies = Arc::new(Mutex::new(ProxyManager::new(proxied())));

        let mut service = MockPersistenceService::new();
        service.expect_insert().returning(|table, _| Err(ServiceError::Persistence {
            table: table.to_string(),
            message: "row violates policy".to_string(),
        }));

        let scraper = scraper(launcher(page_session()), proxies.clone(), activity.clone())
            .with_sink(Arc::new(RemoteSink::new(Arc::new(service), "scraped_data")))
            .with_sink(sink(SinkKind::Json, 0))
            .with_sink(sink(SinkKind::Pdf, 0));

        let failure = scraper.scrape(&ScrapeRequest::new(URL, "demo")).await.unwrap_err();

        assert_eq!(failure.stage, ScrapeStage::Sink(SinkKind::Remote));
        assert!(failure.message.contains("row violates policy"));
        assert_eq!(failure.data.as_ref().map(|d| d.url.as_str()), Some(URL));

        let actions = activity.entries().await;
        assert!(completed(&actions).is_empty());
        let errors = failed(&actions);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ActionType::Error);
        assert!(errors[0].content.starts_with("Failed to scrape https://example.com"));

        assert_eq!(proxies.lock().await.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_navigation_failure_still_closes_session() {
        let mut session = MockPageSession::new();
        session.expect_goto().returning(|_, _| Err(anyhow::anyhow!("navigation timeout")));
        session.expect_title().times(0);
        session.expect_close().times(1).returning(|| Ok(()));

        let activity = ActivityLog::new();
        let proxies = Arc::new(Mutex::new(ProxyManager::new(proxied())));
        let scraper = scraper(launcher(session), proxies.clone(), activity.clone())
            .with_sink(sink(SinkKind::Json, 0));

        let failure = scraper.scrape(&ScrapeRequest::new(URL, "demo")).await.unwrap_err();

        assert_eq!(failure.stage, ScrapeStage::Navigation);
        assert!(failure.data.is_none());
        assert_eq!(failed(&activity.entries().await).len(), 1);
        assert_eq!(proxies.lock().await.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_proxy_failure_never_launches_browser() {
        let mut launcher = MockBrowserLauncher::new();
        launcher.expect_launch().times(0);

        let activity = ActivityLog::new();
        let settings = ProxySettings { enabled: true, ..Default::default() };
        let proxies = Arc::new(Mutex::new(ProxyManager::new(settings)));
        let scraper = scraper(launcher, proxies, activity.clone());

        let failure = scraper.scrape(&ScrapeRequest::new(URL, "demo")).await.unwrap_err();

        assert_eq!(failure.stage, ScrapeStage::Proxy);
        assert_eq!(failed(&activity.entries().await).len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_sinks_are_skipped() {
        let activity = ActivityLog::new();
        let proxies = Arc::new(Mutex::new(ProxyManager::new(ProxySettings::default())));
        let scraper = scraper(launcher(page_session()), proxies, activity.clone())
            .with_sink(sink(SinkKind::Remote, 0))
            .with_sink(sink(SinkKind::Json, 1))
            .with_sink(sink(SinkKind::Pdf, 0));

        let request = ScrapeRequest {
            save_remote: false,
            export_pdf: false,
            ..ScrapeRequest::new(URL, "demo")
        };

        assert!(scraper.scrape(&request).await.is_ok());
        assert_eq!(completed(&activity.entries().await).len(), 1);
    }

    #[tokio::test]
    async fn test_scrape_without_proxy_launches_direct() {
        let mut launcher = MockBrowserLauncher::new();
        let session = page_session();
        launcher.expect_launch()
            .withf(|options| options.proxy_url.is_none())
            .times(1)
            .return_once(move |_| Ok(Box::new(session) as Box<dyn PageSession>));

        let proxies = Arc::new(Mutex::new(ProxyManager::new(ProxySettings::default())));
        let scraper = scraper(launcher, proxies.clone(), ActivityLog::new());

        assert!(scraper.scrape(&ScrapeRequest::new(URL, "demo")).await.is_ok());
        assert!(!proxies.lock().await.is_enabled());
        assert_eq!(proxies.lock().await.active_leases(), 0);
    }
}
