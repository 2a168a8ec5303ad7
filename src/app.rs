use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::assistant::{Assistant, GeminiClient};
use crate::browser::{AutomationSettings, BrowserLauncher, RemoteBrowserService, WebDriverLauncher};
use crate::cli::config::AppConfig;
use crate::commands::{BrowserAutomation, CommandEngine};
use crate::activity::ActivityLog;
use crate::persistence::PersistenceFactory;
use crate::proxy::ProxyManager;
use crate::scrape::{JsonExportSink, PdfExportSink, RemoteSink, Scraper};
use crate::store::AppStore;

/// Wires collaborators, engine and store together
pub struct App {
    config: AppConfig,
    engine: Arc<CommandEngine>,
    store: AppStore,
}

impl App {
    /// Build the application for one project
    pub async fn new(config: AppConfig, project_id: &str) -> Result<Self> {
        let activity = ActivityLog::new();

        // Runtime browser settings, shared by deployments and scrapes
        let settings = Arc::new(RwLock::new(AutomationSettings::from(&config.browser)));
        let proxies = Arc::new(Mutex::new(ProxyManager::new(config.proxy.clone())));
        let launcher: Arc<dyn BrowserLauncher> = Arc::new(WebDriverLauncher::new(config.browser.clone()));

        let mut scraper = Scraper::new(launcher.clone(), proxies.clone(), settings.clone(), activity.clone());
        if let Some(service) = PersistenceFactory::create(&config.persistence).await? {
            scraper = scraper.with_sink(Arc::new(RemoteSink::new(service, &config.persistence.scraped_table)));
        }
        let renderer = Arc::new(RemoteBrowserService::new(&config.export.pdf_service_url)?);
        let scraper = scraper
            .with_sink(Arc::new(JsonExportSink::new(&config.export.output_dir)))
            .with_sink(Arc::new(PdfExportSink::new(renderer, &config.export.output_dir)));

        let backend = Arc::new(BrowserAutomation::new(launcher, proxies, settings, Arc::new(scraper)));
        let engine = Arc::new(CommandEngine::new(backend));

        let assistant: Option<Arc<dyn Assistant>> = match GeminiClient::new(&config.assistant) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                debug!("Assistant disabled: {:#}", e);
                None
            }
        };

        let store = AppStore::new(engine.clone(), activity, project_id, assistant).await;

        info!("Application ready for project {}", project_id);

        Ok(Self {
            config,
            engine,
            store,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<CommandEngine> {
        &self.engine
    }

    pub fn store(&self) -> &AppStore {
        &self.store
    }
}
