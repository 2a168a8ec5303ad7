use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use tracing::{info, debug, error};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub persistence: PersistenceSettings,
    #[serde(default)]
    pub export: ExportSettings,
    #[serde(default)]
    pub assistant: AssistantSettings,
    #[serde(default)]
    pub project: ProjectSettings,
}

/// Browser automation settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BrowserSettings {
    /// WebDriver endpoint sessions are opened against
    pub webdriver_url: String,
    pub headless: bool,
    pub page_load_timeout_secs: u64,
    pub network_idle: NetworkIdleSettings,
    pub fingerprints: Vec<BrowserFingerprint>,
    pub behavior: BrowserBehavior,
}

/// When a page counts as loaded
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct NetworkIdleSettings {
    /// Quiet period without new network requests, in milliseconds
    pub window_ms: u64,
    /// Give up waiting after this many milliseconds
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

/// Browser viewport settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Identity presented by a launched browser
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BrowserFingerprint {
    pub name: String,
    pub user_agent: String,
    pub accept_language: String,
    pub viewport: Viewport,
}

/// Human-like timing for executed steps
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BrowserBehavior {
    pub click_delay: (u64, u64),  // Min and max delay in milliseconds
    pub typing_speed: (u64, u64), // Min and max milliseconds per character
}

/// Proxy settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ProxySettings {
    pub enabled: bool,
    pub rotation_strategy: String, // "session", "request", "timed"
    pub rotation_interval: Option<u64>, // Seconds between rotations if using "timed"
    /// Upstream used when the proxy list is empty
    pub seed_endpoint: Option<String>,
    pub proxy_list: Vec<ProxyConfig>,
}

/// Individual proxy configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProxyConfig {
    pub name: String,
    pub proxy_type: String, // "http", "socks5"
    pub address: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Remote persistence settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PersistenceSettings {
    pub backend: String, // "supabase", "postgresql", "none"
    /// Supabase project URL or PostgreSQL connection string
    pub url: String,
    pub api_key: Option<String>,
    pub schema_name: String,
    pub scraped_table: String,
}

/// File export settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
    /// Browser service that renders HTML to PDF
    pub pdf_service_url: String,
}

/// AI assistant settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AssistantSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
}

/// Project defaults
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ProjectSettings {
    pub default_project: String,
    /// Where project task files are kept
    pub data_dir: PathBuf,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".to_string(),
            headless: true,
            page_load_timeout_secs: 30,
            network_idle: NetworkIdleSettings::default(),
            fingerprints: vec![
                BrowserFingerprint {
                    name: "windows_chrome".to_string(),
                    user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                    accept_language: "en-US,en;q=0.9".to_string(),
                    viewport: Viewport { width: 1920, height: 1080 },
                },
                BrowserFingerprint {
                    name: "mac_chrome".to_string(),
                    user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                    accept_language: "en-GB,en;q=0.8".to_string(),
                    viewport: Viewport { width: 1440, height: 900 },
                },
            ],
            behavior: BrowserBehavior::default(),
        }
    }
}

impl Default for NetworkIdleSettings {
    fn default() -> Self {
        Self {
            window_ms: 500,
            timeout_ms: 30_000,
            poll_interval_ms: 100,
        }
    }
}

impl Default for BrowserBehavior {
    fn default() -> Self {
        Self {
            click_delay: (100, 300),
            typing_speed: (50, 150),
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            rotation_strategy: "session".to_string(),
            rotation_interval: Some(600),
            seed_endpoint: None,
            proxy_list: vec![],
        }
    }
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            backend: "none".to_string(),
            url: String::new(),
            api_key: None,
            schema_name: "public".to_string(),
            scraped_table: "scraped_data".to_string(),
        }
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./exports"),
            pdf_service_url: "http://localhost:5000".to_string(),
        }
    }
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-pro".to_string(),
            api_key: None,
        }
    }
}

impl Default for ProjectSettings {
    fn default() -> Self {
        let data_dir = match directories::ProjectDirs::from("com", "beryl-lens", "beryl-lens") {
            Some(proj_dirs) => proj_dirs.data_dir().to_path_buf(),
            None => PathBuf::from("./data"),
        };

        Self {
            default_project: "default".to_string(),
            data_dir,
        }
    }
}

impl ProxyConfig {
    /// Proxy URL in the form browsers and HTTP clients accept
    pub fn url(&self) -> Result<String> {
        let (scheme, default_port) = match self.proxy_type.as_str() {
            "http" => ("http", 8080),
            "socks5" => ("socks5", 1080),
            other => anyhow::bail!("Unsupported proxy type: {}", other),
        };
        let port = self.port.unwrap_or(default_port);

        Ok(match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                format!("{}://{}:{}@{}:{}", scheme, username, password, self.address, port)
            }
            _ => format!("{}://{}:{}", scheme, self.address, port),
        })
    }
}

impl AppConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "beryl-lens", "beryl-lens") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        // Create the profiles directory if it doesn't exist
        path.push("profiles");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        // Move back up to the config directory
        path.pop();
        path
    }

    /// Load the default configuration, creating it on first use
    pub fn load_default() -> Result<Self> {
        let config_path = Self::config_dir().join("default.yaml");

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_to_file(&config_path)?;
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let profile_path = Self::config_dir().join("profiles").join(format!("{}.yaml", profile));

        if !profile_path.exists() {
            anyhow::bail!("Profile '{}' not found", profile)
        }

        let mut config = Self::load_from_file(&profile_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Secrets and endpoints coming from the environment win over the file
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("WEBDRIVER_URL") {
            self.browser.webdriver_url = url;
        }
        if let Some(url) = lookup("BROWSER_SERVICE_URL") {
            self.export.pdf_service_url = url;
        }
        if let Some(key) = lookup("GEMINI_API_KEY") {
            self.assistant.api_key = Some(key);
        }

        match self.persistence.backend.as_str() {
            "supabase" => {
                if let Some(url) = lookup("SUPABASE_URL") {
                    self.persistence.url = url;
                }
                if let Some(key) = lookup("SUPABASE_ANON_KEY") {
                    self.persistence.api_key = Some(key);
                }
            }
            "postgresql" => {
                if let Some(url) = lookup("DATABASE_URL") {
                    self.persistence.url = url;
                }
            }
            _ => {}
        }
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let profile_path = Self::config_dir().join("profiles").join(format!("{}.yaml", profile));
        self.save_to_file(&profile_path)
    }

    /// Save the configuration to a file
    fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let profiles_dir = Self::config_dir().join("profiles");

        if !profiles_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(profiles_dir)? {
            let path = entry?.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_survives_yaml() {
        let config = AppConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let yaml = "proxy:\n  enabled: true\n  seed_endpoint: http://seed.example:3128\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(config.proxy.enabled);
        assert_eq!(config.proxy.rotation_strategy, "session");
        assert_eq!(config.browser.network_idle.window_ms, 500);
        assert_eq!(config.persistence.scraped_table, "scraped_data");
    }

    #[test]
    fn test_env_overrides_follow_backend() {
        let mut config = AppConfig::default();
        config.persistence.backend = "supabase".to_string();

        config.apply_overrides(|key| match key {
            "SUPABASE_URL" => Some("https://abc.supabase.co".to_string()),
            "SUPABASE_ANON_KEY" => Some("anon".to_string()),
            "DATABASE_URL" => Some("postgres://ignored".to_string()),
            _ => None,
        });

        assert_eq!(config.persistence.url, "https://abc.supabase.co");
        assert_eq!(config.persistence.api_key.as_deref(), Some("anon"));
    }

    #[test]
    fn test_proxy_url() {
        let mut proxy = ProxyConfig {
            name: "p1".to_string(),
            proxy_type: "socks5".to_string(),
            address: "10.0.0.2".to_string(),
            port: None,
            username: None,
            password: None,
        };
        assert_eq!(proxy.url().unwrap(), "socks5://10.0.0.2:1080");

        proxy.proxy_type = "http".to_string();
        proxy.username = Some("u".to_string());
        proxy.password = Some("p".to_string());
        proxy.port = Some(3128);
        assert_eq!(proxy.url().unwrap(), "http://u:p@10.0.0.2:3128");

        proxy.proxy_type = "vpn".to_string();
        assert!(proxy.url().is_err());
    }
}
