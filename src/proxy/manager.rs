use anyhow::{Result, Context};
use rand::{thread_rng, Rng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{Instant, Duration};
use tracing::debug;

use crate::cli::config::{ProxySettings, ProxyConfig};

/// Proxy rotation and lease tracking
pub struct ProxyManager {
    /// Proxy configuration
    config: ProxySettings,

    /// Currently active proxy
    current_proxy: Option<ProxyConfig>,

    /// Last rotation time
    last_rotation: Instant,

    /// Proxy status map (address -> working status)
    proxy_status: HashMap<String, bool>,

    /// Leases handed out and not yet dropped
    active_leases: Arc<AtomicUsize>,
}

/// Egress proxy held for the lifetime of one browser session
///
/// Dropping the lease releases it.
#[derive(Debug)]
pub struct ProxyLease {
    name: String,
    url: String,
    active_leases: Arc<AtomicUsize>,
}

impl ProxyLease {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for ProxyLease {
    fn drop(&mut self) {
        self.active_leases.fetch_sub(1, Ordering::SeqCst);
        debug!("Released proxy: {}", self.name);
    }
}

impl ProxyManager {
    /// Create a new proxy manager
    pub fn new(config: ProxySettings) -> Self {
        Self {
            config,
            current_proxy: None,
            last_rotation: Instant::now(),
            proxy_status: HashMap::new(),
            active_leases: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        debug!("Proxy usage {}", if enabled { "enabled" } else { "disabled" });
        self.config.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Number of leases currently held
    pub fn active_leases(&self) -> usize {
        self.active_leases.load(Ordering::SeqCst)
    }

    /// Acquire a proxy for one session; `None` when proxies are disabled
    pub fn acquire(&mut self) -> Result<Option<ProxyLease>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let (name, url) = if self.config.proxy_list.is_empty() {
            let seed = self.config.seed_endpoint.clone()
                .context("No proxies configured")?;
            ("seed".to_string(), seed)
        } else {
            let proxy = self.current()?;
            (proxy.name.clone(), proxy.url()?)
        };

        self.active_leases.fetch_add(1, Ordering::SeqCst);
        debug!("Leased proxy: {}", name);

        Ok(Some(ProxyLease {
            name,
            url,
            active_leases: self.active_leases.clone(),
        }))
    }

    /// Current proxy, rotating first when the strategy asks for it
    fn current(&mut self) -> Result<&ProxyConfig> {
        let should_rotate = match self.config.rotation_strategy.as_str() {
            "request" => true,
            "timed" => {
                let interval = self.config.rotation_interval.unwrap_or(600);
                self.last_rotation.elapsed() >= Duration::from_secs(interval)
            }
            "session" => self.current_proxy.is_none(),
            _ => true,
        };

        if should_rotate || self.current_proxy.is_none() {
            self.rotate_proxy()?;
        }

        self.current_proxy.as_ref().context("No proxies configured")
    }

    /// Rotate to a new proxy
    pub fn rotate_proxy(&mut self) -> Result<()> {
        if self.config.proxy_list.is_empty() {
            anyhow::bail!("No proxies configured");
        }

        let mut working: Vec<&ProxyConfig> = self.config.proxy_list.iter()
            .filter(|p| *self.proxy_status.get(&p.address).unwrap_or(&true))
            .collect();

        if working.is_empty() {
            // If no working proxies, reset and try again
            debug!("No working proxies found, resetting status");
            self.proxy_status.clear();
            working = self.config.proxy_list.iter().collect();
        }

        let new_proxy = working[thread_rng().gen_range(0..working.len())].clone();

        debug!("Rotated to proxy: {}", new_proxy.name);

        self.current_proxy = Some(new_proxy);
        self.last_rotation = Instant::now();

        Ok(())
    }

    /// Mark the current proxy as failed so the next acquisition avoids it
    pub fn mark_current_failed(&mut self) {
        if let Some(proxy) = self.current_proxy.take() {
            debug!("Marking proxy as failed: {}", proxy.name);
            self.proxy_status.insert(proxy.address, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(name: &str, address: &str) -> ProxyConfig {
        ProxyConfig {
            name: name.to_string(),
            proxy_type: "http".to_string(),
            address: address.to_string(),
            port: Some(3128),
            username: None,
            password: None,
        }
    }

    fn settings(list: Vec<ProxyConfig>) -> ProxySettings {
        ProxySettings {
            enabled: true,
            proxy_list: list,
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_yields_no_lease() {
        let mut manager = ProxyManager::new(ProxySettings::default());
        assert!(manager.acquire().unwrap().is_none());
        assert_eq!(manager.active_leases(), 0);
    }

    #[test]
    fn test_enabled_without_proxies_fails() {
        let mut manager = ProxyManager::new(settings(vec![]));
        let error = manager.acquire().unwrap_err();
        assert!(error.to_string().contains("No proxies configured"));
    }

    #[test]
    fn test_seed_endpoint_fallback() {
        let mut config = settings(vec![]);
        config.seed_endpoint = Some("http://seed.example:8000".to_string());
        let mut manager = ProxyManager::new(config);

        let lease = manager.acquire().unwrap().unwrap();
        assert_eq!(lease.url(), "http://seed.example:8000");
        assert_eq!(lease.name(), "seed");
    }

    #[test]
    fn test_leases_are_released_on_drop() {
        let mut manager = ProxyManager::new(settings(vec![proxy("a", "10.0.0.1")]));

        let first = manager.acquire().unwrap();
        let second = manager.acquire().unwrap();
        assert_eq!(manager.active_leases(), 2);

        drop(first);
        assert_eq!(manager.active_leases(), 1);
        drop(second);
        assert_eq!(manager.active_leases(), 0);
    }

    #[test]
    fn test_session_strategy_sticks_until_failure() {
        let mut manager = ProxyManager::new(settings(vec![proxy("a", "10.0.0.1"), proxy("b", "10.0.0.2")]));

        let first = manager.acquire().unwrap().unwrap().name().to_string();
        for _ in 0..5 {
            assert_eq!(manager.acquire().unwrap().unwrap().name(), first);
        }

        manager.mark_current_failed();
        let next = manager.acquire().unwrap().unwrap().name().to_string();
        assert_ne!(next, first);
    }

    #[test]
    fn test_all_failed_resets_pool() {
        let mut manager = ProxyManager::new(settings(vec![proxy("only", "10.0.0.9")]));

        manager.acquire().unwrap();
        manager.mark_current_failed();

        let lease = manager.acquire().unwrap().unwrap();
        assert_eq!(lease.url(), "http://10.0.0.9:3128");
    }
}
