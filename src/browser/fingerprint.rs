use anyhow::Result;
use rand::{thread_rng, Rng};
use tracing::debug;

use crate::cli::config::BrowserFingerprint;

/// Picks the identity a launched browser presents
pub struct FingerprintManager {
    /// Available fingerprints to use
    fingerprints: Vec<BrowserFingerprint>,
}

impl FingerprintManager {
    /// Create a new fingerprint manager with the given fingerprints
    pub fn new(fingerprints: Vec<BrowserFingerprint>) -> Self {
        Self { fingerprints }
    }

    /// Select a random fingerprint
    pub fn random_fingerprint(&self) -> Result<&BrowserFingerprint> {
        if self.fingerprints.is_empty() {
            anyhow::bail!("No fingerprints available");
        }

        let index = thread_rng().gen_range(0..self.fingerprints.len());
        let fingerprint = &self.fingerprints[index];
        debug!("Selected fingerprint: {}", fingerprint.name);

        Ok(fingerprint)
    }
}

/// Chrome switches presenting `fingerprint` and hiding automation markers
pub fn chrome_args(fingerprint: &BrowserFingerprint, proxy_url: Option<&str>) -> Vec<String> {
    let language = fingerprint.accept_language
        .split(',')
        .next()
        .unwrap_or("en-US");

    let mut args = vec![
        format!("--user-agent={}", fingerprint.user_agent),
        format!("--lang={}", language),
        format!("--window-size={},{}", fingerprint.viewport.width, fingerprint.viewport.height),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--no-sandbox".to_string(),
    ];

    if let Some(proxy) = proxy_url {
        args.push(format!("--proxy-server={}", proxy));
    }

    args
}
