use anyhow::Result;
use rand::{thread_rng, Rng};
use std::time::Duration;
use tokio::time::sleep;
use thirtyfour::prelude::*;
use tracing::debug;

use crate::cli::config::BrowserBehavior;

/// Human-like timing for interactions with page elements
pub struct BehaviorSimulator {
    /// Configuration for behavior simulation
    config: BrowserBehavior,
}

impl BehaviorSimulator {
    /// Create a new behavior simulator with the given configuration
    pub fn new(config: BrowserBehavior) -> Self {
        Self { config }
    }

    /// Click after a short reaction delay
    pub async fn click(&self, element: &WebElement) -> Result<()> {
        sleep(pause(self.config.click_delay)).await;

        element.scroll_into_view().await?;
        element.click().await?;

        Ok(())
    }

    /// Type text one character at a time
    pub async fn type_text(&self, element: &WebElement, text: &str) -> Result<()> {
        self.click(element).await?;
        element.clear().await?;

        for ch in text.chars() {
            let key = ch.to_string();
            element.send_keys(key.as_str()).await?;
            sleep(pause(self.config.typing_speed)).await;
        }

        debug!("Typed {} characters", text.chars().count());

        Ok(())
    }
}

/// Random duration within an inclusive millisecond range
///
/// The rng never lives across an await point.
fn pause((min, max): (u64, u64)) -> Duration {
    if max <= min {
        return Duration::from_millis(min);
    }
    Duration::from_millis(thread_rng().gen_range(min..=max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_within_range() {
        for _ in 0..100 {
            let delay = pause((50, 150));
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_pause_degenerate_range() {
        assert_eq!(pause((80, 80)), Duration::from_millis(80));
        assert_eq!(pause((200, 100)), Duration::from_millis(200));
    }
}
