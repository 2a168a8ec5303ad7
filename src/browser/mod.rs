pub mod behavior;
pub mod fingerprint;
pub mod remote;
pub mod session;

// Re-export common types
pub use remote::RemoteBrowserService;
pub use session::{
    AutomationSettings, BrowserLauncher, ElementSnapshot, LaunchOptions, PageSession,
    WaitPolicy, WebDriverLauncher,
};

#[cfg(test)]
pub use session::{MockBrowserLauncher, MockPageSession};
