pub mod manager;

pub use manager::{ProxyLease, ProxyManager};
