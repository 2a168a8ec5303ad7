pub mod backend;
pub mod command;
pub mod engine;

pub use backend::BrowserAutomation;
pub use command::{Command, CommandStatus, CommandType, ConfigureParams, DeployOptions};
pub use engine::{CommandEngine, CommandSubscription};
