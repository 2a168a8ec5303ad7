pub mod log;

pub use log::{Action, ActionDetails, ActionStatus, ActionType, ActivityLog};
