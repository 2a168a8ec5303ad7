pub mod model;
pub mod project;

// Re-export common types
pub use model::{ActionKind, Step, Task, TaskPatch, TaskSequence};
pub use project::ProjectFile;
