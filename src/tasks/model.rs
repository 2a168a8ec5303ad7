use serde::{Serialize, Deserialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ValidationError;

/// DOM interaction performed by a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    #[default]
    Click,
    Type,
    Select,
    Submit,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Select => "select",
            ActionKind::Submit => "submit",
        };
        write!(f, "{}", name)
    }
}

/// One editable automation step of a sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the sequence
    pub id: Uuid,

    /// CSS selector of the target element
    pub selector: String,

    /// Interaction to perform on the element
    pub action: ActionKind,

    /// Text to type or option to select
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Fields to merge into an existing task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub selector: Option<String>,
    pub action: Option<ActionKind>,
    pub value: Option<String>,
}

/// Validated step ready to run against a page
///
/// Each variant carries exactly the fields its action needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Step {
    Click { selector: String },
    Type { selector: String, text: String },
    Select { selector: String, value: String },
    Submit { selector: String },
}

impl Task {
    /// Blank task with a fresh id and the default `click` action
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            selector: String::new(),
            action: ActionKind::default(),
            value: None,
        }
    }

    fn apply(&mut self, patch: TaskPatch) {
        if let Some(selector) = patch.selector {
            self.selector = selector;
        }
        if let Some(action) = patch.action {
            self.action = action;
        }
        if let Some(value) = patch.value {
            self.value = Some(value);
        }
    }

    /// Convert into an executable step
    pub fn to_step(&self) -> Result<Step, ValidationError> {
        let selector = self.selector.trim();
        if selector.is_empty() {
            return Err(ValidationError::EmptySelector);
        }
        let selector = selector.to_string();

        let value = || {
            self.value
                .clone()
                .ok_or(ValidationError::MissingValue(self.action))
        };

        Ok(match self.action {
            ActionKind::Click => Step::Click { selector },
            ActionKind::Submit => Step::Submit { selector },
            ActionKind::Type => Step::Type { selector, text: value()? },
            ActionKind::Select => Step::Select { selector, value: value()? },
        })
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl Step {
    pub fn selector(&self) -> &str {
        match self {
            Step::Click { selector }
            | Step::Type { selector, .. }
            | Step::Select { selector, .. }
            | Step::Submit { selector } => selector,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Step::Click { .. } => ActionKind::Click,
            Step::Type { .. } => ActionKind::Type,
            Step::Select { .. } => ActionKind::Select,
            Step::Submit { .. } => ActionKind::Submit,
        }
    }
}

/// Ordered task list; insertion order is execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskSequence {
    tasks: Vec<Task>,
}

impl TaskSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a blank task and return it
    pub fn create(&mut self) -> &Task {
        self.tasks.push(Task::new());
        &self.tasks[self.tasks.len() - 1]
    }

    /// Merge `patch` into the task with `id`; returns false if absent
    pub fn update(&mut self, id: Uuid, patch: TaskPatch) -> bool {
        match self.tasks.iter_mut().find(|task| task.id == id) {
            Some(task) => {
                task.apply(patch);
                true
            }
            None => false,
        }
    }

    /// Remove the task with `id`; returns false if absent
    pub fn delete(&mut self, id: Uuid) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.id != id);
        self.tasks.len() != before
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
