use anyhow::{Result, Context};
use serde::{Serialize, Deserialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::tasks::model::TaskSequence;

/// Task sequence of one project as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub project_id: String,

    /// Page the sequence runs against
    #[serde(default)]
    pub target_url: Option<String>,

    #[serde(default)]
    pub tasks: TaskSequence,
}

impl ProjectFile {
    pub fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            ..Default::default()
        }
    }

    /// Location of a project's file inside `data_dir`
    pub fn path(data_dir: &Path, project_id: &str) -> PathBuf {
        data_dir.join("projects").join(format!("{}.yaml", project_id))
    }

    /// Load a project, or start an empty one if it was never saved
    pub fn load_or_new(data_dir: &Path, project_id: &str) -> Result<Self> {
        let path = Self::path(data_dir, project_id);
        if !path.exists() {
            debug!("No task file for project {}, starting empty", project_id);
            return Ok(Self::new(project_id));
        }

        let contents = fs::read_to_string(&path)
            .context(format!("Failed to read project file: {}", path.display()))?;
        let project: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse project file: {}", path.display()))?;

        Ok(project)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = Self::path(data_dir, &self.project_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create directory: {}", parent.display()))?;
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize project file")?;
        fs::write(&path, contents)
            .context(format!("Failed to write project file: {}", path.display()))?;

        debug!("Saved project {} to {}", self.project_id, path.display());
        Ok(())
    }
}
