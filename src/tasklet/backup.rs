//! # Backup Tasklet
//!
//! Hands a consumed import file over to its backup policy once the import
//! step has read it to the end: keep it in place, delete it, or move it to a
//! templated backup path.
//!
//! Move templates are `chrono` strftime patterns in which `{filename}` is
//! replaced by the file name of the imported file. Relative templates are
//! resolved against the directory of the imported file.
//!
//! ```rust
//! use bulk_import_rs::tasklet::backup::{BackupPolicy, BackupTasklet};
//! use bulk_import_rs::core::tasklet::Tasklet;
//!
//! # fn example() -> Result<(), bulk_import_rs::BatchError> {
//! let policy = BackupPolicy::Move("done/%Y-%m-%d/{filename}".to_string());
//! policy.validate()?;
//!
//! let tasklet = BackupTasklet::new(policy, "import/products.csv");
//! tasklet.run()?;
//! # Ok(())
//! # }
//! ```

use std::{
    fmt::Write,
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{
    Local,
    format::{Item, StrftimeItems},
};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    core::tasklet::{RepeatStatus, Tasklet},
    error::BatchError,
};

/// What happens to an import file after it was consumed.
///
/// Serialized as `"keep"`, `"delete"` or `{ "move": "<template>" }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupPolicy {
    #[default]
    Keep,
    Delete,
    Move(String),
}

impl BackupPolicy {
    /// Rejects empty move templates and invalid strftime specifiers.
    pub fn validate(&self) -> Result<(), BatchError> {
        let BackupPolicy::Move(template) = self else {
            return Ok(());
        };

        if template.trim().is_empty() {
            return Err(BatchError::Configuration(
                "backup move template is empty".to_string(),
            ));
        }
        if StrftimeItems::new(template).any(|item| item == Item::Error) {
            return Err(BatchError::Configuration(format!(
                "invalid backup template \"{}\"",
                template
            )));
        }
        Ok(())
    }
}

pub struct BackupTasklet {
    policy: BackupPolicy,
    path: PathBuf,
}

impl BackupTasklet {
    pub fn new<P: AsRef<Path>>(policy: BackupPolicy, path: P) -> Self {
        Self {
            policy,
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Backup location of the file for `template`, rendered now.
    pub fn target(&self, template: &str) -> Result<PathBuf, BatchError> {
        let mut rendered = String::new();
        write!(rendered, "{}", Local::now().format(template)).map_err(|_| {
            BatchError::Configuration(format!("invalid backup template \"{}\"", template))
        })?;

        let filename = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = PathBuf::from(rendered.replace("{filename}", &filename));

        if target.is_absolute() {
            return Ok(target);
        }
        Ok(self
            .path
            .parent()
            .map_or_else(|| target.clone(), |dir| dir.join(&target)))
    }

    fn move_to(&self, target: &Path) -> Result<(), BatchError> {
        if target.exists() {
            return Err(BatchError::Tasklet(format!(
                "backup target {} already exists",
                target.display()
            )));
        }
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }

        // rename fails across file systems
        if let Err(err) = fs::rename(&self.path, target) {
            debug!("Rename failed ({}), copying instead", err);
            fs::copy(&self.path, target)?;
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl Tasklet for BackupTasklet {
    fn execute(&self) -> Result<RepeatStatus, BatchError> {
        if !self.path.is_file() {
            return Err(BatchError::Tasklet(format!(
                "cannot back up {}: {}",
                self.path.display(),
                io::Error::from(io::ErrorKind::NotFound)
            )));
        }

        match &self.policy {
            BackupPolicy::Keep => {
                debug!("Keeping {}", self.path.display());
            }
            BackupPolicy::Delete => {
                fs::remove_file(&self.path)?;
                info!("Deleted {}", self.path.display());
            }
            BackupPolicy::Move(template) => {
                let target = self.target(template)?;
                self.move_to(&target)?;
                info!("Moved {} to {}", self.path.display(), target.display());
            }
        }

        Ok(RepeatStatus::Finished)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::Local;
    use tempfile::TempDir;

    use super::{BackupPolicy, BackupTasklet};
    use crate::{core::tasklet::Tasklet, error::BatchError};

    #[test]
    fn move_renders_date_and_filename() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("products.csv");
        fs::write(&file, "p1,Product").unwrap();

        let tasklet = BackupTasklet::new(BackupPolicy::Move("done/%Y/{filename}".to_string()), &file);
        tasklet.run().unwrap();

        let year = Local::now().format("%Y").to_string();
        assert!(!file.exists());
        assert!(dir.path().join("done").join(year).join("products.csv").is_file());
    }

    #[test]
    fn delete_removes_the_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("products.csv");
        fs::write(&file, "p1,Product").unwrap();

        BackupTasklet::new(BackupPolicy::Delete, &file).run().unwrap();

        assert!(!file.exists());
    }

    #[test]
    fn existing_target_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("products.csv");
        fs::write(&file, "new").unwrap();
        fs::write(dir.path().join("old.csv"), "old").unwrap();

        let result = BackupTasklet::new(BackupPolicy::Move("old.csv".to_string()), &file).run();

        assert!(matches!(result, Err(BatchError::Tasklet(_))));
        assert!(file.exists());
    }

    #[test]
    fn policy_deserializes_from_config_values() {
        let keep: BackupPolicy = serde_json::from_str("\"keep\"").unwrap();
        let moved: BackupPolicy = serde_json::from_str(r#"{"move": "bak/{filename}"}"#).unwrap();

        assert_eq!(keep, BackupPolicy::Keep);
        assert_eq!(moved, BackupPolicy::Move("bak/{filename}".to_string()));
        assert!(BackupPolicy::Move("%Q/{filename}".to_string()).validate().is_err());
    }
}
