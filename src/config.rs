use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Retention windows for the reaper. Commented posts get a longer window
/// because a discussed post should outlive a silent one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum age (since creation) of a post that never received a comment.
    pub uncommented: Duration,
    /// Maximum age of a post's most recent comment.
    pub commented: Duration,
}

/// Durations the lifecycle manager runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Inactivity window after which a post is archived.
    pub post_window: Duration,
    /// Lifetime granted to a session on creation and on every touch.
    pub session_lifetime: Duration,
    /// How often the session sweeper scans for expired sessions.
    pub sweep_interval: Duration,
    /// How often the retention reaper runs.
    pub reaper_interval: Duration,
    pub retention: RetentionPolicy,
    /// Upper bound on how long shutdown waits for in-flight archival.
    pub shutdown_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Config::default().lifecycle()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Post inactivity window in seconds.
    #[serde(default = "default_post_window_secs")]
    pub post_window_secs: u64,
    /// Session lifetime in seconds.
    #[serde(default = "default_session_lifetime_secs")]
    pub session_lifetime_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    /// Commentless posts older than this are deleted.
    #[serde(default = "default_retention_uncommented_secs")]
    pub retention_uncommented_secs: u64,
    /// Posts whose last comment is older than this are deleted.
    #[serde(default = "default_retention_commented_secs")]
    pub retention_commented_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_post_window_secs() -> u64 {
    600
}

fn default_session_lifetime_secs() -> u64 {
    7 * 24 * 3600
}

fn default_sweep_interval_secs() -> u64 {
    1
}

fn default_reaper_interval_secs() -> u64 {
    300
}

fn default_retention_uncommented_secs() -> u64 {
    24 * 3600
}

fn default_retention_commented_secs() -> u64 {
    7 * 24 * 3600
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            post_window_secs: default_post_window_secs(),
            session_lifetime_secs: default_session_lifetime_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            retention_uncommented_secs: default_retention_uncommented_secs(),
            retention_commented_secs: default_retention_commented_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("fadeboard.db")
    }

    /// Returns the default config file path for a given data directory.
    pub fn config_file_path(data_dir: &Path) -> PathBuf {
        data_dir.join("config.yaml")
    }

    /// Load config from a YAML file. Returns None if the file does not exist.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Option<Config>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(Some(config))
    }

    /// Write a default config file with documentation comments.
    /// Returns an error if the file already exists.
    pub fn write_default_config(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            anyhow::bail!(
                "config file already exists: {}. Remove it first to regenerate.",
                path.display()
            );
        }
        let template = include_str!("config_template.yaml");
        std::fs::write(path, template)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the config for obvious errors.
    pub fn validate(&self) -> anyhow::Result<()> {
        let required = [
            ("post_window_secs", self.post_window_secs),
            ("session_lifetime_secs", self.session_lifetime_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("reaper_interval_secs", self.reaper_interval_secs),
            ("retention_uncommented_secs", self.retention_uncommented_secs),
            ("retention_commented_secs", self.retention_commented_secs),
        ];
        for (name, value) in required {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }
        // A retention window shorter than the archive window would delete
        // posts that are still active.
        if self.retention_uncommented_secs < self.post_window_secs {
            anyhow::bail!(
                "retention_uncommented_secs ({}) must be at least post_window_secs ({})",
                self.retention_uncommented_secs,
                self.post_window_secs
            );
        }
        if self.retention_commented_secs < self.post_window_secs {
            anyhow::bail!(
                "retention_commented_secs ({}) must be at least post_window_secs ({})",
                self.retention_commented_secs,
                self.post_window_secs
            );
        }
        if self.sweep_interval_secs > self.session_lifetime_secs {
            tracing::warn!(
                sweep_interval_secs = self.sweep_interval_secs,
                session_lifetime_secs = self.session_lifetime_secs,
                "sweep interval exceeds session lifetime, expired sessions will linger"
            );
        }
        Ok(())
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            post_window: Duration::from_secs(self.post_window_secs),
            session_lifetime: Duration::from_secs(self.session_lifetime_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            reaper_interval: Duration::from_secs(self.reaper_interval_secs),
            retention: RetentionPolicy {
                uncommented: Duration::from_secs(self.retention_uncommented_secs),
                commented: Duration::from_secs(self.retention_commented_secs),
            },
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn lifecycle_conversion() {
        let config = Config {
            post_window_secs: 60,
            retention_uncommented_secs: 120,
            retention_commented_secs: 180,
            ..Config::default()
        };
        let lc = config.lifecycle();
        assert_eq!(lc.post_window, Duration::from_secs(60));
        assert_eq!(lc.retention.uncommented, Duration::from_secs(120));
        assert_eq!(lc.retention.commented, Duration::from_secs(180));
        assert_eq!(lc.session_lifetime, Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn validate_zero_window() {
        let config = Config {
            post_window_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_retention_shorter_than_window() {
        let config = Config {
            post_window_secs: 600,
            retention_uncommented_secs: 300,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            post_window_secs: 600,
            retention_commented_secs: 599,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_round_trip() {
        let config = Config {
            post_window_secs: 900,
            session_lifetime_secs: 600,
            ..Config::default()
        };

        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.post_window_secs, 900);
        assert_eq!(parsed.session_lifetime_secs, 600);
        assert_eq!(parsed.reaper_interval_secs, 300);
    }

    #[test]
    fn yaml_missing_fields_default() {
        let yaml = "data_dir: ./board\npost_window_secs: 120\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.post_window_secs, 120);
        assert_eq!(config.sweep_interval_secs, 1);
        assert_eq!(config.retention_commented_secs, 7 * 24 * 3600);
    }

    #[test]
    fn template_parses_and_validates() {
        let config: Config = serde_yaml::from_str(include_str!("config_template.yaml")).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = Config::config_file_path(dir.path());
        assert!(Config::load_from_file(&path).unwrap().is_none());

        Config::write_default_config(&path).unwrap();
        assert!(Config::load_from_file(&path).unwrap().is_some());
        assert!(Config::write_default_config(&path).is_err());
    }
}
