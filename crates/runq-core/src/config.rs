use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EXECUTOR: &str = "native";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Top-level config (runq.toml + RUNQ_* env overrides).
///
/// Nested keys use a double underscore in the environment, e.g.
/// `RUNQ_DATABASE__PATH` or `RUNQ_SCHEDULER__DEFAULT_EXECUTOR`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunqConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Executor recorded on jobs when the caller does not name one.
    #[serde(default = "default_executor")]
    pub default_executor: String,
    /// Cadence of the `runq scheduler` daemon loop.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_executor: default_executor(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn default_executor() -> String {
    DEFAULT_EXECUTOR.to_string()
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.runq/runq.db", home)
}

impl RunqConfig {
    /// Load config from a TOML file with RUNQ_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.runq/runq.toml
    ///
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RunqConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RUNQ_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        tracing::debug!(path = %path, db = %config.database.path, "configuration loaded");
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.runq/runq.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let cfg = RunqConfig::load(Some("does-not-exist.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.scheduler.default_executor, "native");
            assert_eq!(cfg.scheduler.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
            assert_eq!(cfg.output.format, OutputFormat::Text);
            assert!(cfg.database.path.ends_with("runq.db"));
            Ok(())
        });
    }

    #[test]
    fn toml_values_are_read() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "runq.toml",
                r#"
                [database]
                path = "/var/lib/runq/queue.db"

                [scheduler]
                poll_interval_secs = 5

                [output]
                format = "json"
                "#,
            )?;
            let cfg = RunqConfig::load(Some("runq.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.database.path, "/var/lib/runq/queue.db");
            assert_eq!(cfg.scheduler.poll_interval_secs, 5);
            assert_eq!(cfg.scheduler.default_executor, "native");
            assert_eq!(cfg.output.format, OutputFormat::Json);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("runq.toml", "[scheduler]\ndefault_executor = \"native\"\n")?;
            jail.set_env("RUNQ_SCHEDULER__DEFAULT_EXECUTOR", "podman");
            jail.set_env("RUNQ_DATABASE__PATH", "/tmp/override.db");
            let cfg = RunqConfig::load(Some("runq.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.scheduler.default_executor, "podman");
            assert_eq!(cfg.database.path, "/tmp/override.db");
            Ok(())
        });
    }

    #[test]
    fn bad_format_value_is_config_error() {
        Jail::expect_with(|jail| {
            jail.create_file("runq.toml", "[output]\nformat = \"yaml\"\n")?;
            let err = RunqConfig::load(Some("runq.toml")).unwrap_err();
            assert_eq!(err.code(), "CONFIG_ERROR");
            Ok(())
        });
    }
}
