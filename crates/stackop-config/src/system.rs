//! Operator settings.
//!
//! Settings come from built-in defaults, overridden by environment variables
//! or by a KDL file:
//!
//! ```kdl
//! pulumi-bin "/usr/local/bin/pulumi"
//! work-dir "/var/lib/stackop"
//! namespace "infra"
//! retry-interval-secs 30
//! attempt-timeout-secs 3600
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Operator-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Provisioning engine binary.
    pub pulumi_bin: String,
    /// Git binary used for checkouts.
    pub git_bin: String,
    /// Base directory for checkouts.
    pub work_dir: PathBuf,
    /// Namespace for secret selectors and env sources that omit one.
    pub namespace: String,
    /// Delay before re-running an attempt that hit an update conflict.
    pub retry_interval: Duration,
    /// Upper bound for one reconcile attempt.
    pub attempt_timeout: Option<Duration>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            pulumi_bin: "pulumi".to_string(),
            git_bin: "git".to_string(),
            work_dir: std::env::temp_dir().join("stackop"),
            namespace: "default".to_string(),
            retry_interval: Duration::from_secs(10),
            attempt_timeout: None,
        }
    }
}

impl OperatorConfig {
    /// Defaults overridden by `PULUMI_BIN`, `GIT_BIN`, `STACKOP_WORK_DIR`,
    /// `STACKOP_NAMESPACE`, `STACKOP_RETRY_INTERVAL_SECS` and
    /// `STACKOP_ATTEMPT_TIMEOUT_SECS`.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`OperatorConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(bin) = lookup("PULUMI_BIN") {
            config.pulumi_bin = bin;
        }
        if let Some(bin) = lookup("GIT_BIN") {
            config.git_bin = bin;
        }
        if let Some(dir) = lookup("STACKOP_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        if let Some(ns) = lookup("STACKOP_NAMESPACE") {
            config.namespace = ns;
        }
        if let Some(secs) = lookup("STACKOP_RETRY_INTERVAL_SECS") {
            config.retry_interval = parse_secs("STACKOP_RETRY_INTERVAL_SECS", &secs)?;
        }
        if let Some(secs) = lookup("STACKOP_ATTEMPT_TIMEOUT_SECS") {
            config.attempt_timeout = Some(parse_secs("STACKOP_ATTEMPT_TIMEOUT_SECS", &secs)?);
        }

        Ok(config)
    }

    /// Load settings from a KDL file.
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        parse_operator_config(&text)
    }
}

/// Parse operator settings from KDL text. Unknown nodes are ignored.
pub fn parse_operator_config(kdl: &str) -> ConfigResult<OperatorConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = OperatorConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "pulumi-bin" => config.pulumi_bin = required_string(node)?,
            "git-bin" => config.git_bin = required_string(node)?,
            "work-dir" => config.work_dir = PathBuf::from(required_string(node)?),
            "namespace" => config.namespace = required_string(node)?,
            "retry-interval-secs" => config.retry_interval = required_secs(node)?,
            "attempt-timeout-secs" => config.attempt_timeout = Some(required_secs(node)?),
            _ => {}
        }
    }

    if config.namespace.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "namespace".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    Ok(config)
}

fn parse_secs(field: &str, value: &str) -> ConfigResult<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidValue {
            field: field.to_string(),
            message: e.to_string(),
        })
}

fn first_arg(node: &KdlNode) -> Option<&kdl::KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn required_string(node: &KdlNode) -> ConfigResult<String> {
    first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| ConfigError::MissingField(node.name().value().to_string()))
}

fn required_secs(node: &KdlNode) -> ConfigResult<Duration> {
    let field = node.name().value();
    let value = first_arg(node)
        .and_then(|v| v.as_integer())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;
    u64::try_from(value)
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("{value} is not a valid number of seconds"),
        })
}
