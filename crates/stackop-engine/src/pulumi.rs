//! Stack controller backed by the `pulumi` CLI.

use async_trait::async_trait;
use serde::Deserialize;
use stackop_config::OperatorConfig;
use stackop_core::controller::{ControllerFactory, RunSummary, StackController};
use stackop_core::source::Checkout;
use stackop_core::stack::{ConfigValue, StackConfig, StackOutputs, StackSpec};
use stackop_core::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::classify::{classify_failure, extract_permalink};
use crate::runtime;

/// Drives one stack of one project checkout through the CLI.
pub struct PulumiController {
    pulumi_bin: String,
    work_dir: PathBuf,
    envs: BTreeMap<String, String>,
    stack: Option<String>,
}

impl PulumiController {
    pub fn new(pulumi_bin: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            pulumi_bin: pulumi_bin.into(),
            work_dir: work_dir.into(),
            envs: BTreeMap::new(),
            stack: None,
        }
    }

    fn stack(&self) -> Result<&str> {
        self.stack
            .as_deref()
            .ok_or_else(|| Error::Internal("no stack selected".to_string()))
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.pulumi_bin);
        cmd.args(args)
            .arg("--non-interactive")
            .current_dir(&self.work_dir)
            .envs(&self.envs)
            .env("PULUMI_SKIP_UPDATE_CHECK", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run a short command and return its stdout.
    async fn run_captured(&self, operation: &str, args: &[&str]) -> Result<String> {
        debug!(operation, "Running pulumi");
        let output = self
            .command(args)
            .output()
            .await
            .map_err(|e| Error::EngineFailed(format!("failed to run {}: {e}", self.pulumi_bin)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(operation, &format!("{stdout}\n{stderr}")));
        }
        Ok(stdout)
    }

    /// Run a long operation, logging its output as it arrives, and return
    /// the combined stdout and stderr.
    async fn run_streamed(&self, operation: &str, args: &[&str]) -> Result<String> {
        info!(operation, stack = self.stack.as_deref().unwrap_or(""), "Running pulumi");

        let mut child = self
            .command(args)
            .spawn()
            .map_err(|e| Error::EngineFailed(format!("failed to run {}: {e}", self.pulumi_bin)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("pulumi stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("pulumi stderr not captured".to_string()))?;

        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();
        let mut output_lines = Vec::new();
        let (mut stdout_open, mut stderr_open) = (true, true);

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout_reader.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => {
                        debug!(operation, "{line}");
                        output_lines.push(line);
                    }
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        warn!(error = %e, "Error reading stdout");
                        stdout_open = false;
                    }
                },
                line = stderr_reader.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        debug!(operation, "{line}");
                        output_lines.push(line);
                    }
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        warn!(error = %e, "Error reading stderr");
                        stderr_open = false;
                    }
                },
            }
        }

        let status = child.wait().await?;
        let output = output_lines.join("\n");

        if !status.success() {
            warn!(operation, code = ?status.code(), "Pulumi operation failed");
            return Err(classify_failure(operation, &output));
        }

        Ok(output)
    }
}

/// Entry of `pulumi config --json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigEntry {
    value: Option<serde_json::Value>,
    object_value: Option<serde_json::Value>,
    #[serde(default)]
    secret: bool,
}

fn parse_config(json: &str) -> Result<StackConfig> {
    let entries: BTreeMap<String, ConfigEntry> = serde_json::from_str(json)
        .map_err(|e| Error::EngineFailed(format!("unreadable config output: {e}")))?;

    Ok(entries
        .into_iter()
        .map(|(key, entry)| {
            let value = match entry.value.or(entry.object_value) {
                Some(serde_json::Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            (
                key,
                ConfigValue {
                    value,
                    secret: entry.secret,
                },
            )
        })
        .collect())
}

fn parse_outputs(json: &str) -> Result<StackOutputs> {
    if json.trim().is_empty() {
        return Ok(StackOutputs::new());
    }
    serde_json::from_str(json)
        .map_err(|e| Error::EngineFailed(format!("unreadable stack outputs: {e}")))
}

/// Secret outputs stay masked as `[secret]`; outputs end up in persisted status.
fn stack_output_args(stack: &str) -> [&str; 5] {
    ["stack", "output", "--json", "--stack", stack]
}

/// Arguments of one `config set-all` call applying every value.
fn set_all_args(stack: &str, config: &StackConfig) -> Vec<String> {
    let mut args = vec![
        "config".to_string(),
        "set-all".to_string(),
        "--stack".to_string(),
        stack.to_string(),
    ];
    for (key, value) in config {
        args.push(if value.secret { "--secret" } else { "--plaintext" }.to_string());
        args.push(format!("{key}={}", value.value));
    }
    args
}

#[async_trait]
impl StackController for PulumiController {
    fn name(&self) -> &'static str {
        "pulumi"
    }

    async fn install_project_dependencies(&mut self) -> Result<()> {
        runtime::install_dependencies(&self.work_dir, &self.envs).await
    }

    async fn set_envs(&mut self, envs: &BTreeMap<String, String>) -> Result<()> {
        self.envs
            .extend(envs.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn select_stack(&mut self, stack: &str, secrets_provider: Option<&str>) -> Result<()> {
        if stack.trim().is_empty() {
            return Err(Error::Config("stack name must be set".to_string()));
        }

        let mut args = vec!["stack", "select", stack, "--create"];
        if let Some(provider) = secrets_provider {
            args.extend(["--secrets-provider", provider]);
        }
        self.run_captured("stack select", &args).await?;

        info!(stack, "Selected stack");
        self.stack = Some(stack.to_string());
        Ok(())
    }

    async fn get_config(&mut self) -> Result<StackConfig> {
        let stack = self.stack()?;
        let json = self
            .run_captured(
                "config",
                &["config", "--json", "--show-secrets", "--stack", stack],
            )
            .await?;
        parse_config(&json)
    }

    async fn update_config(&mut self, config: &StackConfig) -> Result<()> {
        if config.is_empty() {
            return Ok(());
        }
        let args = set_all_args(self.stack()?, config);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_captured("config set-all", &args).await?;
        debug!(keys = config.len(), "Applied stack configuration");
        Ok(())
    }

    async fn refresh_stack(&mut self, expect_no_changes: bool) -> Result<RunSummary> {
        let stack = self.stack()?.to_string();
        let mut args = vec!["refresh", "--yes", "--skip-preview", "--stack", stack.as_str()];
        if expect_no_changes {
            args.push("--expect-no-changes");
        }
        let output = self.run_streamed("refresh", &args).await?;
        Ok(RunSummary {
            permalink: extract_permalink(&output),
        })
    }

    async fn update_stack(&mut self) -> Result<RunSummary> {
        let stack = self.stack()?.to_string();
        let output = self
            .run_streamed("update", &["up", "--yes", "--skip-preview", "--stack", &stack])
            .await?;
        Ok(RunSummary {
            permalink: extract_permalink(&output),
        })
    }

    async fn get_stack_outputs(&mut self) -> Result<StackOutputs> {
        let stack = self.stack()?;
        let args = stack_output_args(stack);
        let json = self.run_captured("stack output", &args).await?;
        parse_outputs(&json)
    }

    async fn destroy_stack(&mut self) -> Result<RunSummary> {
        let stack = self.stack()?.to_string();
        let output = self
            .run_streamed("destroy", &["destroy", "--yes", "--skip-preview", "--stack", &stack])
            .await?;
        self.run_captured("stack rm", &["stack", "rm", "--yes", "--stack", &stack])
            .await?;

        info!(stack = %stack, "Destroyed stack");
        Ok(RunSummary {
            permalink: extract_permalink(&output),
        })
    }
}

/// Opens [`PulumiController`]s over prepared checkouts.
pub struct PulumiControllerFactory {
    pulumi_bin: String,
}

impl PulumiControllerFactory {
    pub fn new(pulumi_bin: impl Into<String>) -> Self {
        Self {
            pulumi_bin: pulumi_bin.into(),
        }
    }

    pub fn from_config(config: &OperatorConfig) -> Self {
        Self::new(&config.pulumi_bin)
    }
}

#[async_trait]
impl ControllerFactory for PulumiControllerFactory {
    async fn open(
        &self,
        checkout: &Checkout,
        _spec: &StackSpec,
    ) -> Result<Box<dyn StackController>> {
        if !tokio::fs::try_exists(&checkout.work_dir).await? {
            return Err(Error::Source(format!(
                "project directory {} does not exist",
                checkout.work_dir.display()
            )));
        }
        Ok(Box::new(PulumiController::new(
            &self.pulumi_bin,
            &checkout.work_dir,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "aws:region": {"value": "us-west-2", "secret": false},
            "app:dbPassword": {"value": "hunter2", "secret": true},
            "app:tags": {"objectValue": {"team": "infra"}, "secret": false}
        }"#;

        let config = parse_config(json).unwrap();
        assert_eq!(config["aws:region"], ConfigValue::plain("us-west-2"));
        assert_eq!(config["app:dbPassword"], ConfigValue::secret("hunter2"));
        assert_eq!(config["app:tags"].value, r#"{"team":"infra"}"#);
    }

    #[test]
    fn test_parse_outputs() {
        let outputs = parse_outputs(r#"{"bucket": "b-123", "ports": [80, 443]}"#).unwrap();
        assert_eq!(outputs["bucket"], serde_json::json!("b-123"));
        assert_eq!(outputs["ports"], serde_json::json!([80, 443]));
        assert!(parse_outputs("").unwrap().is_empty());
        assert!(matches!(parse_outputs("not json"), Err(Error::EngineFailed(_))));
    }

    #[test]
    fn test_secret_outputs_stay_masked() {
        assert!(!stack_output_args("dev").contains(&"--show-secrets"));

        let outputs = parse_outputs(r#"{"url": "https://app", "dbPassword": "[secret]"}"#).unwrap();
        assert_eq!(outputs["dbPassword"], serde_json::json!("[secret]"));
    }

    #[test]
    fn test_set_all_args() {
        let config = StackConfig::from([
            ("aws:region".to_string(), ConfigValue::plain("us-west-2")),
            ("app:token".to_string(), ConfigValue::secret("t=1")),
        ]);

        assert_eq!(
            set_all_args("dev", &config),
            vec![
                "config",
                "set-all",
                "--stack",
                "dev",
                "--secret",
                "app:token=t=1",
                "--plaintext",
                "aws:region=us-west-2",
            ]
        );
    }

    #[tokio::test]
    async fn test_operations_need_a_selected_stack() {
        let mut controller = PulumiController::new("pulumi", "/nonexistent");
        assert!(matches!(
            controller.update_stack().await,
            Err(Error::Internal(_))
        ));
        assert!(matches!(
            controller.select_stack(" ", None).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_engine_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = PulumiController::new("pulumi-does-not-exist", dir.path());
        assert!(matches!(
            controller.select_stack("dev", None).await,
            Err(Error::EngineFailed(_))
        ));
    }

    /// Needs a `pulumi` binary and a logged-in backend.
    #[tokio::test]
    #[ignore]
    async fn test_local_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Pulumi.yaml"), "name: smoke\nruntime: yaml\noutputs:\n  greeting: hello\n").unwrap();

        let state = tempfile::tempdir().unwrap();
        let mut controller = PulumiController::new("pulumi", dir.path());
        controller
            .set_envs(&BTreeMap::from([
                ("PULUMI_BACKEND_URL".to_string(), format!("file://{}", state.path().display())),
                ("PULUMI_CONFIG_PASSPHRASE".to_string(), "test".to_string()),
            ]))
            .await
            .unwrap();

        controller.select_stack("dev", None).await.unwrap();
        controller.update_stack().await.unwrap();
        let outputs = controller.get_stack_outputs().await.unwrap();
        assert_eq!(outputs["greeting"], serde_json::json!("hello"));
        controller.destroy_stack().await.unwrap();
    }
}
