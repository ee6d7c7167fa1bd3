//! Project dependency installation, chosen by the project's runtime.

use serde::Deserialize;
use stackop_core::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

const DESCRIPTORS: [&str; 2] = ["Pulumi.yaml", "Pulumi.yml"];

/// The parts of the project descriptor that matter for installation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectDescriptor {
    pub name: String,
    pub runtime: RuntimeSpec,
}

/// `runtime: nodejs` or `runtime: { name: python, options: { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RuntimeSpec {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        options: RuntimeOptions,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOptions {
    pub virtualenv: Option<String>,
    #[serde(alias = "packagemanager")]
    pub package_manager: Option<String>,
}

impl RuntimeSpec {
    pub fn name(&self) -> &str {
        match self {
            RuntimeSpec::Name(name) | RuntimeSpec::Full { name, .. } => name,
        }
    }

    fn options(&self) -> RuntimeOptions {
        match self {
            RuntimeSpec::Name(_) => RuntimeOptions::default(),
            RuntimeSpec::Full { options, .. } => options.clone(),
        }
    }
}

/// One command of an installation plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
    pub program: String,
    pub args: Vec<String>,
}

impl InstallStep {
    fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Read the project descriptor in `work_dir`.
pub async fn read_descriptor(work_dir: &Path) -> Result<ProjectDescriptor> {
    for name in DESCRIPTORS {
        let path = work_dir.join(name);
        if tokio::fs::try_exists(&path).await? {
            let text = tokio::fs::read_to_string(&path).await?;
            return serde_yaml::from_str(&text)
                .map_err(|e| Error::Config(format!("invalid {name}: {e}")));
        }
    }
    Err(Error::Source(format!(
        "no Pulumi.yaml found in {}",
        work_dir.display()
    )))
}

/// Commands that install the project's dependencies. Runtimes without a
/// package manager step (yaml, java, ...) get an empty plan.
pub async fn install_plan(work_dir: &Path, descriptor: &ProjectDescriptor) -> Vec<InstallStep> {
    let exists = |name: &str| {
        let path = work_dir.join(name);
        async move { tokio::fs::try_exists(path).await.unwrap_or(false) }
    };
    let options = descriptor.runtime.options();

    match descriptor.runtime.name() {
        "nodejs" => {
            let manager = match options.package_manager.as_deref() {
                Some(manager) => manager.to_string(),
                None if exists("yarn.lock").await => "yarn".to_string(),
                None if exists("pnpm-lock.yaml").await => "pnpm".to_string(),
                None => "npm".to_string(),
            };
            vec![InstallStep::new(manager, &["install"])]
        }
        "python" => {
            if !exists("requirements.txt").await {
                return Vec::new();
            }
            let venv = options.virtualenv.unwrap_or_else(|| "venv".to_string());
            let pip = PathBuf::from(&venv).join("bin").join("pip");
            vec![
                InstallStep::new("python3", &["-m", "venv", venv.as_str()]),
                InstallStep::new(pip.display().to_string(), &["install", "-r", "requirements.txt"]),
            ]
        }
        "go" => {
            if exists("go.mod").await {
                vec![InstallStep::new("go", &["mod", "download"])]
            } else {
                Vec::new()
            }
        }
        "dotnet" => vec![InstallStep::new("dotnet", &["restore"])],
        _ => Vec::new(),
    }
}

/// Install the dependencies of the project in `work_dir`.
pub async fn install_dependencies(work_dir: &Path, envs: &BTreeMap<String, String>) -> Result<()> {
    let descriptor = read_descriptor(work_dir).await?;
    let plan = install_plan(work_dir, &descriptor).await;

    info!(
        project = %descriptor.name,
        runtime = descriptor.runtime.name(),
        steps = plan.len(),
        "Installing project dependencies"
    );

    for step in plan {
        debug!(program = %step.program, args = ?step.args, "Running install step");
        let output = Command::new(&step.program)
            .args(&step.args)
            .current_dir(work_dir)
            .envs(envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::EngineFailed(format!("failed to run {}: {e}", step.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::EngineFailed(format!(
                "{} {} failed: {}",
                step.program,
                step.args.join(" "),
                stderr.trim()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(yaml: &str) -> ProjectDescriptor {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_descriptor_forms() {
        let short = descriptor("name: app\nruntime: nodejs\n");
        assert_eq!(short.runtime.name(), "nodejs");

        let full = descriptor(
            "name: app\nruntime:\n  name: python\n  options:\n    virtualenv: .venv\n",
        );
        assert_eq!(full.runtime.name(), "python");
        assert_eq!(full.runtime.options().virtualenv.as_deref(), Some(".venv"));
    }

    #[tokio::test]
    async fn test_nodejs_prefers_yarn_when_locked() {
        let dir = tempfile::tempdir().unwrap();
        let node = descriptor("name: app\nruntime: nodejs\n");

        let plan = install_plan(dir.path(), &node).await;
        assert_eq!(plan, vec![InstallStep::new("npm", &["install"])]);

        std::fs::write(dir.path().join("yarn.lock"), "").unwrap();
        let plan = install_plan(dir.path(), &node).await;
        assert_eq!(plan, vec![InstallStep::new("yarn", &["install"])]);
    }

    #[tokio::test]
    async fn test_python_uses_virtualenv() {
        let dir = tempfile::tempdir().unwrap();
        let python = descriptor(
            "name: app\nruntime:\n  name: python\n  options:\n    virtualenv: .venv\n",
        );
        assert!(install_plan(dir.path(), &python).await.is_empty());

        std::fs::write(dir.path().join("requirements.txt"), "pulumi>=3\n").unwrap();
        let plan = install_plan(dir.path(), &python).await;
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], InstallStep::new("python3", &["-m", "venv", ".venv"]));
        assert_eq!(plan[1].program, ".venv/bin/pip");
    }

    #[tokio::test]
    async fn test_runtimes_without_install_step() {
        let dir = tempfile::tempdir().unwrap();
        for yaml in ["name: app\nruntime: yaml\n", "name: app\nruntime: go\n"] {
            assert!(install_plan(dir.path(), &descriptor(yaml)).await.is_empty());
        }
        let dotnet = descriptor("name: app\nruntime: dotnet\n");
        assert_eq!(
            install_plan(dir.path(), &dotnet).await,
            vec![InstallStep::new("dotnet", &["restore"])]
        );
    }

    #[tokio::test]
    async fn test_read_descriptor_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_descriptor(dir.path()).await,
            Err(Error::Source(_))
        ));

        std::fs::write(dir.path().join("Pulumi.yml"), "name: app\nruntime: go\n").unwrap();
        assert_eq!(read_descriptor(dir.path()).await.unwrap().name, "app");
    }
}
