//! Container execution backend
//!
//! Runs each job as one shell script in a fresh container driven through a
//! podman (or docker-compatible) CLI:
//! - pull the image selected by the job's target
//! - create the container with the script as its command
//! - start it and wait for it to exit
//! - collect its logs
//! - remove it, on success, failure and cancellation alike

use anyhow::{Context, Result};
use async_trait::async_trait;
use gantry_core::domain::job::Job;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{ExecutionBackend, ExecutionContext, ExecutionError, Phase};
use crate::config::ContainerConfig;
use crate::script::build_script;

/// Label attached to every container, keyed by run id
pub const RUN_LABEL: &str = "gantry.run";

/// Checks that the container runtime is installed and answers
pub fn check_runtime_available(runtime: &str) -> Result<()> {
    let output = std::process::Command::new(runtime)
        .arg("--version")
        .output()
        .with_context(|| format!("Failed to execute '{} --version'. Is it installed?", runtime))?;

    if !output.status.success() {
        anyhow::bail!("{} is not working correctly", runtime);
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Container runtime is available: {}", version.trim());

    Ok(())
}

struct CommandOutput {
    stdout: String,
    stderr: String,
}

/// [`ExecutionBackend`] backed by a container runtime CLI
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    config: ContainerConfig,
}

impl ContainerBackend {
    pub fn new(config: ContainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Runs one runtime sub-command bounded by `limit`
    ///
    /// With a `cancel` token the command is killed as soon as the token
    /// fires; without one it runs until it exits or times out.
    async fn invoke(
        &self,
        phase: Phase,
        limit: Duration,
        args: &[&str],
        cancel: Option<&CancellationToken>,
    ) -> Result<CommandOutput, ExecutionError> {
        let mut command = Command::new(&self.config.runtime);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("{} {} ({})", self.config.runtime, args[0], phase);

        let run = timeout(limit, command.output());
        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(ExecutionError::Cancelled {
                        phase,
                        output: String::new(),
                    });
                }
                result = run => result,
            },
            None => run.await,
        };

        let output = match result {
            Err(_) => {
                return Err(ExecutionError::Timeout {
                    phase,
                    limit,
                    output: String::new(),
                });
            }
            Ok(Err(e)) => {
                return Err(ExecutionError::sandbox(
                    phase,
                    format!("failed to run {}: {}", self.config.runtime, e),
                ));
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(ExecutionError::sandbox(
                phase,
                format!("exit_code={}, stderr='{}'", exit_code, stderr.trim()),
            ));
        }

        Ok(CommandOutput { stdout, stderr })
    }

    /// Limit for a pre-start phase, never beyond the run deadline
    fn bounded(&self, limit: Duration, ctx: &ExecutionContext) -> Duration {
        limit.min(ctx.remaining())
    }

    async fn run_container(
        &self,
        name: &str,
        image: &str,
        script: &str,
        ctx: &ExecutionContext,
    ) -> Result<String, ExecutionError> {
        let label = format!("{}={}", RUN_LABEL, ctx.run_id);
        self.invoke(
            Phase::Create,
            self.bounded(self.config.create_timeout, ctx),
            &[
                "create",
                "--name",
                name,
                "--label",
                label.as_str(),
                "--entrypoint",
                "/bin/sh",
                image,
                "-c",
                script,
            ],
            Some(&ctx.cancel),
        )
        .await?;

        self.invoke(
            Phase::Start,
            self.bounded(self.config.start_timeout, ctx),
            &["start", name],
            Some(&ctx.cancel),
        )
        .await?;

        let exit_code = match self
            .invoke(Phase::Wait, ctx.remaining(), &["wait", name], Some(&ctx.cancel))
            .await
        {
            Ok(waited) => parse_exit_code(&waited.stdout),
            Err(e) => {
                let output = self.collect_logs(name).await;
                return Err(e.with_output(output));
            }
        };

        let output = self.collect_logs(name).await;
        match exit_code {
            Ok(0) => Ok(output),
            Ok(exit_code) => Err(ExecutionError::NonZeroExit { exit_code, output }),
            Err(e) => Err(e.with_output(output)),
        }
    }

    /// Combined stdout/stderr of the container
    ///
    /// A failure here never hides the job outcome; the message takes the
    /// place of the logs.
    async fn collect_logs(&self, name: &str) -> String {
        match self
            .invoke(Phase::Logs, self.config.logs_timeout, &["logs", name], None)
            .await
        {
            Ok(logs) => {
                let mut output = logs.stdout;
                output.push_str(&logs.stderr);
                output
            }
            Err(e) => {
                warn!("Failed to fetch logs for container {}: {}", name, e);
                format!("failed to fetch logs: {}\n", e)
            }
        }
    }

    async fn remove(&self, name: &str) {
        match self
            .invoke(
                Phase::Remove,
                self.config.remove_timeout,
                &["rm", "-f", name],
                None,
            )
            .await
        {
            Ok(_) => debug!("Container {} removed", name),
            Err(e) => warn!("Failed to remove container {}: {}", name, e),
        }
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    async fn execute(
        &self,
        job_name: &str,
        job: &Job,
        ctx: &ExecutionContext,
    ) -> Result<String, ExecutionError> {
        if ctx.cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled {
                phase: Phase::Pull,
                output: String::new(),
            });
        }

        let image = self.config.image_for(&job.target);
        let name = container_name(&ctx.run_id, job_name);
        let script = build_script(&job.steps);

        info!(
            "Running job {} of run {} in container {} (image {})",
            job_name, ctx.run_id, name, image
        );

        self.invoke(
            Phase::Pull,
            self.bounded(self.config.pull_timeout, ctx),
            &["pull", image],
            Some(&ctx.cancel),
        )
        .await?;

        // From here on the container may exist and must be removed
        let mut guard = ContainerGuard::new(&self.config.runtime, &name);
        let result = self.run_container(&name, image, &script, ctx).await;
        self.remove(&name).await;
        guard.disarm();

        match &result {
            Ok(_) => info!("Job {} of run {} succeeded", job_name, ctx.run_id),
            Err(e) => error!("Job {} of run {} failed: {}", job_name, ctx.run_id, e),
        }

        result
    }
}

/// Removes the container if the job future is dropped before teardown ran
struct ContainerGuard {
    runtime: String,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(runtime: &str, name: &str) -> Self {
        Self {
            runtime: runtime.to_string(),
            name: name.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        warn!("Job interrupted, removing container {}", self.name);
        let runtime = std::mem::take(&mut self.runtime);
        let name = std::mem::take(&mut self.name);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let removed = Command::new(&runtime)
                        .args(["rm", "-f", &name])
                        .stdin(Stdio::null())
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status()
                        .await;
                    if let Err(e) = removed {
                        warn!("Failed to remove container {}: {}", name, e);
                    }
                });
            }
            Err(_) => {
                let _ = std::process::Command::new(&runtime)
                    .args(["rm", "-f", &name])
                    .output();
            }
        }
    }
}

/// Unique, runtime-safe container name for a job of a run
fn container_name(run_id: &str, job_name: &str) -> String {
    let sanitize = |value: &str| -> String {
        value
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '-'
                }
            })
            .take(40)
            .collect()
    };

    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "gantry-{}-{}-{}",
        sanitize(run_id),
        sanitize(job_name),
        &suffix[..8]
    )
}

fn parse_exit_code(stdout: &str) -> Result<i64, ExecutionError> {
    stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            ExecutionError::sandbox(
                Phase::Wait,
                format!("unexpected wait output '{}'", stdout.trim()),
            )
        })
}
