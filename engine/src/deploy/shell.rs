//! Shell-backed host executor
//!
//! Dispatches host actions as command lines over the `ssh` binary, the
//! same way single-host deploys drive the `docker` CLI. Exit status 255
//! is an ssh transport failure and therefore transient; other non-zero
//! exits are permanent unless stderr hints at a network problem.

use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::deploy::executor::{
    ActionResult, ExecutionError, HealthProbe, HostAction, HostExecutor,
};
use crate::models::descriptor::{HostId, ServiceKind};

/// Shell executor options
#[derive(Debug, Clone)]
pub struct ShellOptions {
    /// ssh binary
    pub ssh_binary: String,

    /// scp binary used for file copies
    pub scp_binary: String,

    /// Default login user when a host does not carry one
    pub user: Option<String>,

    /// ssh connect timeout
    pub connect_timeout: Duration,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            scp_binary: "scp".to_string(),
            user: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Executes host actions by running commands over ssh
pub struct ShellExecutor {
    options: ShellOptions,
}

impl ShellExecutor {
    pub fn new(options: ShellOptions) -> Self {
        Self { options }
    }

    /// ssh/scp target for a host: the host's user wins over the default
    fn remote_target(&self, host: &HostId) -> String {
        match host.user.as_deref().or(self.options.user.as_deref()) {
            Some(user) => format!("{}@{}", user, host.address),
            None => host.address.clone(),
        }
    }

    /// Remote command line for command-style actions; `None` for actions
    /// with dedicated handling (copy, probe)
    pub fn shell_command(action: &HostAction) -> Option<String> {
        let command = match action {
            HostAction::RunCommand { command } => command.clone(),
            HostAction::PullImage { image } => format!("docker pull {}", image),
            HostAction::StartContainer { name, image, env } => {
                let mut command = format!(
                    "docker rm -f {name} >/dev/null 2>&1 || true; \
                     docker run -d --name {name} --restart unless-stopped"
                );
                for (key, value) in env {
                    command.push_str(&format!(" -e {}='{}'", key, value));
                }
                command.push(' ');
                command.push_str(image);
                command
            }
            HostAction::StopContainer { name } => format!(
                "docker stop {name} >/dev/null 2>&1 || true; \
                 docker rm -f {name} >/dev/null 2>&1 || true"
            ),
            HostAction::InstallUnit {
                unit,
                contents,
                version,
            } => format!(
                "cat > /etc/systemd/system/{unit} <<'EOF'\n{contents}\nEOF\n\
                 mkdir -p /etc/systemd/system/{unit}.d && \
                 printf '[Service]\\nEnvironment=DEPLOY_VERSION={version}\\n' \
                 > /etc/systemd/system/{unit}.d/deploy.conf && \
                 systemctl daemon-reload"
            ),
            HostAction::StartUnit { unit } => format!("systemctl start {}", unit),
            HostAction::StopUnit { unit } => {
                format!("systemctl stop {} >/dev/null 2>&1 || true", unit)
            }
            HostAction::CopyFile { .. } | HostAction::QueryHealth { .. } => return None,
        };
        Some(command)
    }

    async fn run_remote(&self, host: &HostId, command: &str) -> Result<Output, ExecutionError> {
        debug!("host {}: ssh: {}", host, command);
        Command::new(&self.options.ssh_binary)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.options.connect_timeout.as_secs()
            ))
            .arg(self.remote_target(host))
            .arg(command)
            .output()
            .await
            .map_err(|e| {
                ExecutionError::Transient(format!(
                    "failed to run {}: {}",
                    self.options.ssh_binary, e
                ))
            })
    }

    fn check_status(output: &Output) -> Result<(), ExecutionError> {
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(255) => Err(ExecutionError::Transient(format!(
                "ssh connection failed: {}",
                stderr
            ))),
            Some(code) => {
                let hint = stderr.to_lowercase();
                if hint.contains("timed out")
                    || hint.contains("timeout")
                    || hint.contains("connection")
                    || hint.contains("temporar")
                {
                    Err(ExecutionError::Transient(format!(
                        "command failed with exit {}: {}",
                        code, stderr
                    )))
                } else {
                    Err(ExecutionError::Permanent(format!(
                        "command failed with exit {}: {}",
                        code, stderr
                    )))
                }
            }
            None => Err(ExecutionError::Transient(format!(
                "command terminated by signal: {}",
                stderr
            ))),
        }
    }

    async fn run_simple(&self, host: &HostId, command: &str) -> Result<ActionResult, ExecutionError> {
        let output = self.run_remote(host, command).await?;
        Self::check_status(&output)?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if stdout.is_empty() {
            ActionResult::Done
        } else {
            ActionResult::Output(stdout)
        })
    }

    async fn copy_file(
        &self,
        host: &HostId,
        source: &str,
        destination: &str,
    ) -> Result<ActionResult, ExecutionError> {
        let target = format!("{}:{}", self.remote_target(host), destination);
        debug!("host {}: scp {} {}", host, source, target);
        let output = Command::new(&self.options.scp_binary)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(source)
            .arg(&target)
            .output()
            .await
            .map_err(|e| {
                ExecutionError::Transient(format!(
                    "failed to run {}: {}",
                    self.options.scp_binary, e
                ))
            })?;
        Self::check_status(&output)?;
        Ok(ActionResult::Done)
    }

    async fn query_health(
        &self,
        host: &HostId,
        service: &str,
        kind: ServiceKind,
        custom: Option<&str>,
    ) -> Result<ActionResult, ExecutionError> {
        let command = Self::probe_command(service, kind, custom);
        let output = self.run_remote(host, &command).await?;
        Self::check_status(&output)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(ActionResult::Health(Self::parse_probe(kind, &stdout)))
    }

    /// Probe script printing `status|identity|extra` with exit code 0
    pub fn probe_command(service: &str, kind: ServiceKind, custom: Option<&str>) -> String {
        let custom_check = match custom {
            Some(check) => format!("if ! ({}) >/dev/null 2>&1; then extra=failed; fi; ", check),
            None => String::new(),
        };
        match kind {
            ServiceKind::Container => format!(
                "status=$(docker inspect --format '{{{{.State.Running}}}}' {service} 2>/dev/null || echo false); \
                 image=$(docker inspect --format '{{{{.Config.Image}}}}' {service} 2>/dev/null || echo none); \
                 extra=ok; {custom_check}echo \"$status|$image|$extra\""
            ),
            ServiceKind::SystemProcess => format!(
                "status=$(systemctl is-active {service}.service 2>/dev/null || true); \
                 env=$(systemctl show {service}.service --property=Environment 2>/dev/null || true); \
                 extra=ok; {custom_check}echo \"$status|$env|$extra\""
            ),
        }
    }

    /// Parse the probe script output into a health report
    pub fn parse_probe(kind: ServiceKind, stdout: &str) -> HealthProbe {
        let line = stdout.lines().last().unwrap_or("").trim();
        let mut parts = line.splitn(3, '|');
        let status = parts.next().unwrap_or("");
        let identity = parts.next().unwrap_or("");
        let extra = parts.next().unwrap_or("ok");

        let (healthy, running_version) = match kind {
            ServiceKind::Container => {
                let version = if identity == "none" || identity.is_empty() {
                    None
                } else {
                    // Tag after the last ':' following the final path segment,
                    // so registries with ports are not mistaken for tags
                    identity
                        .rsplit('/')
                        .next()
                        .and_then(|segment| segment.split_once(':'))
                        .map(|(_, tag)| tag.to_string())
                };
                (status == "true" && extra == "ok", version)
            }
            ServiceKind::SystemProcess => {
                let version = identity.find("DEPLOY_VERSION=").map(|at| {
                    identity[at + "DEPLOY_VERSION=".len()..]
                        .split_whitespace()
                        .next()
                        .unwrap_or("")
                        .to_string()
                });
                (status == "active" && extra == "ok", version)
            }
        };

        HealthProbe {
            healthy,
            running_version,
            detail: Some(line.to_string()),
        }
    }
}

#[async_trait]
impl HostExecutor for ShellExecutor {
    async fn execute(
        &self,
        host: &HostId,
        action: &HostAction,
    ) -> Result<ActionResult, ExecutionError> {
        match action {
            HostAction::CopyFile {
                source,
                destination,
            } => self.copy_file(host, source, destination).await,
            HostAction::QueryHealth {
                service,
                kind,
                command,
            } => {
                self.query_health(host, service, *kind, command.as_deref())
                    .await
            }
            other => {
                let Some(command) = Self::shell_command(other) else {
                    return Err(ExecutionError::Permanent(format!(
                        "unsupported action: {:?}",
                        other
                    )));
                };
                self.run_simple(host, &command).await
            }
        }
    }
}
