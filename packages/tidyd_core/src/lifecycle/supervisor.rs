//! Host supervisor commands. macOS goes through `launchctl` against the
//! per-user gui domain, everything else through `systemctl --user`.

use std::fmt::{Display, Formatter};
use std::path::Path;

use tokio::process::Command;

/// A supervisor command that did not succeed. Keeps the rendered command
/// line and captured stderr so failures are actionable from logs alone.
#[derive(Debug)]
pub struct SupervisorFailure {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl Display for SupervisorFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "`{}` exited with {}: {}", self.command, code, self.stderr),
            None => write!(f, "`{}` could not run: {}", self.command, self.stderr),
        }
    }
}

impl std::error::Error for SupervisorFailure {}

/// Seam to the platform service supervisor.
#[async_trait::async_trait]
pub trait Supervisor: Send + Sync {
    /// True when the service is registered and running. Pure query.
    async fn query_running(&self, identifier: &str) -> bool;

    /// Register the descriptor and start the service, replacing any prior
    /// registration under the same identifier.
    async fn register(
        &self,
        descriptor_path: &Path,
        identifier: &str,
    ) -> Result<(), SupervisorFailure>;

    /// Stop the service and drop its registration.
    async fn deregister(
        &self,
        descriptor_path: &Path,
        identifier: &str,
    ) -> Result<(), SupervisorFailure>;
}

/// Supervisor backed by the real platform tools.
pub struct HostSupervisor;

#[cfg(target_os = "macos")]
fn gui_domain() -> String {
    format!("gui/{}", unsafe { libc::getuid() })
}

async fn run_command(program: &str, args: &[&str]) -> Result<(), SupervisorFailure> {
    let rendered = format!("{} {}", program, args.join(" "));

    let output = match Command::new(program).args(args).output().await {
        Ok(output) => output,
        Err(error) => {
            return Err(SupervisorFailure {
                command: rendered,
                exit_code: None,
                stderr: error.to_string(),
            });
        }
    };

    if output.status.success() {
        return Ok(());
    }

    Err(SupervisorFailure {
        command: rendered,
        exit_code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[async_trait::async_trait]
impl Supervisor for HostSupervisor {
    async fn query_running(&self, identifier: &str) -> bool {
        #[cfg(target_os = "macos")]
        {
            let target = format!("{}/{}", gui_domain(), identifier);
            run_command("launchctl", &["print", &target]).await.is_ok()
        }

        #[cfg(not(target_os = "macos"))]
        {
            let unit = format!("{}.service", identifier);
            run_command("systemctl", &["--user", "is-active", "--quiet", &unit])
                .await
                .is_ok()
        }
    }

    async fn register(
        &self,
        descriptor_path: &Path,
        identifier: &str,
    ) -> Result<(), SupervisorFailure> {
        #[cfg(target_os = "macos")]
        {
            // Replace semantics: a second bootstrap of a loaded service
            // fails, so drop any prior registration first.
            let target = format!("{}/{}", gui_domain(), identifier);
            let _ = run_command("launchctl", &["bootout", &target]).await;

            let domain = gui_domain();
            let path = descriptor_path.to_string_lossy();
            run_command("launchctl", &["bootstrap", &domain, &path]).await
        }

        #[cfg(not(target_os = "macos"))]
        {
            let _ = descriptor_path;
            run_command("systemctl", &["--user", "daemon-reload"]).await?;

            let unit = format!("{}.service", identifier);
            run_command("systemctl", &["--user", "enable", "--now", &unit]).await
        }
    }

    async fn deregister(
        &self,
        descriptor_path: &Path,
        identifier: &str,
    ) -> Result<(), SupervisorFailure> {
        #[cfg(target_os = "macos")]
        {
            let _ = descriptor_path;
            let target = format!("{}/{}", gui_domain(), identifier);
            run_command("launchctl", &["bootout", &target]).await
        }

        #[cfg(not(target_os = "macos"))]
        {
            let _ = descriptor_path;
            let unit = format!("{}.service", identifier);
            run_command("systemctl", &["--user", "disable", "--now", &unit]).await
        }
    }
}
