//! Installing, removing, and supervising the background daemon.
//!
//! The manager owns three pieces of state on disk (installed binary, service
//! descriptor, log directory) plus the registration inside the host
//! supervisor. Operations are serialized so concurrent install/uninstall
//! calls cannot interleave their file and supervisor steps.

pub mod descriptor;
pub mod supervisor;

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::paths;
pub use descriptor::ServiceDescriptor;
pub use supervisor::{HostSupervisor, Supervisor, SupervisorFailure};
use tidyd_proto::SERVICE_LABEL;

/// Name the daemon binary is installed under.
pub const DAEMON_BINARY_NAME: &str = "tidyd";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    NotRunning,
}

#[derive(Debug)]
pub enum LifecycleError {
    /// The daemon executable is not where the caller said it is.
    HelperMissing(PathBuf),
    DescriptorWriteFailed(std::io::Error),
    SupervisorRejected(SupervisorFailure),
    FileOpFailed(std::io::Error),
}

impl Display for LifecycleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleError::HelperMissing(path) => {
                write!(f, "daemon executable not found at {}", path.display())
            }
            LifecycleError::DescriptorWriteFailed(error) => {
                write!(f, "failed to write service descriptor: {}", error)
            }
            LifecycleError::SupervisorRejected(failure) => {
                write!(f, "service supervisor rejected the request: {}", failure)
            }
            LifecycleError::FileOpFailed(error) => write!(f, "file operation failed: {}", error),
        }
    }
}

impl std::error::Error for LifecycleError {}

/// Filesystem locations the lifecycle manager works against.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    pub install_dir: PathBuf,
    pub descriptor_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl InstallLayout {
    pub fn per_user() -> Self {
        InstallLayout {
            install_dir: paths::install_dir(),
            descriptor_dir: paths::descriptor_dir(),
            log_dir: paths::log_dir(),
        }
    }
}

pub struct ServiceLifecycleManager {
    identifier: String,
    layout: InstallLayout,
    supervisor: Box<dyn Supervisor>,
    ops: Mutex<()>,
}

impl ServiceLifecycleManager {
    pub fn new(identifier: &str, layout: InstallLayout, supervisor: Box<dyn Supervisor>) -> Self {
        ServiceLifecycleManager {
            identifier: identifier.to_string(),
            layout,
            supervisor,
            ops: Mutex::new(()),
        }
    }

    /// Manager for the standard per-user install driven by the platform
    /// supervisor.
    pub fn per_user() -> Self {
        ServiceLifecycleManager::new(SERVICE_LABEL, InstallLayout::per_user(), Box::new(HostSupervisor))
    }

    pub fn installed_executable(&self) -> PathBuf {
        self.layout.install_dir.join(DAEMON_BINARY_NAME)
    }

    fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor::for_daemon(
            &self.identifier,
            self.installed_executable(),
            &self.layout.log_dir,
        )
    }

    fn descriptor_path(&self) -> PathBuf {
        self.layout.descriptor_dir.join(self.descriptor().file_name())
    }

    /// Registration state as the supervisor reports it. Never changes
    /// anything, safe to poll.
    pub async fn status(&self) -> ServiceStatus {
        if self.supervisor.query_running(&self.identifier).await {
            ServiceStatus::Running
        } else {
            ServiceStatus::NotRunning
        }
    }

    /// Copy `source_executable` into the install dir, write the descriptor,
    /// and hand both to the supervisor. Reinstalling over a live service
    /// replaces it; a failed install can simply be retried.
    pub async fn install(&self, source_executable: &Path) -> Result<(), LifecycleError> {
        let _guard = self.ops.lock().await;

        match std::fs::metadata(source_executable) {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(LifecycleError::HelperMissing(source_executable.to_path_buf())),
        }

        for dir in [
            &self.layout.install_dir,
            &self.layout.log_dir,
            &self.layout.descriptor_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(LifecycleError::FileOpFailed)?;
        }

        let installed = self.installed_executable();
        remove_if_exists(&installed).map_err(LifecycleError::FileOpFailed)?;
        std::fs::copy(source_executable, &installed).map_err(LifecycleError::FileOpFailed)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&installed, std::fs::Permissions::from_mode(0o755))
                .map_err(LifecycleError::FileOpFailed)?;
        }

        let descriptor_path = self.descriptor_path();
        remove_if_exists(&descriptor_path).map_err(LifecycleError::DescriptorWriteFailed)?;
        std::fs::write(&descriptor_path, self.descriptor().render())
            .map_err(LifecycleError::DescriptorWriteFailed)?;

        self.supervisor
            .register(&descriptor_path, &self.identifier)
            .await
            .map_err(LifecycleError::SupervisorRejected)?;

        tracing::info!(
            identifier = %self.identifier,
            executable = %installed.display(),
            "service installed and started"
        );
        Ok(())
    }

    /// Deregister and delete everything install() created. Removing files
    /// proceeds even when the supervisor reports the service as unknown, so
    /// a half-installed service can always be cleaned up.
    pub async fn uninstall(&self) -> Result<(), LifecycleError> {
        let _guard = self.ops.lock().await;

        let descriptor_path = self.descriptor_path();
        if let Err(failure) = self
            .supervisor
            .deregister(&descriptor_path, &self.identifier)
            .await
        {
            tracing::warn!(%failure, "supervisor deregistration failed, removing files anyway");
        }

        remove_if_exists(&descriptor_path).map_err(LifecycleError::FileOpFailed)?;
        remove_if_exists(&self.installed_executable()).map_err(LifecycleError::FileOpFailed)?;

        tracing::info!(identifier = %self.identifier, "service uninstalled");
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    #[derive(Clone, Default)]
    struct FakeSupervisor {
        running: Arc<AtomicBool>,
        fail_register: Arc<AtomicBool>,
        register_calls: Arc<AtomicUsize>,
        deregister_calls: Arc<AtomicUsize>,
    }

    impl FakeSupervisor {
        fn failure(&self, command: &str) -> SupervisorFailure {
            SupervisorFailure {
                command: command.to_string(),
                exit_code: Some(1),
                stderr: "simulated failure".to_string(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Supervisor for FakeSupervisor {
        async fn query_running(&self, _identifier: &str) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        async fn register(
            &self,
            descriptor_path: &Path,
            _identifier: &str,
        ) -> Result<(), SupervisorFailure> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            assert!(descriptor_path.exists(), "descriptor must be written before registration");

            if self.fail_register.load(Ordering::SeqCst) {
                return Err(self.failure("register"));
            }
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn deregister(
            &self,
            _descriptor_path: &Path,
            _identifier: &str,
        ) -> Result<(), SupervisorFailure> {
            self.deregister_calls.fetch_add(1, Ordering::SeqCst);

            if !self.running.swap(false, Ordering::SeqCst) {
                return Err(self.failure("deregister"));
            }
            Ok(())
        }
    }

    struct Harness {
        manager: ServiceLifecycleManager,
        supervisor: FakeSupervisor,
        source: PathBuf,
        _root: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let root = tempfile::tempdir().unwrap();
        let layout = InstallLayout {
            install_dir: root.path().join("bin"),
            descriptor_dir: root.path().join("agents"),
            log_dir: root.path().join("logs"),
        };

        let source = root.path().join("tidyd-build");
        std::fs::write(&source, b"binary contents").unwrap();

        let supervisor = FakeSupervisor::default();
        let manager =
            ServiceLifecycleManager::new("io.tidyd.daemon", layout, Box::new(supervisor.clone()));

        Harness { manager, supervisor, source, _root: root }
    }

    #[tokio::test]
    async fn install_copies_and_registers() {
        let h = harness();

        h.manager.install(&h.source).await.unwrap();

        assert_eq!(h.manager.status().await, ServiceStatus::Running);
        assert!(h.manager.installed_executable().exists());
        assert!(h.manager.descriptor_path().exists());
        assert_eq!(h.supervisor.register_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn install_twice_replaces_cleanly() {
        let h = harness();

        h.manager.install(&h.source).await.unwrap();
        h.manager.install(&h.source).await.unwrap();

        assert_eq!(h.manager.status().await, ServiceStatus::Running);
        assert_eq!(h.supervisor.register_calls.load(Ordering::SeqCst), 2);

        let descriptors = std::fs::read_dir(h.manager.descriptor_path().parent().unwrap())
            .unwrap()
            .count();
        assert_eq!(descriptors, 1);
    }

    #[tokio::test]
    async fn install_reports_missing_helper() {
        let h = harness();

        let missing = h.source.with_file_name("never-built");
        match h.manager.install(&missing).await {
            Err(LifecycleError::HelperMissing(path)) => assert_eq!(path, missing),
            other => panic!("unexpected result: {:?}", other.map_err(|e| e.to_string())),
        }
        assert_eq!(h.supervisor.register_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_install_can_be_retried() {
        let h = harness();

        h.supervisor.fail_register.store(true, Ordering::SeqCst);
        match h.manager.install(&h.source).await {
            Err(LifecycleError::SupervisorRejected(_)) => {}
            other => panic!("unexpected result: {:?}", other.map_err(|e| e.to_string())),
        }
        assert_eq!(h.manager.status().await, ServiceStatus::NotRunning);

        h.supervisor.fail_register.store(false, Ordering::SeqCst);
        h.manager.install(&h.source).await.unwrap();
        assert_eq!(h.manager.status().await, ServiceStatus::Running);
    }

    #[tokio::test]
    async fn uninstall_removes_everything() {
        let h = harness();

        h.manager.install(&h.source).await.unwrap();
        h.manager.uninstall().await.unwrap();

        assert_eq!(h.manager.status().await, ServiceStatus::NotRunning);
        assert!(!h.manager.installed_executable().exists());
        assert!(!h.manager.descriptor_path().exists());
    }

    #[tokio::test]
    async fn uninstall_without_install_is_a_no_op() {
        let h = harness();

        h.manager.uninstall().await.unwrap();
        h.manager.uninstall().await.unwrap();

        assert_eq!(h.supervisor.deregister_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.manager.status().await, ServiceStatus::NotRunning);
    }
}
