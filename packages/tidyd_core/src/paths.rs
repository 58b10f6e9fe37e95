//! Per-user filesystem layout shared by the client, the daemon, and the
//! lifecycle manager. Both sides of every socket derive the path from the
//! same endpoint name, so only the name ever travels.

use std::path::PathBuf;

/// Root of tidyd's per-user state: installed binary, sockets, logs, config.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tidyd")
}

/// Socket path backing a registered endpoint name.
pub fn endpoint_socket_path(endpoint: &str) -> PathBuf {
    data_dir().join(format!("{}.sock", endpoint))
}

/// Directory holding single-use callback sockets.
pub fn callback_dir() -> PathBuf {
    data_dir().join("cb")
}

/// Where the installed daemon binary lives.
pub fn install_dir() -> PathBuf {
    data_dir().join("bin")
}

/// Where the daemon writes its log files when run under the supervisor.
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

/// Directory the host supervisor reads service descriptors from.
pub fn descriptor_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library")
            .join("LaunchAgents")
    }

    #[cfg(not(target_os = "macos"))]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("systemd")
            .join("user")
    }
}
