use std::io;
use std::path::{Path, PathBuf};

use interprocess::local_socket::tokio::{Listener, Stream, prelude::*};
use interprocess::local_socket::{GenericFilePath, ListenerOptions, ToFsName};
use uuid::Uuid;

/// Single-use reverse channel for one streaming request.
///
/// The listener binds a fresh socket named after the request id; the daemon
/// learns the name from the request itself and dials back exactly once.
/// Dropping the channel unlinks the socket file, so a name can never be
/// reused or dialed late.
pub struct CallbackChannel {
    path: PathBuf,
    listener: Listener,
}

impl CallbackChannel {
    pub fn create(dir: &Path, request_id: Uuid) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join(format!("cb-{}.sock", request_id));
        let name = path.clone().to_fs_name::<GenericFilePath>()?;
        let listener = ListenerOptions::new().name(name).create_tokio()?;

        Ok(CallbackChannel { path, listener })
    }

    /// Name to embed in the request so the daemon can dial back.
    pub fn name(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Wait for the daemon's single inbound connection.
    pub async fn accept(&self) -> io::Result<Stream> {
        self.listener.accept().await
    }
}

impl Drop for CallbackChannel {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn socket_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let channel = CallbackChannel::create(dir.path(), Uuid::new_v4()).unwrap();
        let path = PathBuf::from(channel.name());

        assert!(path.exists());
        drop(channel);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn names_are_unique_per_request() {
        let dir = tempfile::tempdir().unwrap();
        let a = CallbackChannel::create(dir.path(), Uuid::new_v4()).unwrap();
        let b = CallbackChannel::create(dir.path(), Uuid::new_v4()).unwrap();

        assert_ne!(a.name(), b.name());
    }
}
