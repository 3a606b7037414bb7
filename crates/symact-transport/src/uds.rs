use std::collections::HashMap;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::name::socket_path;
use crate::stream::IpcStream;

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Listeners bound by this process, keyed by socket path.
///
/// Every server instance of one pipe name accepts from the same listener,
/// the way every instance of a Windows named pipe shares one name.
fn listeners() -> &'static Mutex<HashMap<PathBuf, Weak<SharedListener>>> {
    static LISTENERS: OnceLock<Mutex<HashMap<PathBuf, Weak<SharedListener>>>> = OnceLock::new();
    LISTENERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Resolve a pipe name to a socket path, rejecting paths the OS cannot bind.
pub(crate) fn checked_path(name: &str) -> Result<PathBuf> {
    let path = socket_path(name);
    let len = path.as_os_str().len();
    if len >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path,
            len,
            max: MAX_PATH_LEN,
        });
    }
    Ok(path)
}

/// A Unix domain socket listener shared by all server instances of one pipe name.
///
/// The socket file is removed when the last instance or reservation is
/// dropped, unless something else replaced it in the meantime.
#[derive(Debug)]
pub struct SharedListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
}

impl SharedListener {
    /// Get the process-wide listener for `name`, binding it if needed.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn obtain(name: &str, mode: u32) -> Result<Arc<Self>> {
        let path = checked_path(name)?;
        let mut registry = listeners().lock().unwrap_or_else(PoisonError::into_inner);
        let previous = registry.get(&path);
        if let Some(existing) = previous.and_then(Weak::upgrade) {
            return Ok(existing);
        }
        // A dead entry means our own listener is mid-drop; its socket is stale.
        let ours = previous.is_some();

        let listener = Arc::new(Self::bind(name, path.clone(), mode, ours)?);
        registry.insert(path, Arc::downgrade(&listener));
        Ok(listener)
    }

    fn bind(name: &str, path: PathBuf, mode: u32, ours: bool) -> Result<Self> {
        let create_err = |source: std::io::Error| TransportError::Create {
            name: name.to_string(),
            source,
        };

        // Remove a stale socket, but never a live one or a non-socket file.
        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(create_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            if !ours && std::os::unix::net::UnixStream::connect(&path).is_ok() {
                return Err(create_err(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "pipe name is served by another process",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(create_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(create_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(create_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(create_err)?;

        info!(pipe = name, ?path, mode = format_args!("{mode:o}"), "listening on unix domain socket");

        Ok(Self {
            listener,
            path,
            created_inode: (created.dev(), created.ino()),
        })
    }

    /// Wait for the next connecting peer.
    pub(crate) async fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().await.map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// The path this listener is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SharedListener {
    fn drop(&mut self) {
        // Hold the registry while removing the file so a concurrent rebind
        // of the same name cannot lose its freshly created socket.
        let mut registry = listeners().lock().unwrap_or_else(PoisonError::into_inner);
        if registry
            .get(&self.path)
            .is_some_and(|weak| weak.strong_count() == 0)
        {
            registry.remove(&self.path);
        }

        let (expected_dev, expected_ino) = self.created_inode;
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(
                    path = ?self.path,
                    "socket path identity changed; skipping cleanup"
                );
            }
        }
    }
}

/// Open the client end of the socket standing in for pipe `name`.
pub(crate) async fn connect(name: &str) -> Result<IpcStream> {
    let path = checked_path(name)?;
    match UnixStream::connect(&path).await {
        Ok(stream) => {
            debug!(pipe = name, ?path, "connected to unix domain socket");
            Ok(IpcStream::from_unix(stream))
        }
        Err(source)
            if matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
            ) =>
        {
            Err(TransportError::Unavailable {
                name: name.to_string(),
                source,
            })
        }
        Err(source) => Err(TransportError::Connect {
            name: name.to_string(),
            source,
        }),
    }
}

/// True when a socket file exists for pipe `name`.
pub(crate) fn endpoint_exists(name: &str) -> bool {
    checked_path(name)
        .ok()
        .and_then(|path| std::fs::symlink_metadata(path).ok())
        .is_some_and(|metadata| metadata.file_type().is_socket())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("symact-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_bind_accept_connect() {
        let dir = test_dir("uds");
        let sock_path = dir.join("test.sock");
        let name = sock_path.to_str().unwrap().to_string();

        let listener = SharedListener::obtain(&name, 0o600).unwrap();
        assert!(sock_path.exists());

        let client_name = name.clone();
        let client = tokio::spawn(async move {
            let mut client = connect(&client_name).await.unwrap();
            client.write_all(b"hello").await.unwrap();
        });

        let mut server = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        client.await.unwrap();

        drop(listener);
        assert!(
            !sock_path.exists(),
            "socket file should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_instances_share_one_listener() {
        let dir = test_dir("uds-shared");
        let name = dir.join("shared.sock").to_str().unwrap().to_string();

        let first = SharedListener::obtain(&name, 0o600).unwrap();
        let second = SharedListener::obtain(&name, 0o600).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        drop(first);
        assert!(endpoint_exists(&name), "listener alive while referenced");
        drop(second);
        assert!(!endpoint_exists(&name));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        assert!(matches!(
            checked_path(&long_path),
            Err(TransportError::PathTooLong { .. })
        ));
    }

    #[tokio::test]
    async fn test_bind_default_permissions_hardened() {
        let dir = test_dir("uds-perms");
        let sock_path = dir.join("perm.sock");

        let listener = SharedListener::obtain(sock_path.to_str().unwrap(), 0o600).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_bind_rejects_existing_non_socket_file() {
        let dir = test_dir("uds-file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = SharedListener::obtain(sock_path.to_str().unwrap(), 0o600);
        assert!(matches!(result, Err(TransportError::Create { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = test_dir("uds-stale");
        let sock_path = dir.join("stale.sock");
        // A bound-but-dropped std listener leaves a socket file nobody serves.
        drop(std::os::unix::net::UnixListener::bind(&sock_path).unwrap());
        assert!(sock_path.exists());

        let listener = SharedListener::obtain(sock_path.to_str().unwrap(), 0o600).unwrap();
        assert!(endpoint_exists(sock_path.to_str().unwrap()));

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_bind_refuses_live_foreign_socket() {
        let dir = test_dir("uds-live");
        let sock_path = dir.join("live.sock");
        let _foreign = std::os::unix::net::UnixListener::bind(&sock_path).unwrap();

        let result = SharedListener::obtain(sock_path.to_str().unwrap(), 0o600);
        assert!(matches!(result, Err(TransportError::Create { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_connect_without_listener_is_unavailable() {
        let dir = test_dir("uds-missing");
        let name = dir.join("missing.sock").to_str().unwrap().to_string();

        let err = connect(&name).await.unwrap_err();
        assert!(err.is_retryable(), "expected Unavailable, got {err:?}");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_drop_does_not_remove_replaced_path() {
        let dir = test_dir("uds-drop-race");
        let sock_path = dir.join("drop.sock");

        let listener = SharedListener::obtain(sock_path.to_str().unwrap(), 0o600).unwrap();
        assert!(sock_path.exists());

        std::fs::remove_file(&sock_path).unwrap();
        std::fs::write(&sock_path, b"replacement-file").unwrap();

        drop(listener);
        assert!(
            sock_path.exists(),
            "drop must not remove path if inode identity changed"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }
}
