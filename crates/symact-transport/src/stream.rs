use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

/// Default buffer size for in-memory stream pairs, matching the OS pipe buffers.
pub const MEMORY_BUFFER_SIZE: usize = 4096;

/// A connected duplex pipe stream implementing `AsyncRead + AsyncWrite`.
///
/// This is the fundamental I/O type returned by transport operations.
/// On Unix, this wraps a Unix domain socket stream.
/// On Windows, this wraps either end of a named pipe.
/// The in-memory variant backs tests and in-process sessions.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    #[cfg(windows)]
    PipeServer(tokio::net::windows::named_pipe::NamedPipeServer),
    #[cfg(windows)]
    PipeClient(tokio::net::windows::named_pipe::NamedPipeClient),
    Memory(DuplexStream),
}

macro_rules! delegate {
    ($self:expr, $stream:ident => $body:expr) => {
        match &mut $self.get_mut().inner {
            #[cfg(unix)]
            IpcStreamInner::Unix($stream) => $body,
            #[cfg(windows)]
            IpcStreamInner::PipeServer($stream) => $body,
            #[cfg(windows)]
            IpcStreamInner::PipeClient($stream) => $body,
            IpcStreamInner::Memory($stream) => $body,
        }
    };
}

impl AsyncRead for IpcStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        delegate!(self, stream => Pin::new(stream).poll_read(cx, buf))
    }
}

impl AsyncWrite for IpcStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        delegate!(self, stream => Pin::new(stream).poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, stream => Pin::new(stream).poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, stream => Pin::new(stream).poll_shutdown(cx))
    }
}

impl IpcStream {
    /// Create an IpcStream from a Unix domain socket stream.
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: tokio::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    /// Create an IpcStream from the server end of a connected named pipe.
    #[cfg(windows)]
    pub(crate) fn from_pipe_server(
        pipe: tokio::net::windows::named_pipe::NamedPipeServer,
    ) -> Self {
        Self {
            inner: IpcStreamInner::PipeServer(pipe),
        }
    }

    /// Create an IpcStream from the client end of a named pipe.
    #[cfg(windows)]
    pub(crate) fn from_pipe_client(
        pipe: tokio::net::windows::named_pipe::NamedPipeClient,
    ) -> Self {
        Self {
            inner: IpcStreamInner::PipeClient(pipe),
        }
    }

    /// Create a connected pair of in-memory streams.
    ///
    /// Bytes written to one end are read from the other, with the same
    /// ordering and close semantics as an OS pipe.
    pub fn memory_pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(MEMORY_BUFFER_SIZE);
        (
            Self {
                inner: IpcStreamInner::Memory(a),
            },
            Self {
                inner: IpcStreamInner::Memory(b),
            },
        )
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => "unix-domain-socket",
            #[cfg(windows)]
            IpcStreamInner::PipeServer(_) => "named-pipe-server",
            #[cfg(windows)]
            IpcStreamInner::PipeClient(_) => "named-pipe-client",
            IpcStreamInner::Memory(_) => "memory",
        }
    }

    /// Get the credentials of the connected peer (Linux only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        use std::os::fd::AsRawFd;

        let fd = match &self.inner {
            IpcStreamInner::Unix(stream) => stream.as_raw_fd(),
            IpcStreamInner::Memory(_) => return None,
        };

        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and `fd` is an open Unix socket descriptor owned by this stream.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("type", &self.transport_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn memory_pair_is_bidirectional() {
        let (mut a, mut b) = IpcStream::memory_pair();

        a.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        b.write_all(b"pong").await.unwrap();
        a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn memory_pair_reports_eof_after_drop() {
        let (a, mut b) = IpcStream::memory_pair();
        drop(a);

        let mut buf = [0u8; 1];
        let err = b.read_exact(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn debug_names_transport() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let (a, _b) = IpcStream::memory_pair();
        assert_eq!(format!("{a:?}"), "IpcStream { type: \"memory\" }");
        assert!(a.peer_credentials().is_none());
    }
}
